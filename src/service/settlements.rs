//! Settlement confirmation: the agent hands over the expected amount and the
//! batch's money counters, tranche releases, and closure activation follow.

use crate::db::repo::{ClosureActivationWrite, ConfirmSettlementWrite, Repository};
use crate::domain::{
    closure::{closure_residual, ClosureState},
    tranche::TrancheState,
    Decimal, DomainEvent, Settlement, SettlementState, TimeMs,
};
use crate::error::DomainError;
use crate::integrations::NotificationSink;
use std::sync::Arc;
use tracing::{info, warn};

pub struct SettlementService {
    repo: Arc<Repository>,
    notifier: Arc<dyn NotificationSink>,
}

impl SettlementService {
    pub fn new(repo: Arc<Repository>, notifier: Arc<dyn NotificationSink>) -> Self {
        Self { repo, notifier }
    }

    /// Confirm a PENDING settlement with the amount actually received.
    ///
    /// An amount below the outstanding due is rejected; the observed
    /// shortfall is persisted so a later bulk settlement can absorb it.
    /// A sufficient amount closes the settlement and, in the same
    /// transaction, updates the batch counters, releases the next tranche,
    /// and activates the closure settlement when the batch is sold out.
    pub async fn confirm(
        &self,
        settlement_id: i64,
        amount: Decimal,
    ) -> Result<Settlement, DomainError> {
        let settlement = self.load(settlement_id).await?;
        if settlement.state != SettlementState::Pending {
            return Err(DomainError::InvalidStateTransition {
                entity: "settlement",
                id: settlement_id,
                from: settlement.state.to_string(),
                requested: SettlementState::Succeeded.to_string(),
            });
        }

        let due = settlement.outstanding();
        if amount < due {
            let shortfall = due - amount;
            self.repo
                .record_settlement_shortfall(settlement_id, shortfall)
                .await?;
            info!(settlement_id, due = %due, received = %amount, "settlement shortfall recorded");
            return Err(DomainError::InsufficientAmount {
                settlement_id,
                expected: due,
                received: amount,
                shortfall,
            });
        }

        let batch = self
            .repo
            .get_batch(settlement.batch_id)
            .await?
            .ok_or(DomainError::EntityNotFound {
                entity: "batch",
                id: settlement.batch_id,
            })?;
        let tranches = self.repo.list_tranches(batch.id).await?;
        let tranche = tranches
            .iter()
            .find(|t| t.id == settlement.tranche_id)
            .ok_or(DomainError::EntityNotFound {
                entity: "tranche",
                id: settlement.tranche_id,
            })?;

        // A prior bulk may have absorbed part of this settlement and already
        // credited that share to the batch; only the unabsorbed portion moves
        // the counters here. Absorption covers the investment component first.
        let absorbed_inv = settlement.absorbed_amount.min(settlement.expected_investment);
        let absorbed_profit = (settlement.absorbed_amount - absorbed_inv).floor_zero();
        let new_money_transferred = batch.money_transferred + amount;
        let new_operator_recovered =
            batch.operator_recovered + (settlement.expected_investment - absorbed_inv);
        let new_operator_profit_claimed = batch.operator_profit_claimed
            + (settlement.expected_profit - absorbed_profit).floor_zero();

        let mut events = vec![DomainEvent::SettlementSucceeded {
            settlement_id,
            batch_id: batch.id,
            received_amount: amount,
        }];

        // Release the next tranche in line, when one is still waiting.
        let release_tranche = tranches
            .iter()
            .find(|t| t.ordinal == tranche.ordinal + 1 && t.state == TrancheState::Inactive)
            .map(|next| {
                events.push(DomainEvent::TrancheReleased {
                    tranche_id: next.id,
                    batch_id: batch.id,
                    ordinal: next.ordinal,
                });
                (next.id, next.version)
            });

        // Sold-out final tranche: the confirmation also opens the closure.
        let mut activate_closure = None;
        if tranche.is_final(tranches.len()) && tranche.current_stock == 0 {
            let closure = self
                .repo
                .get_closure_by_batch(batch.id)
                .await?
                .ok_or(DomainError::EntityNotFound {
                    entity: "closure_settlement",
                    id: batch.id,
                })?;
            if closure.state == ClosureState::Inactive {
                events.push(DomainEvent::ClosureActivationRequested {
                    batch_id: batch.id,
                    tranche_id: tranche.id,
                });
                activate_closure = Some(ClosureActivationWrite {
                    closure_id: closure.id,
                    version: closure.version,
                    residual_amount: closure_residual(
                        batch.money_collected,
                        new_money_transferred,
                    ),
                });
            }
        }

        let write = ConfirmSettlementWrite {
            settlement_id,
            settlement_version: settlement.version,
            received_amount: amount,
            batch_id: batch.id,
            batch_version: batch.version,
            new_money_transferred,
            new_operator_recovered,
            new_operator_profit_claimed,
            release_tranche,
            activate_closure,
            events,
        };
        let applied = self.repo.confirm_settlement(&write, TimeMs::now()).await?;
        if !applied {
            return Err(DomainError::ConcurrencyConflict {
                entity: "settlement",
                id: settlement_id,
            });
        }

        info!(settlement_id, batch_id = batch.id, received = %amount, "settlement confirmed");
        if let Err(e) = self
            .notifier
            .notify(
                batch.agent_id,
                "settlement_succeeded",
                serde_json::json!({ "settlementId": settlement_id, "received": amount }),
            )
            .await
        {
            warn!(settlement_id, error = %e, "notification failed");
        }

        self.load(settlement_id).await
    }

    pub async fn get(&self, settlement_id: i64) -> Result<Settlement, DomainError> {
        self.load(settlement_id).await
    }

    async fn load(&self, settlement_id: i64) -> Result<Settlement, DomainError> {
        self.repo
            .get_settlement(settlement_id)
            .await?
            .ok_or(DomainError::EntityNotFound {
                entity: "settlement",
                id: settlement_id,
            })
    }
}
