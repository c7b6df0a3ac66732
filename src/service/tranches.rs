//! Tranche transitions, retail sales, and the release sweep.

use crate::config::Config;
use crate::db::repo::{
    ActivateSettlementWrite, ClosureActivationWrite, Repository, RetailSaleWrite,
};
use crate::domain::{
    closure::closure_residual,
    tranche::TrancheState,
    Batch, Decimal, DomainEvent, SettlementState, TimeMs, Tranche,
};
use crate::engine::triggers::{expected_amount, should_trigger, TriggerContext};
use crate::error::DomainError;
use crate::integrations::NotificationSink;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a recorded retail sale did.
#[derive(Debug, Clone, Serialize)]
pub struct SaleOutcome {
    pub tranche: Tranche,
    pub batch: Batch,
    /// Settlement that moved to PENDING because of this sale, if any.
    pub activated_settlement_id: Option<i64>,
    pub closure_activated: bool,
}

pub struct TrancheService {
    repo: Arc<Repository>,
    notifier: Arc<dyn NotificationSink>,
    config: Config,
}

impl TrancheService {
    pub fn new(
        repo: Arc<Repository>,
        notifier: Arc<dyn NotificationSink>,
        config: Config,
    ) -> Self {
        Self {
            repo,
            notifier,
            config,
        }
    }

    /// Admin-triggered transition (pickup, delivery confirmation). The
    /// final transition to FINALIZED is automatic and not accepted here.
    pub async fn transition(
        &self,
        tranche_id: i64,
        target: TrancheState,
    ) -> Result<Tranche, DomainError> {
        let tranche = self.load(tranche_id).await?;
        if target == TrancheState::Finalized || !tranche.state.can_transition_to(target) {
            return Err(DomainError::InvalidStateTransition {
                entity: "tranche",
                id: tranche_id,
                from: tranche.state.to_string(),
                requested: target.to_string(),
            });
        }

        let applied = self
            .repo
            .transition_tranche(
                tranche_id,
                tranche.state,
                target,
                tranche.version,
                TimeMs::now(),
                &[],
            )
            .await?;
        if !applied {
            return Err(DomainError::ConcurrencyConflict {
                entity: "tranche",
                id: tranche_id,
            });
        }
        info!(tranche_id, from = %tranche.state, to = %target, "tranche transitioned");
        self.load(tranche_id).await
    }

    /// Record a retail sale in one transaction: consume stock, collect money,
    /// evaluate the settlement trigger, and handle stock-zero side effects.
    pub async fn record_sale(
        &self,
        tranche_id: i64,
        quantity: i64,
        amount: Decimal,
    ) -> Result<SaleOutcome, DomainError> {
        let tranche = self.load(tranche_id).await?;
        if !tranche.state.is_sellable() {
            return Err(DomainError::InvalidStateTransition {
                entity: "tranche",
                id: tranche_id,
                from: tranche.state.to_string(),
                requested: "sale".to_string(),
            });
        }
        if quantity <= 0 || quantity > tranche.current_stock {
            return Err(DomainError::InsufficientStock {
                tranche_id,
                requested: quantity,
                available: tranche.current_stock,
            });
        }

        let batch = self
            .repo
            .get_batch(tranche.batch_id)
            .await?
            .ok_or(DomainError::EntityNotFound {
                entity: "batch",
                id: tranche.batch_id,
            })?;
        let tranches = self.repo.list_tranches(batch.id).await?;
        let tranche_count = tranches.len();
        let is_final = tranche.is_final(tranche_count);

        let new_stock = tranche.current_stock - quantity;
        let new_money_collected = batch.money_collected + amount;

        // Trigger evaluation runs on the post-sale snapshot.
        let settlement = self
            .repo
            .get_settlement_by_tranche(tranche_id)
            .await?
            .ok_or(DomainError::EntityNotFound {
                entity: "settlement",
                id: tranche_id,
            })?;

        let mut events = Vec::new();
        let mut activate_settlement = None;
        if settlement.state == SettlementState::Inactive {
            let ctx = TriggerContext {
                tranche_count,
                ordinal: tranche.ordinal,
                initial_stock: tranche.initial_stock,
                current_stock: new_stock,
                money_collected: new_money_collected,
                total_investment: batch.total_investment,
                operator_investment: batch.operator_investment,
                operator_profit_claimed: batch.operator_profit_claimed,
                model: batch.commission_model,
            };
            if should_trigger(&ctx) {
                let expected = expected_amount(&ctx);
                events.push(DomainEvent::SettlementActivated {
                    settlement_id: settlement.id,
                    tranche_id,
                    batch_id: batch.id,
                    expected_amount: expected.total(),
                });
                activate_settlement = Some(ActivateSettlementWrite {
                    settlement_id: settlement.id,
                    version: settlement.version,
                    concept: expected.concept(),
                    expected_amount: expected.total(),
                    expected_investment: expected.investment,
                    expected_profit: expected.profit,
                });
            }
        }

        // Stock-zero side effects: non-final tranches finalize themselves;
        // the final tranche activates the closure settlement instead.
        let emptied = new_stock == 0;
        let finalize_tranche = emptied && !is_final;
        let mut activate_closure = None;
        if emptied && is_final {
            let closure = self
                .repo
                .get_closure_by_batch(batch.id)
                .await?
                .ok_or(DomainError::EntityNotFound {
                    entity: "closure_settlement",
                    id: batch.id,
                })?;
            events.push(DomainEvent::ClosureActivationRequested {
                batch_id: batch.id,
                tranche_id,
            });
            activate_closure = Some(ClosureActivationWrite {
                closure_id: closure.id,
                version: closure.version,
                residual_amount: closure_residual(new_money_collected, batch.money_transferred),
            });
        }

        let write = RetailSaleWrite {
            tranche_id,
            tranche_version: tranche.version,
            new_stock,
            finalize_tranche,
            batch_id: batch.id,
            batch_version: batch.version,
            new_money_collected,
            activate_settlement: activate_settlement.clone(),
            activate_closure,
            events,
        };
        let applied = self.repo.apply_retail_sale(&write, TimeMs::now()).await?;
        if !applied {
            return Err(DomainError::ConcurrencyConflict {
                entity: "tranche",
                id: tranche_id,
            });
        }

        info!(
            tranche_id,
            batch_id = batch.id,
            quantity,
            amount = %amount,
            "retail sale recorded"
        );
        if let Some(activation) = &activate_settlement {
            if let Err(e) = self
                .notifier
                .notify(
                    batch.agent_id,
                    "settlement_pending",
                    serde_json::json!({
                        "settlementId": activation.settlement_id,
                        "expected": activation.expected_amount,
                    }),
                )
                .await
            {
                warn!(settlement_id = activation.settlement_id, error = %e, "notification failed");
            }
        }

        let tranche = self.load(tranche_id).await?;
        let batch = self
            .repo
            .get_batch(tranche.batch_id)
            .await?
            .ok_or(DomainError::EntityNotFound {
                entity: "batch",
                id: tranche.batch_id,
            })?;
        Ok(SaleOutcome {
            tranche,
            batch,
            activated_settlement_id: activate_settlement.map(|a| a.settlement_id),
            closure_activated: emptied && is_final,
        })
    }

    /// Promote RELEASED tranches to IN_TRANSIT after the configured dwell.
    ///
    /// Idempotent and safe under concurrent sweepers: each candidate is
    /// updated conditionally on its observed state and version, and a lost
    /// race simply drops the candidate.
    pub async fn sweep_released(&self) -> Result<usize, DomainError> {
        let now = TimeMs::now();
        let cutoff = TimeMs::new(now.as_i64() - self.config.tranche_dwell_secs * 1000);
        let candidates = self.repo.list_released_before(cutoff).await?;

        let mut promoted = 0;
        for tranche in candidates {
            let applied = self
                .repo
                .transition_tranche(
                    tranche.id,
                    TrancheState::Released,
                    TrancheState::InTransit,
                    tranche.version,
                    now,
                    &[],
                )
                .await?;
            if applied {
                promoted += 1;
            } else {
                debug!(tranche_id = tranche.id, "sweep lost race, skipping");
            }
        }
        if promoted > 0 {
            info!(promoted, "tranche sweep promoted RELEASED -> IN_TRANSIT");
        }
        Ok(promoted)
    }

    /// Periodic sweep task; runs until the process shuts down.
    pub fn spawn_sweeper(self: Arc<Self>, interval_secs: u64) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
            loop {
                interval.tick().await;
                if let Err(e) = self.sweep_released().await {
                    warn!(error = %e, "tranche sweep failed");
                }
            }
        })
    }

    async fn load(&self, tranche_id: i64) -> Result<Tranche, DomainError> {
        self.repo
            .get_tranche(tranche_id)
            .await?
            .ok_or(DomainError::EntityNotFound {
                entity: "tranche",
                id: tranche_id,
            })
    }
}
