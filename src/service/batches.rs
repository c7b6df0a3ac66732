//! Batch lifecycle: creation, activation, cancellation.

use crate::config::Config;
use crate::db::repo::{BatchSpec, Repository, TrancheSpec};
use crate::domain::{
    batch::{investment_for, tranche_stocks_for},
    tranche::TrancheState,
    Batch, BatchState, ClosureSettlement, CommissionModel, Decimal, DomainEvent, Settlement,
    TimeMs, Tranche,
};
use crate::error::DomainError;
use crate::integrations::{AgentDirectory, NotificationSink, RewardFundLedger};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// A batch with its tranches and settlement records, for query responses.
#[derive(Debug, Clone, Serialize)]
pub struct BatchView {
    pub batch: Batch,
    pub tranches: Vec<Tranche>,
    pub settlements: Vec<Settlement>,
    pub closure: Option<ClosureSettlement>,
}

pub struct BatchService {
    repo: Arc<Repository>,
    directory: Arc<dyn AgentDirectory>,
    reward_fund: Arc<dyn RewardFundLedger>,
    notifier: Arc<dyn NotificationSink>,
    config: Config,
}

impl BatchService {
    pub fn new(
        repo: Arc<Repository>,
        directory: Arc<dyn AgentDirectory>,
        reward_fund: Arc<dyn RewardFundLedger>,
        notifier: Arc<dyn NotificationSink>,
        config: Config,
    ) -> Self {
        Self {
            repo,
            directory,
            reward_fund,
            notifier,
            config,
        }
    }

    /// Create a batch in CREATED state with its tranches, per-tranche
    /// settlements, and closure row.
    pub async fn create(
        &self,
        agent_id: i64,
        quantity: i64,
        model: CommissionModel,
    ) -> Result<BatchView, DomainError> {
        if quantity <= 0 {
            return Err(DomainError::InvalidArgument {
                field: "quantity",
                reason: format!("must be positive, got {quantity}"),
            });
        }
        self.check_eligibility(agent_id).await?;

        let investment =
            investment_for(quantity, self.config.unit_price, self.config.operator_investment_pct);
        let tranches = tranche_stocks_for(quantity)
            .into_iter()
            .enumerate()
            .map(|(i, stock)| TrancheSpec {
                ordinal: i as i32 + 1,
                initial_stock: stock,
                current_stock: stock,
                bulk_consumed: 0,
                state: TrancheState::Inactive,
            })
            .collect();

        let spec = BatchSpec {
            agent_id,
            quantity,
            commission_model: model,
            state: BatchState::Created,
            unit_price: self.config.unit_price,
            total_investment: investment.total,
            operator_investment: investment.operator,
            agent_investment: investment.agent,
            operator_recovered: Decimal::zero(),
            agent_recovered: Decimal::zero(),
            forced: false,
            origin_bulk_sale_id: None,
            created_at: TimeMs::now(),
            activated_at: None,
            finalized_at: None,
            tranches,
        };

        let batch_id = self.repo.create_batch(&spec).await?;
        info!(batch_id, agent_id, quantity, model = %model, "batch created");
        self.view(batch_id).await
    }

    /// CREATED -> ACTIVE; releases tranche #1 in the same transaction.
    pub async fn activate(&self, batch_id: i64) -> Result<BatchView, DomainError> {
        let batch = self.load(batch_id).await?;
        if batch.state != BatchState::Created {
            return Err(DomainError::InvalidStateTransition {
                entity: "batch",
                id: batch_id,
                from: batch.state.to_string(),
                requested: BatchState::Active.to_string(),
            });
        }

        let tranches = self.repo.list_tranches(batch_id).await?;
        let first = tranches.first().ok_or(DomainError::EntityNotFound {
            entity: "tranche",
            id: batch_id,
        })?;

        let events = vec![
            DomainEvent::BatchActivated {
                batch_id,
                agent_id: batch.agent_id,
            },
            DomainEvent::TrancheReleased {
                tranche_id: first.id,
                batch_id,
                ordinal: first.ordinal,
            },
        ];
        let applied = self
            .repo
            .activate_batch(batch_id, batch.version, TimeMs::now(), &events)
            .await?;
        if !applied {
            return Err(DomainError::ConcurrencyConflict {
                entity: "batch",
                id: batch_id,
            });
        }

        info!(batch_id, agent_id = batch.agent_id, "batch activated");
        if let Err(e) = self
            .reward_fund
            .record_inflow(batch.total_investment, "batch_activation", batch_id)
            .await
        {
            warn!(batch_id, error = %e, "reward fund inflow failed");
        }
        if let Err(e) = self
            .notifier
            .notify(
                batch.agent_id,
                "batch_activated",
                serde_json::json!({ "batchId": batch_id }),
            )
            .await
        {
            warn!(batch_id, error = %e, "notification failed");
        }

        self.view(batch_id).await
    }

    /// Hard-delete a CREATED batch and everything hanging off it.
    pub async fn cancel(&self, batch_id: i64) -> Result<(), DomainError> {
        let batch = self.load(batch_id).await?;
        if batch.state != BatchState::Created {
            return Err(DomainError::InvalidStateTransition {
                entity: "batch",
                id: batch_id,
                from: batch.state.to_string(),
                requested: "CANCELLED".to_string(),
            });
        }
        let deleted = self.repo.cancel_batch(batch_id, batch.version).await?;
        if !deleted {
            return Err(DomainError::ConcurrencyConflict {
                entity: "batch",
                id: batch_id,
            });
        }
        info!(batch_id, "batch cancelled");
        Ok(())
    }

    pub async fn view(&self, batch_id: i64) -> Result<BatchView, DomainError> {
        let batch = self.load(batch_id).await?;
        let tranches = self.repo.list_tranches(batch_id).await?;
        let settlements = self.repo.list_settlements_for_batch(batch_id).await?;
        let closure = self.repo.get_closure_by_batch(batch_id).await?;
        Ok(BatchView {
            batch,
            tranches,
            settlements,
            closure,
        })
    }

    async fn load(&self, batch_id: i64) -> Result<Batch, DomainError> {
        self.repo
            .get_batch(batch_id)
            .await?
            .ok_or(DomainError::EntityNotFound {
                entity: "batch",
                id: batch_id,
            })
    }

    async fn check_eligibility(&self, agent_id: i64) -> Result<(), DomainError> {
        let profile = self.directory.find_agent(agent_id).await.map_err(|_| {
            DomainError::EntityNotFound {
                entity: "agent",
                id: agent_id,
            }
        })?;
        if !profile.is_eligible() {
            return Err(DomainError::IneligibleAgent {
                agent_id,
                reason: if profile.requires_password_change {
                    "password change required".to_string()
                } else {
                    "agent is not active".to_string()
                },
            });
        }
        Ok(())
    }
}
