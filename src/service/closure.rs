//! Closure settlement flow: activation when a batch sells out, confirmation
//! that finalizes the batch.

use crate::db::repo::{ClosureConfirmWrite, Repository};
use crate::domain::{
    closure::{closure_residual, ClosureState},
    ClosureSettlement, DomainEvent, TimeMs,
};
use crate::error::DomainError;
use crate::integrations::NotificationSink;
use std::sync::Arc;
use tracing::{info, warn};

pub struct ClosureService {
    repo: Arc<Repository>,
    notifier: Arc<dyn NotificationSink>,
}

impl ClosureService {
    pub fn new(repo: Arc<Repository>, notifier: Arc<dyn NotificationSink>) -> Self {
        Self { repo, notifier }
    }

    /// Move a batch's closure settlement INACTIVE -> PENDING. Idempotent;
    /// called by the relay when a `ClosureActivationRequested` event lands,
    /// which may be after an in-transaction activation already happened.
    pub async fn activate_for_batch(&self, batch_id: i64) -> Result<bool, DomainError> {
        let closure = self
            .repo
            .get_closure_by_batch(batch_id)
            .await?
            .ok_or(DomainError::EntityNotFound {
                entity: "closure_settlement",
                id: batch_id,
            })?;
        if closure.state != ClosureState::Inactive {
            return Ok(false);
        }

        let batch = self
            .repo
            .get_batch(batch_id)
            .await?
            .ok_or(DomainError::EntityNotFound {
                entity: "batch",
                id: batch_id,
            })?;
        let residual = closure_residual(batch.money_collected, batch.money_transferred);
        let activated = self
            .repo
            .activate_closure(closure.id, residual, TimeMs::now())
            .await?;
        if activated {
            info!(batch_id, closure_id = closure.id, residual = %residual, "closure activated");
        }
        Ok(activated)
    }

    /// Confirm a PENDING closure: the residual was handed over, the final
    /// tranche and the batch both finalize.
    pub async fn confirm(&self, closure_id: i64) -> Result<ClosureSettlement, DomainError> {
        let closure = self.load(closure_id).await?;
        if closure.state != ClosureState::Pending {
            return Err(DomainError::InvalidStateTransition {
                entity: "closure_settlement",
                id: closure_id,
                from: closure.state.to_string(),
                requested: ClosureState::Succeeded.to_string(),
            });
        }

        let batch = self
            .repo
            .get_batch(closure.batch_id)
            .await?
            .ok_or(DomainError::EntityNotFound {
                entity: "batch",
                id: closure.batch_id,
            })?;
        let write = ClosureConfirmWrite {
            closure_id,
            closure_version: closure.version,
            tranche_id: closure.tranche_id,
            batch_id: batch.id,
            batch_version: batch.version,
            events: vec![DomainEvent::ClosureSucceeded {
                closure_id,
                batch_id: batch.id,
                residual_amount: closure.residual_amount,
            }],
        };
        let applied = self.repo.confirm_closure(&write, TimeMs::now()).await?;
        if !applied {
            return Err(DomainError::ConcurrencyConflict {
                entity: "closure_settlement",
                id: closure_id,
            });
        }

        info!(closure_id, batch_id = batch.id, "closure confirmed, batch finalized");
        if let Err(e) = self
            .notifier
            .notify(
                batch.agent_id,
                "batch_finalized",
                serde_json::json!({ "batchId": batch.id }),
            )
            .await
        {
            warn!(closure_id, error = %e, "notification failed");
        }

        self.load(closure_id).await
    }

    pub async fn get(&self, closure_id: i64) -> Result<ClosureSettlement, DomainError> {
        self.load(closure_id).await
    }

    async fn load(&self, closure_id: i64) -> Result<ClosureSettlement, DomainError> {
        self.repo
            .get_closure_settlement(closure_id)
            .await?
            .ok_or(DomainError::EntityNotFound {
                entity: "closure_settlement",
                id: closure_id,
            })
    }
}
