//! Batch and tranche write operations.

use super::{map_tranche, Repository};
use crate::db::repo::outbox::insert_outbox_tx;
use crate::domain::{
    settlement::SettlementConcept, tranche::TrancheState, CommissionModel, Decimal, DomainEvent,
    TimeMs, Tranche,
};
use sqlx::SqliteConnection;

/// Full description of a batch row plus its tranches, used both for normal
/// creation and for forced batches materialized inside a bulk confirmation.
#[derive(Debug, Clone)]
pub struct BatchSpec {
    pub agent_id: i64,
    pub quantity: i64,
    pub commission_model: CommissionModel,
    pub state: crate::domain::BatchState,
    pub unit_price: Decimal,
    pub total_investment: Decimal,
    pub operator_investment: Decimal,
    pub agent_investment: Decimal,
    pub operator_recovered: Decimal,
    pub agent_recovered: Decimal,
    pub forced: bool,
    pub origin_bulk_sale_id: Option<String>,
    pub created_at: TimeMs,
    pub activated_at: Option<TimeMs>,
    pub finalized_at: Option<TimeMs>,
    pub tranches: Vec<TrancheSpec>,
}

#[derive(Debug, Clone)]
pub struct TrancheSpec {
    pub ordinal: i32,
    pub initial_stock: i64,
    pub current_stock: i64,
    pub bulk_consumed: i64,
    pub state: TrancheState,
}

/// Settlement activation piggybacked on a retail sale.
#[derive(Debug, Clone)]
pub struct ActivateSettlementWrite {
    pub settlement_id: i64,
    pub version: i64,
    pub concept: SettlementConcept,
    pub expected_amount: Decimal,
    pub expected_investment: Decimal,
    pub expected_profit: Decimal,
}

/// Everything one retail sale changes, applied in a single transaction.
#[derive(Debug, Clone)]
pub struct RetailSaleWrite {
    pub tranche_id: i64,
    pub tranche_version: i64,
    pub new_stock: i64,
    /// Auto-finalize a non-final tranche whose stock hit zero.
    pub finalize_tranche: bool,
    pub batch_id: i64,
    pub batch_version: i64,
    pub new_money_collected: Decimal,
    pub activate_settlement: Option<ActivateSettlementWrite>,
    /// Activate the closure settlement because the final tranche emptied.
    pub activate_closure: Option<ClosureActivationWrite>,
    pub events: Vec<DomainEvent>,
}

#[derive(Debug, Clone)]
pub struct ClosureActivationWrite {
    pub closure_id: i64,
    pub version: i64,
    pub residual_amount: Decimal,
}

/// Insert a batch with its tranches, per-tranche settlements, and closure
/// settlement row inside an open transaction. Returns the batch id and the
/// tranche ids in ordinal order.
pub(crate) async fn insert_batch_tx(
    conn: &mut SqliteConnection,
    spec: &BatchSpec,
) -> Result<(i64, Vec<i64>), sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO batches (
            agent_id, quantity, commission_model, state, unit_price,
            total_investment, operator_investment, agent_investment,
            operator_recovered, agent_recovered,
            forced, origin_bulk_sale_id, created_at, activated_at, finalized_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(spec.agent_id)
    .bind(spec.quantity)
    .bind(spec.commission_model.as_str())
    .bind(spec.state.as_str())
    .bind(spec.unit_price.to_canonical_string())
    .bind(spec.total_investment.to_canonical_string())
    .bind(spec.operator_investment.to_canonical_string())
    .bind(spec.agent_investment.to_canonical_string())
    .bind(spec.operator_recovered.to_canonical_string())
    .bind(spec.agent_recovered.to_canonical_string())
    .bind(spec.forced as i64)
    .bind(spec.origin_bulk_sale_id.as_deref())
    .bind(spec.created_at.as_i64())
    .bind(spec.activated_at.map(|t| t.as_i64()))
    .bind(spec.finalized_at.map(|t| t.as_i64()))
    .execute(&mut *conn)
    .await?;
    let batch_id = result.last_insert_rowid();

    let mut tranche_ids = Vec::with_capacity(spec.tranches.len());
    for tranche in &spec.tranches {
        let finalized_at = if tranche.state == TrancheState::Finalized {
            spec.finalized_at.or(Some(spec.created_at))
        } else {
            None
        };
        let result = sqlx::query(
            r#"
            INSERT INTO tranches (
                batch_id, ordinal, initial_stock, current_stock, bulk_consumed,
                state, created_at, finalized_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(batch_id)
        .bind(tranche.ordinal)
        .bind(tranche.initial_stock)
        .bind(tranche.current_stock)
        .bind(tranche.bulk_consumed)
        .bind(tranche.state.as_str())
        .bind(spec.created_at.as_i64())
        .bind(finalized_at.map(|t| t.as_i64()))
        .execute(&mut *conn)
        .await?;
        let tranche_id = result.last_insert_rowid();
        tranche_ids.push(tranche_id);

        sqlx::query(
            "INSERT INTO settlements (tranche_id, batch_id, created_at) VALUES (?, ?, ?)",
        )
        .bind(tranche_id)
        .bind(batch_id)
        .bind(spec.created_at.as_i64())
        .execute(&mut *conn)
        .await?;
    }

    if let Some(last_tranche_id) = tranche_ids.last() {
        sqlx::query(
            "INSERT INTO closure_settlements (batch_id, tranche_id, created_at) VALUES (?, ?, ?)",
        )
        .bind(batch_id)
        .bind(last_tranche_id)
        .bind(spec.created_at.as_i64())
        .execute(&mut *conn)
        .await?;
    }

    Ok((batch_id, tranche_ids))
}

impl Repository {
    /// Create a batch with its tranches, settlements, and closure row.
    pub async fn create_batch(&self, spec: &BatchSpec) -> Result<i64, sqlx::Error> {
        let mut tx = self.pool().begin().await?;
        let (batch_id, _) = insert_batch_tx(&mut tx, spec).await?;
        tx.commit().await?;
        Ok(batch_id)
    }

    /// CREATED -> ACTIVE plus release of tranche #1, one transaction.
    ///
    /// Returns false without committing when the batch version or the first
    /// tranche's state moved under us.
    pub async fn activate_batch(
        &self,
        batch_id: i64,
        version: i64,
        now: TimeMs,
        events: &[DomainEvent],
    ) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool().begin().await?;

        let batch_updated = sqlx::query(
            r#"
            UPDATE batches
            SET state = 'ACTIVE', activated_at = ?, version = version + 1
            WHERE id = ? AND version = ? AND state = 'CREATED'
            "#,
        )
        .bind(now.as_i64())
        .bind(batch_id)
        .bind(version)
        .execute(&mut *tx)
        .await?;
        if batch_updated.rows_affected() == 0 {
            return Ok(false);
        }

        let tranche_updated = sqlx::query(
            r#"
            UPDATE tranches
            SET state = 'RELEASED', released_at = ?, version = version + 1
            WHERE batch_id = ? AND ordinal = 1 AND state = 'INACTIVE'
            "#,
        )
        .bind(now.as_i64())
        .bind(batch_id)
        .execute(&mut *tx)
        .await?;
        if tranche_updated.rows_affected() == 0 {
            return Ok(false);
        }

        insert_outbox_tx(&mut tx, events, now).await?;
        tx.commit().await?;
        Ok(true)
    }

    /// Hard-delete a CREATED batch; tranches, settlements, and the closure
    /// row go with it via ON DELETE CASCADE.
    pub async fn cancel_batch(&self, batch_id: i64, version: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM batches WHERE id = ? AND version = ? AND state = 'CREATED'",
        )
        .bind(batch_id)
        .bind(version)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Versioned tranche state transition with the matching timestamp stamp.
    pub async fn transition_tranche(
        &self,
        tranche_id: i64,
        from: TrancheState,
        to: TrancheState,
        version: i64,
        now: TimeMs,
        events: &[DomainEvent],
    ) -> Result<bool, sqlx::Error> {
        let timestamp_column = match to {
            TrancheState::Released => "released_at",
            TrancheState::InTransit => "in_transit_at",
            TrancheState::InHand => "in_hand_at",
            TrancheState::Finalized => "finalized_at",
            TrancheState::Inactive => return Ok(false),
        };

        let mut tx = self.pool().begin().await?;
        let sql = format!(
            "UPDATE tranches SET state = ?, {timestamp_column} = ?, version = version + 1
             WHERE id = ? AND state = ? AND version = ?"
        );
        let result = sqlx::query(&sql)
            .bind(to.as_str())
            .bind(now.as_i64())
            .bind(tranche_id)
            .bind(from.as_str())
            .bind(version)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Ok(false);
        }

        insert_outbox_tx(&mut tx, events, now).await?;
        tx.commit().await?;
        Ok(true)
    }

    /// RELEASED tranches whose release happened at or before the cutoff;
    /// sweep candidates.
    pub async fn list_released_before(
        &self,
        cutoff: TimeMs,
    ) -> Result<Vec<Tranche>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM tranches
            WHERE state = 'RELEASED' AND released_at <= ?
            ORDER BY released_at ASC, id ASC
            "#,
        )
        .bind(cutoff.as_i64())
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(map_tranche).collect()
    }

    /// Apply a retail sale: stock consumption, money collection, optional
    /// settlement/closure activation, and the outbox rows, atomically.
    ///
    /// Returns false (rolling everything back) if any version guard fails.
    pub async fn apply_retail_sale(&self, write: &RetailSaleWrite, now: TimeMs) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool().begin().await?;

        let tranche_updated = if write.finalize_tranche {
            sqlx::query(
                r#"
                UPDATE tranches
                SET current_stock = ?, state = 'FINALIZED', finalized_at = ?, version = version + 1
                WHERE id = ? AND version = ? AND state = 'IN_HAND'
                "#,
            )
            .bind(write.new_stock)
            .bind(now.as_i64())
            .bind(write.tranche_id)
            .bind(write.tranche_version)
            .execute(&mut *tx)
            .await?
        } else {
            sqlx::query(
                r#"
                UPDATE tranches
                SET current_stock = ?, version = version + 1
                WHERE id = ? AND version = ? AND state = 'IN_HAND'
                "#,
            )
            .bind(write.new_stock)
            .bind(write.tranche_id)
            .bind(write.tranche_version)
            .execute(&mut *tx)
            .await?
        };
        if tranche_updated.rows_affected() == 0 {
            return Ok(false);
        }

        let batch_updated = sqlx::query(
            r#"
            UPDATE batches
            SET money_collected = ?, version = version + 1
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(write.new_money_collected.to_canonical_string())
        .bind(write.batch_id)
        .bind(write.batch_version)
        .execute(&mut *tx)
        .await?;
        if batch_updated.rows_affected() == 0 {
            return Ok(false);
        }

        if let Some(activation) = &write.activate_settlement {
            let updated = sqlx::query(
                r#"
                UPDATE settlements
                SET state = 'PENDING', concept = ?, expected_amount = ?,
                    expected_investment = ?, expected_profit = ?, shortfall = ?,
                    activated_at = ?, version = version + 1
                WHERE id = ? AND version = ? AND state = 'INACTIVE'
                "#,
            )
            .bind(activation.concept.as_str())
            .bind(activation.expected_amount.to_canonical_string())
            .bind(activation.expected_investment.to_canonical_string())
            .bind(activation.expected_profit.to_canonical_string())
            .bind(activation.expected_amount.to_canonical_string())
            .bind(now.as_i64())
            .bind(activation.settlement_id)
            .bind(activation.version)
            .execute(&mut *tx)
            .await?;
            if updated.rows_affected() == 0 {
                return Ok(false);
            }
        }

        if let Some(closure) = &write.activate_closure {
            let updated = sqlx::query(
                r#"
                UPDATE closure_settlements
                SET state = 'PENDING', residual_amount = ?, activated_at = ?, version = version + 1
                WHERE id = ? AND version = ? AND state = 'INACTIVE'
                "#,
            )
            .bind(closure.residual_amount.to_canonical_string())
            .bind(now.as_i64())
            .bind(closure.closure_id)
            .bind(closure.version)
            .execute(&mut *tx)
            .await?;
            if updated.rows_affected() == 0 {
                return Ok(false);
            }
        }

        insert_outbox_tx(&mut tx, &write.events, now).await?;
        tx.commit().await?;
        Ok(true)
    }

    /// Idempotent closure activation used by the relay handler; INACTIVE ->
    /// PENDING, benign no-op when already past INACTIVE.
    pub async fn activate_closure(
        &self,
        closure_id: i64,
        residual_amount: Decimal,
        now: TimeMs,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE closure_settlements
            SET state = 'PENDING', residual_amount = ?, activated_at = ?, version = version + 1
            WHERE id = ? AND state = 'INACTIVE'
            "#,
        )
        .bind(residual_amount.to_canonical_string())
        .bind(now.as_i64())
        .bind(closure_id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
