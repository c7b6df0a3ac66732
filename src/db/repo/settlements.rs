//! Settlement, bulk-settlement, and closure write operations.

use super::batches::{insert_batch_tx, BatchSpec, ClosureActivationWrite};
use super::Repository;
use crate::db::repo::outbox::insert_outbox_tx;
use crate::domain::{
    AffectedTranche, CommissionModel, Decimal, DomainEvent, SponsorShare, TimeMs,
};

/// Everything one settlement confirmation changes, applied atomically.
#[derive(Debug, Clone)]
pub struct ConfirmSettlementWrite {
    pub settlement_id: i64,
    pub settlement_version: i64,
    pub received_amount: Decimal,
    pub batch_id: i64,
    pub batch_version: i64,
    pub new_money_transferred: Decimal,
    pub new_operator_recovered: Decimal,
    pub new_operator_profit_claimed: Decimal,
    /// Next tranche to release, when there is one.
    pub release_tranche: Option<(i64, i64)>,
    /// Closure activation when this was the final tranche and it is empty.
    pub activate_closure: Option<ClosureActivationWrite>,
    pub events: Vec<DomainEvent>,
}

/// Row for a freshly recorded bulk sale.
#[derive(Debug, Clone)]
pub struct NewBulkSettlement {
    pub bulk_sale_id: String,
    pub seller_id: i64,
    pub commission_model: CommissionModel,
    pub units: i64,
    pub gross_revenue: Decimal,
    pub created_at: TimeMs,
}

#[derive(Debug, Clone)]
pub struct TrancheStockUpdate {
    pub tranche_id: i64,
    pub version: i64,
    pub new_stock: i64,
    pub new_bulk_consumed: i64,
    /// Finalize a tranche emptied by the bulk sale.
    pub finalize: bool,
}

#[derive(Debug, Clone)]
pub struct SettlementAbsorption {
    pub settlement_id: i64,
    pub version: i64,
    pub new_absorbed: Decimal,
    /// Outstanding after absorption, computed in Rust; zero when closing.
    pub new_shortfall: Decimal,
    /// Fully covered: SUCCEEDED with shortfall 0 and the absorbing bulk id.
    pub close: bool,
}

#[derive(Debug, Clone)]
pub struct BatchMoneyUpdate {
    pub batch_id: i64,
    pub version: i64,
    pub new_money_transferred: Decimal,
    pub new_operator_recovered: Decimal,
    pub new_agent_recovered: Decimal,
    pub new_operator_profit_claimed: Decimal,
}

/// The full write set of a bulk-settlement confirmation.
#[derive(Debug, Clone)]
pub struct BulkConfirmWrite {
    pub bulk_id: i64,
    pub bulk_version: i64,
    pub debt_cleared: Decimal,
    pub operator_investment_existing: Decimal,
    pub operator_investment_forced: Decimal,
    pub agent_investment_existing: Decimal,
    pub agent_investment_forced: Decimal,
    pub net_profit: Decimal,
    pub agent_share: Decimal,
    pub operator_share: Decimal,
    pub sponsor_shares: Vec<SponsorShare>,
    pub involved_batch_ids: Vec<i64>,
    pub affected_tranches: Vec<AffectedTranche>,
    pub closed_settlement_ids: Vec<i64>,
    pub tranche_updates: Vec<TrancheStockUpdate>,
    pub settlement_updates: Vec<SettlementAbsorption>,
    pub batch_updates: Vec<BatchMoneyUpdate>,
    /// Tranches to release because their predecessor was emptied and closed.
    pub release_tranches: Vec<(i64, i64)>,
    /// Forced batch to materialize, already shaped and finalized.
    pub forced_batch: Option<BatchSpec>,
    pub events: Vec<DomainEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkConfirmOutcome {
    Applied { forced_batch_id: Option<i64> },
    Conflict,
}

/// Everything one closure confirmation changes.
#[derive(Debug, Clone)]
pub struct ClosureConfirmWrite {
    pub closure_id: i64,
    pub closure_version: i64,
    pub tranche_id: i64,
    pub batch_id: i64,
    pub batch_version: i64,
    pub events: Vec<DomainEvent>,
}

impl Repository {
    /// Record the shortfall observed by a rejected confirmation attempt so
    /// bulk settlements can pick it up as outstanding debt.
    pub async fn record_settlement_shortfall(
        &self,
        settlement_id: i64,
        shortfall: Decimal,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE settlements SET shortfall = ? WHERE id = ? AND state = 'PENDING'")
            .bind(shortfall.to_canonical_string())
            .bind(settlement_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// PENDING -> SUCCEEDED with the cross-aggregate side effects: batch
    /// money counters, next tranche release, closure activation, outbox.
    pub async fn confirm_settlement(
        &self,
        write: &ConfirmSettlementWrite,
        now: TimeMs,
    ) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool().begin().await?;

        let settlement_updated = sqlx::query(
            r#"
            UPDATE settlements
            SET state = 'SUCCEEDED', received_amount = ?, shortfall = '0',
                confirmed_at = ?, version = version + 1
            WHERE id = ? AND version = ? AND state = 'PENDING'
            "#,
        )
        .bind(write.received_amount.to_canonical_string())
        .bind(now.as_i64())
        .bind(write.settlement_id)
        .bind(write.settlement_version)
        .execute(&mut *tx)
        .await?;
        if settlement_updated.rows_affected() == 0 {
            return Ok(false);
        }

        let batch_updated = sqlx::query(
            r#"
            UPDATE batches
            SET money_transferred = ?, operator_recovered = ?,
                operator_profit_claimed = ?, version = version + 1
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(write.new_money_transferred.to_canonical_string())
        .bind(write.new_operator_recovered.to_canonical_string())
        .bind(write.new_operator_profit_claimed.to_canonical_string())
        .bind(write.batch_id)
        .bind(write.batch_version)
        .execute(&mut *tx)
        .await?;
        if batch_updated.rows_affected() == 0 {
            return Ok(false);
        }

        if let Some((tranche_id, version)) = write.release_tranche {
            let released = sqlx::query(
                r#"
                UPDATE tranches
                SET state = 'RELEASED', released_at = ?, version = version + 1
                WHERE id = ? AND version = ? AND state = 'INACTIVE'
                "#,
            )
            .bind(now.as_i64())
            .bind(tranche_id)
            .bind(version)
            .execute(&mut *tx)
            .await?;
            if released.rows_affected() == 0 {
                return Ok(false);
            }
        }

        if let Some(closure) = &write.activate_closure {
            let activated = sqlx::query(
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
            if activated.rows_affected() == 0 {
                return Ok(false);
            }
        }

        insert_outbox_tx(&mut tx, &write.events, now).await?;
        tx.commit().await?;
        Ok(true)
    }

    /// Create the PENDING bulk settlement for a recorded bulk sale.
    pub async fn create_bulk_settlement(
        &self,
        new: &NewBulkSettlement,
    ) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO bulk_settlements (
                bulk_sale_id, seller_id, commission_model, units, gross_revenue, created_at
            ) VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&new.bulk_sale_id)
        .bind(new.seller_id)
        .bind(new.commission_model.as_str())
        .bind(new.units)
        .bind(new.gross_revenue.to_canonical_string())
        .bind(new.created_at.as_i64())
        .execute(self.pool())
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Apply the entire bulk confirmation write set in one transaction.
    ///
    /// Any failed version guard rolls the whole confirmation back and
    /// reports `Conflict`; partial application is never observable.
    pub async fn confirm_bulk_settlement(
        &self,
        write: &BulkConfirmWrite,
        now: TimeMs,
    ) -> Result<BulkConfirmOutcome, sqlx::Error> {
        let mut tx = self.pool().begin().await?;

        let forced_batch_id = match &write.forced_batch {
            Some(spec) => Some(insert_batch_tx(&mut tx, spec).await?.0),
            None => None,
        };

        let sponsor_shares = serde_json::to_string(&write.sponsor_shares)
            .map_err(|e| sqlx::Error::Protocol(format!("sponsor_shares serialization: {e}")))?;
        let involved = serde_json::to_string(&write.involved_batch_ids)
            .map_err(|e| sqlx::Error::Protocol(format!("involved_batch_ids serialization: {e}")))?;
        let affected = serde_json::to_string(&write.affected_tranches)
            .map_err(|e| sqlx::Error::Protocol(format!("affected_tranches serialization: {e}")))?;
        let closed = serde_json::to_string(&write.closed_settlement_ids)
            .map_err(|e| sqlx::Error::Protocol(format!("closed_settlement_ids serialization: {e}")))?;

        let bulk_updated = sqlx::query(
            r#"
            UPDATE bulk_settlements
            SET state = 'SUCCEEDED', debt_cleared = ?,
                operator_investment_existing = ?, operator_investment_forced = ?,
                agent_investment_existing = ?, agent_investment_forced = ?,
                net_profit = ?, agent_share = ?, operator_share = ?, sponsor_shares = ?,
                involved_batch_ids = ?, affected_tranches = ?, closed_settlement_ids = ?,
                forced_batch_id = ?, confirmed_at = ?, version = version + 1
            WHERE id = ? AND version = ? AND state = 'PENDING'
            "#,
        )
        .bind(write.debt_cleared.to_canonical_string())
        .bind(write.operator_investment_existing.to_canonical_string())
        .bind(write.operator_investment_forced.to_canonical_string())
        .bind(write.agent_investment_existing.to_canonical_string())
        .bind(write.agent_investment_forced.to_canonical_string())
        .bind(write.net_profit.to_canonical_string())
        .bind(write.agent_share.to_canonical_string())
        .bind(write.operator_share.to_canonical_string())
        .bind(sponsor_shares)
        .bind(involved)
        .bind(affected)
        .bind(closed)
        .bind(forced_batch_id)
        .bind(now.as_i64())
        .bind(write.bulk_id)
        .bind(write.bulk_version)
        .execute(&mut *tx)
        .await?;
        if bulk_updated.rows_affected() == 0 {
            return Ok(BulkConfirmOutcome::Conflict);
        }

        for update in &write.tranche_updates {
            let result = if update.finalize {
                sqlx::query(
                    r#"
                    UPDATE tranches
                    SET current_stock = ?, bulk_consumed = ?, state = 'FINALIZED',
                        finalized_at = ?, version = version + 1
                    WHERE id = ? AND version = ?
                    "#,
                )
                .bind(update.new_stock)
                .bind(update.new_bulk_consumed)
                .bind(now.as_i64())
                .bind(update.tranche_id)
                .bind(update.version)
                .execute(&mut *tx)
                .await?
            } else {
                sqlx::query(
                    r#"
                    UPDATE tranches
                    SET current_stock = ?, bulk_consumed = ?, version = version + 1
                    WHERE id = ? AND version = ?
                    "#,
                )
                .bind(update.new_stock)
                .bind(update.new_bulk_consumed)
                .bind(update.tranche_id)
                .bind(update.version)
                .execute(&mut *tx)
                .await?
            };
            if result.rows_affected() == 0 {
                return Ok(BulkConfirmOutcome::Conflict);
            }
        }

        for update in &write.settlement_updates {
            let result = if update.close {
                sqlx::query(
                    r#"
                    UPDATE settlements
                    SET state = 'SUCCEEDED', absorbed_amount = ?, shortfall = '0',
                        closing_bulk_id = ?, confirmed_at = ?, version = version + 1
                    WHERE id = ? AND version = ? AND state = 'PENDING'
                    "#,
                )
                .bind(update.new_absorbed.to_canonical_string())
                .bind(write.bulk_id)
                .bind(now.as_i64())
                .bind(update.settlement_id)
                .bind(update.version)
                .execute(&mut *tx)
                .await?
            } else {
                sqlx::query(
                    r#"
                    UPDATE settlements
                    SET absorbed_amount = ?, shortfall = ?, version = version + 1
                    WHERE id = ? AND version = ? AND state = 'PENDING'
                    "#,
                )
                .bind(update.new_absorbed.to_canonical_string())
                .bind(update.new_shortfall.to_canonical_string())
                .bind(update.settlement_id)
                .bind(update.version)
                .execute(&mut *tx)
                .await?
            };
            if result.rows_affected() == 0 {
                return Ok(BulkConfirmOutcome::Conflict);
            }
        }

        for update in &write.batch_updates {
            let result = sqlx::query(
                r#"
                UPDATE batches
                SET money_transferred = ?, operator_recovered = ?, agent_recovered = ?,
                    operator_profit_claimed = ?, version = version + 1
                WHERE id = ? AND version = ?
                "#,
            )
            .bind(update.new_money_transferred.to_canonical_string())
            .bind(update.new_operator_recovered.to_canonical_string())
            .bind(update.new_agent_recovered.to_canonical_string())
            .bind(update.new_operator_profit_claimed.to_canonical_string())
            .bind(update.batch_id)
            .bind(update.version)
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() == 0 {
                return Ok(BulkConfirmOutcome::Conflict);
            }
        }

        for (tranche_id, version) in &write.release_tranches {
            let result = sqlx::query(
                r#"
                UPDATE tranches
                SET state = 'RELEASED', released_at = ?, version = version + 1
                WHERE id = ? AND version = ? AND state = 'INACTIVE'
                "#,
            )
            .bind(now.as_i64())
            .bind(tranche_id)
            .bind(version)
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() == 0 {
                return Ok(BulkConfirmOutcome::Conflict);
            }
        }

        insert_outbox_tx(&mut tx, &write.events, now).await?;
        tx.commit().await?;
        Ok(BulkConfirmOutcome::Applied { forced_batch_id })
    }

    /// Closure confirmation: finalize tranche and batch, mark the closure
    /// SUCCEEDED, one transaction.
    pub async fn confirm_closure(
        &self,
        write: &ClosureConfirmWrite,
        now: TimeMs,
    ) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool().begin().await?;

        let closure_updated = sqlx::query(
            r#"
            UPDATE closure_settlements
            SET state = 'SUCCEEDED', confirmed_at = ?, version = version + 1
            WHERE id = ? AND version = ? AND state = 'PENDING'
            "#,
        )
        .bind(now.as_i64())
        .bind(write.closure_id)
        .bind(write.closure_version)
        .execute(&mut *tx)
        .await?;
        if closure_updated.rows_affected() == 0 {
            return Ok(false);
        }

        // The final tranche may already be FINALIZED (bulk consumption);
        // finalizing here is idempotent, not guarded.
        sqlx::query(
            r#"
            UPDATE tranches
            SET state = 'FINALIZED', finalized_at = ?, version = version + 1
            WHERE id = ? AND state != 'FINALIZED'
            "#,
        )
        .bind(now.as_i64())
        .bind(write.tranche_id)
        .execute(&mut *tx)
        .await?;

        let batch_updated = sqlx::query(
            r#"
            UPDATE batches
            SET state = 'FINALIZED', finalized_at = ?, version = version + 1
            WHERE id = ? AND version = ? AND state = 'ACTIVE'
            "#,
        )
        .bind(now.as_i64())
        .bind(write.batch_id)
        .bind(write.batch_version)
        .execute(&mut *tx)
        .await?;
        if batch_updated.rows_affected() == 0 {
            return Ok(false);
        }

        insert_outbox_tx(&mut tx, &write.events, now).await?;
        tx.commit().await?;
        Ok(true)
    }
}
