//! Repository layer for database operations.
//!
//! One `Repository` owns the pool; methods are organized across submodules
//! by aggregate:
//! - `batches.rs` - batch/tranche writes, retail sales, the release sweep
//! - `settlements.rs` - settlement, bulk-settlement, and closure writes
//! - `outbox.rs` - outbox and event-record operations
//!
//! Multi-aggregate flows are single methods running one sqlx transaction.
//! Every conditional write is guarded by `WHERE version = ?`; zero rows
//! affected aborts the transaction and reports a lost race to the caller.

mod batches;
mod outbox;
mod settlements;

pub use batches::{
    ActivateSettlementWrite, BatchSpec, ClosureActivationWrite, RetailSaleWrite, TrancheSpec,
};
pub use settlements::{
    BatchMoneyUpdate, BulkConfirmOutcome, BulkConfirmWrite, ClosureConfirmWrite,
    ConfirmSettlementWrite, NewBulkSettlement, SettlementAbsorption, TrancheStockUpdate,
};

use crate::domain::{
    batch::BatchState, bulk::BulkSettlementState, closure::ClosureState,
    settlement::SettlementConcept, settlement::SettlementState, tranche::TrancheState,
    AffectedTranche, Batch, BulkSettlement, ClosureSettlement, CommissionModel, Decimal,
    EventRecord, OutboxMessage, Settlement, SponsorShare, TimeMs, Tranche,
};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use std::str::FromStr;

/// Repository for database operations.
pub struct Repository {
    pool: SqlitePool,
}

fn decode_err(column: &str, message: String) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    }
}

fn dec_col(row: &SqliteRow, column: &str) -> Result<Decimal, sqlx::Error> {
    let raw: String = row.try_get(column)?;
    Decimal::from_str(&raw).map_err(|e| decode_err(column, format!("bad decimal {raw:?}: {e}")))
}

fn time_col(row: &SqliteRow, column: &str) -> Result<Option<TimeMs>, sqlx::Error> {
    let raw: Option<i64> = row.try_get(column)?;
    Ok(raw.map(TimeMs::new))
}

fn json_col<T: serde::de::DeserializeOwned>(
    row: &SqliteRow,
    column: &str,
) -> Result<T, sqlx::Error> {
    let raw: String = row.try_get(column)?;
    serde_json::from_str(&raw).map_err(|e| decode_err(column, format!("bad json: {e}")))
}

pub(crate) fn map_batch(row: &SqliteRow) -> Result<Batch, sqlx::Error> {
    let state_raw: String = row.try_get("state")?;
    let model_raw: String = row.try_get("commission_model")?;
    Ok(Batch {
        id: row.try_get("id")?,
        agent_id: row.try_get("agent_id")?,
        quantity: row.try_get("quantity")?,
        commission_model: CommissionModel::parse(&model_raw)
            .ok_or_else(|| decode_err("commission_model", format!("unknown model {model_raw:?}")))?,
        state: BatchState::parse(&state_raw)
            .ok_or_else(|| decode_err("state", format!("unknown batch state {state_raw:?}")))?,
        unit_price: dec_col(row, "unit_price")?,
        total_investment: dec_col(row, "total_investment")?,
        operator_investment: dec_col(row, "operator_investment")?,
        agent_investment: dec_col(row, "agent_investment")?,
        money_collected: dec_col(row, "money_collected")?,
        money_transferred: dec_col(row, "money_transferred")?,
        operator_recovered: dec_col(row, "operator_recovered")?,
        agent_recovered: dec_col(row, "agent_recovered")?,
        operator_profit_claimed: dec_col(row, "operator_profit_claimed")?,
        forced: row.try_get::<i64, _>("forced")? != 0,
        origin_bulk_sale_id: row.try_get("origin_bulk_sale_id")?,
        version: row.try_get("version")?,
        created_at: TimeMs::new(row.try_get("created_at")?),
        activated_at: time_col(row, "activated_at")?,
        finalized_at: time_col(row, "finalized_at")?,
    })
}

pub(crate) fn map_tranche(row: &SqliteRow) -> Result<Tranche, sqlx::Error> {
    let state_raw: String = row.try_get("state")?;
    Ok(Tranche {
        id: row.try_get("id")?,
        batch_id: row.try_get("batch_id")?,
        ordinal: row.try_get("ordinal")?,
        initial_stock: row.try_get("initial_stock")?,
        current_stock: row.try_get("current_stock")?,
        bulk_consumed: row.try_get("bulk_consumed")?,
        state: TrancheState::parse(&state_raw)
            .ok_or_else(|| decode_err("state", format!("unknown tranche state {state_raw:?}")))?,
        version: row.try_get("version")?,
        created_at: TimeMs::new(row.try_get("created_at")?),
        released_at: time_col(row, "released_at")?,
        in_transit_at: time_col(row, "in_transit_at")?,
        in_hand_at: time_col(row, "in_hand_at")?,
        finalized_at: time_col(row, "finalized_at")?,
    })
}

pub(crate) fn map_settlement(row: &SqliteRow) -> Result<Settlement, sqlx::Error> {
    let state_raw: String = row.try_get("state")?;
    let concept_raw: String = row.try_get("concept")?;
    Ok(Settlement {
        id: row.try_get("id")?,
        tranche_id: row.try_get("tranche_id")?,
        batch_id: row.try_get("batch_id")?,
        concept: SettlementConcept::parse(&concept_raw)
            .ok_or_else(|| decode_err("concept", format!("unknown concept {concept_raw:?}")))?,
        expected_amount: dec_col(row, "expected_amount")?,
        expected_investment: dec_col(row, "expected_investment")?,
        expected_profit: dec_col(row, "expected_profit")?,
        received_amount: dec_col(row, "received_amount")?,
        absorbed_amount: dec_col(row, "absorbed_amount")?,
        shortfall: dec_col(row, "shortfall")?,
        closing_bulk_id: row.try_get("closing_bulk_id")?,
        state: SettlementState::parse(&state_raw)
            .ok_or_else(|| decode_err("state", format!("unknown settlement state {state_raw:?}")))?,
        version: row.try_get("version")?,
        created_at: TimeMs::new(row.try_get("created_at")?),
        activated_at: time_col(row, "activated_at")?,
        confirmed_at: time_col(row, "confirmed_at")?,
    })
}

pub(crate) fn map_bulk(row: &SqliteRow) -> Result<BulkSettlement, sqlx::Error> {
    let state_raw: String = row.try_get("state")?;
    let model_raw: String = row.try_get("commission_model")?;
    let sponsor_shares: Vec<SponsorShare> = json_col(row, "sponsor_shares")?;
    let involved_batch_ids: Vec<i64> = json_col(row, "involved_batch_ids")?;
    let affected_tranches: Vec<AffectedTranche> = json_col(row, "affected_tranches")?;
    let closed_settlement_ids: Vec<i64> = json_col(row, "closed_settlement_ids")?;
    Ok(BulkSettlement {
        id: row.try_get("id")?,
        bulk_sale_id: row.try_get("bulk_sale_id")?,
        seller_id: row.try_get("seller_id")?,
        commission_model: CommissionModel::parse(&model_raw)
            .ok_or_else(|| decode_err("commission_model", format!("unknown model {model_raw:?}")))?,
        units: row.try_get("units")?,
        gross_revenue: dec_col(row, "gross_revenue")?,
        debt_cleared: dec_col(row, "debt_cleared")?,
        operator_investment_existing: dec_col(row, "operator_investment_existing")?,
        operator_investment_forced: dec_col(row, "operator_investment_forced")?,
        agent_investment_existing: dec_col(row, "agent_investment_existing")?,
        agent_investment_forced: dec_col(row, "agent_investment_forced")?,
        net_profit: dec_col(row, "net_profit")?,
        agent_share: dec_col(row, "agent_share")?,
        operator_share: dec_col(row, "operator_share")?,
        sponsor_shares,
        involved_batch_ids,
        affected_tranches,
        closed_settlement_ids,
        forced_batch_id: row.try_get("forced_batch_id")?,
        state: BulkSettlementState::parse(&state_raw)
            .ok_or_else(|| decode_err("state", format!("unknown bulk state {state_raw:?}")))?,
        version: row.try_get("version")?,
        created_at: TimeMs::new(row.try_get("created_at")?),
        confirmed_at: time_col(row, "confirmed_at")?,
    })
}

pub(crate) fn map_closure(row: &SqliteRow) -> Result<ClosureSettlement, sqlx::Error> {
    let state_raw: String = row.try_get("state")?;
    Ok(ClosureSettlement {
        id: row.try_get("id")?,
        batch_id: row.try_get("batch_id")?,
        tranche_id: row.try_get("tranche_id")?,
        residual_amount: dec_col(row, "residual_amount")?,
        state: ClosureState::parse(&state_raw)
            .ok_or_else(|| decode_err("state", format!("unknown closure state {state_raw:?}")))?,
        version: row.try_get("version")?,
        created_at: TimeMs::new(row.try_get("created_at")?),
        activated_at: time_col(row, "activated_at")?,
        confirmed_at: time_col(row, "confirmed_at")?,
    })
}

pub(crate) fn map_outbox(row: &SqliteRow) -> Result<OutboxMessage, sqlx::Error> {
    Ok(OutboxMessage {
        id: row.try_get("id")?,
        event_type: row.try_get("event_type")?,
        payload: row.try_get("payload")?,
        retry_count: row.try_get("retry_count")?,
        next_attempt_at: TimeMs::new(row.try_get("next_attempt_at")?),
        last_error: row.try_get("last_error")?,
        created_at: TimeMs::new(row.try_get("created_at")?),
        processed_at: time_col(row, "processed_at")?,
    })
}

pub(crate) fn map_event_record(row: &SqliteRow) -> Result<EventRecord, sqlx::Error> {
    Ok(EventRecord {
        id: row.try_get("id")?,
        event_type: row.try_get("event_type")?,
        aggregate_type: row.try_get("aggregate_type")?,
        aggregate_id: row.try_get("aggregate_id")?,
        payload: row.try_get("payload")?,
        metadata: row.try_get("metadata")?,
        recorded_at: TimeMs::new(row.try_get("recorded_at")?),
    })
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // =========================================================================
    // Aggregate reads
    // =========================================================================

    pub async fn get_batch(&self, id: i64) -> Result<Option<Batch>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM batches WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_batch).transpose()
    }

    /// Batches of one agent in the given state, oldest first.
    pub async fn list_batches_for_agent(
        &self,
        agent_id: i64,
        state: BatchState,
    ) -> Result<Vec<Batch>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT * FROM batches WHERE agent_id = ? AND state = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(agent_id)
        .bind(state.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_batch).collect()
    }

    pub async fn get_tranche(&self, id: i64) -> Result<Option<Tranche>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM tranches WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_tranche).transpose()
    }

    /// Tranches of a batch ordered by ordinal.
    pub async fn list_tranches(&self, batch_id: i64) -> Result<Vec<Tranche>, sqlx::Error> {
        let rows = sqlx::query("SELECT * FROM tranches WHERE batch_id = ? ORDER BY ordinal ASC")
            .bind(batch_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(map_tranche).collect()
    }

    pub async fn get_settlement(&self, id: i64) -> Result<Option<Settlement>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM settlements WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_settlement).transpose()
    }

    pub async fn get_settlement_by_tranche(
        &self,
        tranche_id: i64,
    ) -> Result<Option<Settlement>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM settlements WHERE tranche_id = ?")
            .bind(tranche_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_settlement).transpose()
    }

    pub async fn list_settlements_for_batch(
        &self,
        batch_id: i64,
    ) -> Result<Vec<Settlement>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT s.* FROM settlements s
            JOIN tranches t ON t.id = s.tranche_id
            WHERE s.batch_id = ?
            ORDER BY t.ordinal ASC
            "#,
        )
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_settlement).collect()
    }

    /// PENDING settlements across all of an agent's batches, oldest first.
    pub async fn list_pending_settlements_for_agent(
        &self,
        agent_id: i64,
    ) -> Result<Vec<Settlement>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT s.* FROM settlements s
            JOIN batches b ON b.id = s.batch_id
            WHERE b.agent_id = ? AND s.state = 'PENDING'
            ORDER BY s.activated_at ASC, s.id ASC
            "#,
        )
        .bind(agent_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_settlement).collect()
    }

    pub async fn get_bulk_settlement(
        &self,
        id: i64,
    ) -> Result<Option<BulkSettlement>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM bulk_settlements WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_bulk).transpose()
    }

    pub async fn get_bulk_settlement_by_sale(
        &self,
        bulk_sale_id: &str,
    ) -> Result<Option<BulkSettlement>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM bulk_settlements WHERE bulk_sale_id = ?")
            .bind(bulk_sale_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_bulk).transpose()
    }

    pub async fn get_closure_settlement(
        &self,
        id: i64,
    ) -> Result<Option<ClosureSettlement>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM closure_settlements WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_closure).transpose()
    }

    pub async fn get_closure_by_batch(
        &self,
        batch_id: i64,
    ) -> Result<Option<ClosureSettlement>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM closure_settlements WHERE batch_id = ?")
            .bind(batch_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_closure).transpose()
    }
}
