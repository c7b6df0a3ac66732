//! Domain events and the durable outbox/audit records that carry them.

use super::decimal::Decimal;
use super::primitives::TimeMs;
use serde::{Deserialize, Serialize};

/// Events emitted by the settlement core. Persisted as JSON in the outbox and
/// replayed to in-process handlers by the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    BatchActivated {
        batch_id: i64,
        agent_id: i64,
    },
    TrancheReleased {
        tranche_id: i64,
        batch_id: i64,
        ordinal: i32,
    },
    SettlementActivated {
        settlement_id: i64,
        tranche_id: i64,
        batch_id: i64,
        expected_amount: Decimal,
    },
    SettlementSucceeded {
        settlement_id: i64,
        batch_id: i64,
        received_amount: Decimal,
    },
    /// The final tranche of a batch ran out of stock; the closure settlement
    /// must move INACTIVE -> PENDING.
    ClosureActivationRequested {
        batch_id: i64,
        tranche_id: i64,
    },
    ClosureSucceeded {
        closure_id: i64,
        batch_id: i64,
        residual_amount: Decimal,
    },
    BulkSettlementSucceeded {
        bulk_settlement_id: i64,
        seller_id: i64,
        net_profit: Decimal,
    },
}

impl DomainEvent {
    /// Stable type tag, used as the outbox `event_type` column.
    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::BatchActivated { .. } => "batch_activated",
            DomainEvent::TrancheReleased { .. } => "tranche_released",
            DomainEvent::SettlementActivated { .. } => "settlement_activated",
            DomainEvent::SettlementSucceeded { .. } => "settlement_succeeded",
            DomainEvent::ClosureActivationRequested { .. } => "closure_activation_requested",
            DomainEvent::ClosureSucceeded { .. } => "closure_succeeded",
            DomainEvent::BulkSettlementSucceeded { .. } => "bulk_settlement_succeeded",
        }
    }

    /// Aggregate the event is about, for the audit log.
    pub fn aggregate(&self) -> (&'static str, i64) {
        match self {
            DomainEvent::BatchActivated { batch_id, .. } => ("batch", *batch_id),
            DomainEvent::TrancheReleased { tranche_id, .. } => ("tranche", *tranche_id),
            DomainEvent::SettlementActivated { settlement_id, .. } => {
                ("settlement", *settlement_id)
            }
            DomainEvent::SettlementSucceeded { settlement_id, .. } => {
                ("settlement", *settlement_id)
            }
            DomainEvent::ClosureActivationRequested { tranche_id, .. } => {
                ("tranche", *tranche_id)
            }
            DomainEvent::ClosureSucceeded { closure_id, .. } => {
                ("closure_settlement", *closure_id)
            }
            DomainEvent::BulkSettlementSucceeded {
                bulk_settlement_id, ..
            } => ("bulk_settlement", *bulk_settlement_id),
        }
    }
}

/// A durable outbox row, written in the same transaction as the business
/// mutation that produced its event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub id: i64,
    pub event_type: String,
    /// JSON-encoded `DomainEvent`.
    pub payload: String,
    pub retry_count: i32,
    /// Earliest time the relay may attempt this message again.
    pub next_attempt_at: TimeMs,
    pub last_error: Option<String>,
    pub created_at: TimeMs,
    pub processed_at: Option<TimeMs>,
}

impl OutboxMessage {
    /// Decode the payload back into a domain event.
    ///
    /// # Errors
    /// Returns an error if the stored JSON does not parse.
    pub fn event(&self) -> Result<DomainEvent, serde_json::Error> {
        serde_json::from_str(&self.payload)
    }
}

/// Append-only audit entry written after each successful publish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: i64,
    pub event_type: String,
    pub aggregate_type: String,
    pub aggregate_id: i64,
    pub payload: String,
    pub metadata: Option<String>,
    pub recorded_at: TimeMs,
}
