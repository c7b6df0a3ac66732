//! Domain types for the batch/tranche settlement core.
//!
//! This module provides:
//! - Exact money arithmetic via the Decimal wrapper
//! - Lifecycle aggregates: Batch, Tranche, Settlement, BulkSettlement,
//!   ClosureSettlement, each with an explicit state enum and transition table
//! - Domain events plus the outbox/audit records that carry them

pub mod batch;
pub mod bulk;
pub mod closure;
pub mod decimal;
pub mod event;
pub mod primitives;
pub mod settlement;
pub mod tranche;

pub use batch::{Batch, BatchInvestment, BatchState};
pub use bulk::{AffectedTranche, BulkSettlement, BulkSettlementState, SponsorShare};
pub use closure::{ClosureSettlement, ClosureState};
pub use decimal::Decimal;
pub use event::{DomainEvent, EventRecord, OutboxMessage};
pub use primitives::{CommissionModel, TimeMs};
pub use settlement::{Settlement, SettlementConcept, SettlementState};
pub use tranche::{Tranche, TrancheState};
