//! Application services: one struct per aggregate flow.
//!
//! Services load aggregates, run the pure engines over the snapshot, and
//! hand the repository a complete write set to apply in one transaction.
//! A failed version guard surfaces as `ConcurrencyConflict`; notifications
//! fire after commit and never roll anything back.

pub mod batches;
pub mod bulk;
pub mod closure;
pub mod settlements;
pub mod tranches;

pub use batches::{BatchService, BatchView};
pub use bulk::BulkService;
pub use closure::ClosureService;
pub use settlements::SettlementService;
pub use tranches::{SaleOutcome, TrancheService};
