//! Pure computation engines for deterministic settlement logic.
//!
//! Nothing in here touches storage or clocks; the service layer feeds these
//! functions snapshots and applies their results transactionally.

pub mod allocation;
pub mod cascade;
pub mod triggers;

pub use allocation::{allocate, AllocationInput, AllocationOutcome};
pub use cascade::{split, ProfitSplit, MAX_CASCADE_HOPS};
pub use triggers::{expected_amount, should_trigger, ExpectedAmount, TriggerContext, TriggerRule};
