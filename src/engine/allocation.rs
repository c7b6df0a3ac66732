//! Bulk-settlement money allocation.
//!
//! A single pool of available money is drained through a strictly ordered
//! waterfall: debts, operator investment (existing then forced batch), agent
//! investment (existing then forced), and finally profit split. Each step
//! caps at the lesser of the remaining pool and its target, so the pool is
//! never overdrawn. Pure and deterministic: the same input always produces
//! the same outcome.

use super::cascade::{self, ProfitSplit};
use crate::domain::{CommissionModel, Decimal};

/// Everything the waterfall needs, assembled by the service layer from
/// persistent state and external collaborators.
#[derive(Debug, Clone)]
pub struct AllocationInput {
    /// Bulk revenue plus retail money collected but not yet transferred.
    pub pool: Decimal,
    /// Outstanding settlement shortfalls plus equipment debt.
    pub debts: Decimal,
    /// Unrecovered operator investment per existing batch, oldest first.
    pub operator_due_existing: Vec<(i64, Decimal)>,
    /// Operator investment on the forced batch, zero when none is needed.
    pub operator_due_forced: Decimal,
    /// Unrecovered agent investment per existing batch, oldest first.
    pub agent_due_existing: Vec<(i64, Decimal)>,
    /// Agent investment on the forced batch.
    pub agent_due_forced: Decimal,
    pub model: CommissionModel,
    /// Sponsor chain of the seller, closest first.
    pub sponsor_chain: Vec<i64>,
    pub operator_id: i64,
}

/// Result of running the waterfall.
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationOutcome {
    pub debt_cleared: Decimal,
    /// Per-batch operator investment recovered, same order as the input.
    pub operator_recovered_existing: Vec<(i64, Decimal)>,
    pub operator_recovered_forced: Decimal,
    /// Per-batch agent investment recovered, same order as the input.
    pub agent_recovered_existing: Vec<(i64, Decimal)>,
    pub agent_recovered_forced: Decimal,
    pub net_profit: Decimal,
    pub split: ProfitSplit,
}

impl AllocationOutcome {
    pub fn operator_recovered_existing_total(&self) -> Decimal {
        self.operator_recovered_existing.iter().map(|(_, d)| *d).sum()
    }

    pub fn agent_recovered_existing_total(&self) -> Decimal {
        self.agent_recovered_existing.iter().map(|(_, d)| *d).sum()
    }

    /// Everything the waterfall consumed plus the profit it split.
    pub fn total_allocated(&self) -> Decimal {
        self.debt_cleared
            + self.operator_recovered_existing_total()
            + self.operator_recovered_forced
            + self.agent_recovered_existing_total()
            + self.agent_recovered_forced
            + self.net_profit
    }
}

fn take(pool: &mut Decimal, target: Decimal) -> Decimal {
    let taken = (*pool).min(target).floor_zero();
    *pool = *pool - taken;
    taken
}

fn take_per_batch(pool: &mut Decimal, dues: &[(i64, Decimal)]) -> Vec<(i64, Decimal)> {
    dues.iter()
        .map(|&(batch_id, due)| (batch_id, take(pool, due)))
        .collect()
}

/// Drain the pool through the waterfall in order.
pub fn allocate(input: &AllocationInput) -> AllocationOutcome {
    let mut pool = input.pool.floor_zero();

    let debt_cleared = take(&mut pool, input.debts);
    let operator_recovered_existing = take_per_batch(&mut pool, &input.operator_due_existing);
    let operator_recovered_forced = take(&mut pool, input.operator_due_forced);
    let agent_recovered_existing = take_per_batch(&mut pool, &input.agent_due_existing);
    let agent_recovered_forced = take(&mut pool, input.agent_due_forced);

    let net_profit = pool;
    let split = cascade::split(
        net_profit,
        input.model,
        &input.sponsor_chain,
        input.operator_id,
    );

    AllocationOutcome {
        debt_cleared,
        operator_recovered_existing,
        operator_recovered_forced,
        agent_recovered_existing,
        agent_recovered_forced,
        net_profit,
        split,
    }
}
