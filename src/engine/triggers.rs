//! Settlement trigger engine.
//!
//! Decides, from stock/money thresholds, when a per-tranche settlement
//! becomes payable and what amount is expected. Pure functions over a
//! snapshot of batch + tranche state; the service layer applies the result
//! transactionally.

use crate::domain::{CommissionModel, Decimal, SettlementConcept};

/// Threshold rule for one tranche position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerRule {
    /// Cumulative money collected reaches the operator investment.
    MoneyCoversOperatorInvestment,
    /// Remaining stock drops to at most this percent of initial stock.
    StockAtMostPct(u32),
}

/// Threshold lookup keyed by batch shape and tranche position.
///
/// Kept as a single table so new batch shapes extend it instead of growing
/// special cases. Returns None for shapes the system does not produce.
pub fn trigger_rule(tranche_count: usize, ordinal: i32) -> Option<TriggerRule> {
    match (tranche_count, ordinal) {
        (3, 1) => Some(TriggerRule::MoneyCoversOperatorInvestment),
        (3, 2) => Some(TriggerRule::StockAtMostPct(10)),
        (3, 3) => Some(TriggerRule::StockAtMostPct(20)),
        (2, 1) => Some(TriggerRule::StockAtMostPct(10)),
        (2, 2) => Some(TriggerRule::StockAtMostPct(20)),
        _ => None,
    }
}

/// Snapshot of everything the trigger decision needs.
#[derive(Debug, Clone)]
pub struct TriggerContext {
    pub tranche_count: usize,
    pub ordinal: i32,
    pub initial_stock: i64,
    pub current_stock: i64,
    pub money_collected: Decimal,
    pub total_investment: Decimal,
    pub operator_investment: Decimal,
    pub operator_profit_claimed: Decimal,
    pub model: CommissionModel,
}

impl TriggerContext {
    fn stock_at_most_pct(&self, pct: u32) -> bool {
        self.current_stock * 100 <= self.initial_stock * pct as i64
    }

    /// Operator's profit share accrued so far and not yet claimed by a
    /// confirmed settlement.
    fn unclaimed_operator_profit(&self) -> Decimal {
        let accrued = (self.money_collected - self.total_investment).floor_zero();
        let share = accrued.pct(self.model.operator_profit_pct());
        (share - self.operator_profit_claimed).floor_zero()
    }
}

/// Whether the tranche's settlement should move INACTIVE -> PENDING.
pub fn should_trigger(ctx: &TriggerContext) -> bool {
    match trigger_rule(ctx.tranche_count, ctx.ordinal) {
        Some(TriggerRule::MoneyCoversOperatorInvestment) => {
            ctx.money_collected >= ctx.operator_investment
        }
        Some(TriggerRule::StockAtMostPct(pct)) => ctx.stock_at_most_pct(pct),
        None => false,
    }
}

/// Expected amount for the settlement, split into its investment and profit
/// components.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExpectedAmount {
    pub investment: Decimal,
    pub profit: Decimal,
}

impl ExpectedAmount {
    pub fn total(&self) -> Decimal {
        self.investment + self.profit
    }

    pub fn concept(&self) -> SettlementConcept {
        SettlementConcept::from_components(self.investment, self.profit)
    }
}

/// Compute what the settlement is worth at activation time.
///
/// Tranche 1 recovers the operator investment; for 2-tranche batches it also
/// carries the operator's profit share accrued so far. Later tranches carry
/// only the operator's unclaimed profit share to date.
pub fn expected_amount(ctx: &TriggerContext) -> ExpectedAmount {
    if ctx.ordinal == 1 {
        let profit = if ctx.tranche_count == 2 {
            ctx.unclaimed_operator_profit()
        } else {
            Decimal::zero()
        };
        ExpectedAmount {
            investment: ctx.operator_investment,
            profit,
        }
    } else {
        ExpectedAmount {
            investment: Decimal::zero(),
            profit: ctx.unclaimed_operator_profit(),
        }
    }
}
