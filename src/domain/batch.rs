//! Batch aggregate: a purchased quantity of goods assigned to one agent,
//! divided into sequential tranches.

use super::decimal::Decimal;
use super::primitives::{CommissionModel, TimeMs};
use serde::{Deserialize, Serialize};

/// Batch lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchState {
    Created,
    Active,
    Finalized,
}

impl BatchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchState::Created => "CREATED",
            BatchState::Active => "ACTIVE",
            BatchState::Finalized => "FINALIZED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CREATED" => Some(BatchState::Created),
            "ACTIVE" => Some(BatchState::Active),
            "FINALIZED" => Some(BatchState::Finalized),
            _ => None,
        }
    }

    /// Legal direct transitions. Finalization only happens through the
    /// closure flow; cancellation is a hard delete, not a transition.
    pub fn can_transition_to(&self, next: BatchState) -> bool {
        matches!(
            (self, next),
            (BatchState::Created, BatchState::Active)
                | (BatchState::Active, BatchState::Finalized)
        )
    }
}

impl std::fmt::Display for BatchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Batch aggregate root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub id: i64,
    pub agent_id: i64,
    pub quantity: i64,
    pub commission_model: CommissionModel,
    pub state: BatchState,
    pub unit_price: Decimal,
    pub total_investment: Decimal,
    pub operator_investment: Decimal,
    pub agent_investment: Decimal,
    pub money_collected: Decimal,
    pub money_transferred: Decimal,
    /// Operator investment already recovered (retail settlements + bulk).
    pub operator_recovered: Decimal,
    /// Agent investment already recovered through bulk settlements.
    pub agent_recovered: Decimal,
    /// Operator profit share already claimed by confirmed settlements.
    pub operator_profit_claimed: Decimal,
    pub forced: bool,
    pub origin_bulk_sale_id: Option<String>,
    pub version: i64,
    pub created_at: TimeMs,
    pub activated_at: Option<TimeMs>,
    pub finalized_at: Option<TimeMs>,
}

impl Batch {
    /// Retail money collected but not yet transferred to the operator.
    /// Feeds the bulk-settlement pool and the closure residual.
    pub fn retained_money(&self) -> Decimal {
        (self.money_collected - self.money_transferred).floor_zero()
    }

    /// Operator investment still unrecovered.
    pub fn operator_investment_due(&self) -> Decimal {
        (self.operator_investment - self.operator_recovered).floor_zero()
    }

    /// Agent investment still unrecovered.
    pub fn agent_investment_due(&self) -> Decimal {
        (self.agent_investment - self.agent_recovered).floor_zero()
    }

    /// Profit accrued to date: collected money in excess of the total
    /// investment, floored at zero.
    pub fn accrued_profit(&self) -> Decimal {
        (self.money_collected - self.total_investment).floor_zero()
    }
}

/// Number of tranches a batch of `quantity` units is divided into.
pub fn tranche_count_for(quantity: i64) -> usize {
    if quantity <= 50 {
        2
    } else {
        3
    }
}

/// Split `quantity` units across tranches; remainder units go to the
/// earliest tranches so stock always sums to the batch quantity.
pub fn tranche_stocks_for(quantity: i64) -> Vec<i64> {
    let count = tranche_count_for(quantity) as i64;
    let base = quantity / count;
    let remainder = quantity % count;
    (0..count)
        .map(|i| if i < remainder { base + 1 } else { base })
        .collect()
}

/// Investment figures for a batch of `quantity` units.
///
/// Total is quantity x unit price; the operator fronts `operator_pct` of it
/// and the agent the rest. Agent + operator always reconstructs the total
/// exactly.
pub fn investment_for(quantity: i64, unit_price: Decimal, operator_pct: u32) -> BatchInvestment {
    let total = Decimal::from_units(quantity) * unit_price;
    let operator = total.pct(operator_pct);
    BatchInvestment {
        total,
        operator,
        agent: total - operator,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchInvestment {
    pub total: Decimal,
    pub operator: Decimal,
    pub agent: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_batch_state_transitions() {
        assert!(BatchState::Created.can_transition_to(BatchState::Active));
        assert!(BatchState::Active.can_transition_to(BatchState::Finalized));
        assert!(!BatchState::Created.can_transition_to(BatchState::Finalized));
        assert!(!BatchState::Finalized.can_transition_to(BatchState::Active));
        assert!(!BatchState::Active.can_transition_to(BatchState::Created));
    }

    #[test]
    fn test_tranche_count_boundary() {
        assert_eq!(tranche_count_for(50), 2);
        assert_eq!(tranche_count_for(51), 3);
        assert_eq!(tranche_count_for(1), 2);
    }

    #[test]
    fn test_tranche_stocks_sum_to_quantity() {
        for quantity in [1, 2, 49, 50, 51, 52, 53, 100, 101] {
            let stocks = tranche_stocks_for(quantity);
            assert_eq!(stocks.iter().sum::<i64>(), quantity, "qty {}", quantity);
            assert_eq!(stocks.len(), tranche_count_for(quantity));
            // earlier tranches never smaller than later ones
            for pair in stocks.windows(2) {
                assert!(pair[0] >= pair[1]);
            }
        }
    }

    #[test]
    fn test_tranche_stocks_51_is_equal_thirds() {
        assert_eq!(tranche_stocks_for(51), vec![17, 17, 17]);
    }

    #[test]
    fn test_investment_split_reconstructs_total() {
        let unit_price = Decimal::from_str("2400").unwrap();
        let inv = investment_for(51, unit_price, 50);
        assert_eq!(inv.total, Decimal::from_str("122400").unwrap());
        assert_eq!(inv.operator, Decimal::from_str("61200").unwrap());
        assert_eq!(inv.agent + inv.operator, inv.total);
    }

    #[test]
    fn test_accrued_profit_floors_at_zero() {
        let inv = investment_for(10, Decimal::from_str("2400").unwrap(), 50);
        let batch = Batch {
            id: 1,
            agent_id: 7,
            quantity: 10,
            commission_model: CommissionModel::SixtyForty,
            state: BatchState::Active,
            unit_price: Decimal::from_str("2400").unwrap(),
            total_investment: inv.total,
            operator_investment: inv.operator,
            agent_investment: inv.agent,
            money_collected: Decimal::from_str("1000").unwrap(),
            money_transferred: Decimal::zero(),
            operator_recovered: Decimal::zero(),
            agent_recovered: Decimal::zero(),
            operator_profit_claimed: Decimal::zero(),
            forced: false,
            origin_bulk_sale_id: None,
            version: 1,
            created_at: TimeMs::new(0),
            activated_at: None,
            finalized_at: None,
        };
        assert_eq!(batch.accrued_profit(), Decimal::zero());
        assert_eq!(batch.retained_money(), Decimal::from_str("1000").unwrap());
    }
}
