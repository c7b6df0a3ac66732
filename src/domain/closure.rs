//! Closure settlement: the final reconciliation that finalizes a batch once
//! its last tranche sells out.

use super::decimal::Decimal;
use super::primitives::TimeMs;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClosureState {
    Inactive,
    Pending,
    Succeeded,
}

impl ClosureState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClosureState::Inactive => "INACTIVE",
            ClosureState::Pending => "PENDING",
            ClosureState::Succeeded => "SUCCEEDED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INACTIVE" => Some(ClosureState::Inactive),
            "PENDING" => Some(ClosureState::Pending),
            "SUCCEEDED" => Some(ClosureState::Succeeded),
            _ => None,
        }
    }
}

impl std::fmt::Display for ClosureState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosureSettlement {
    pub id: i64,
    pub batch_id: i64,
    /// The batch's final tranche, 1:1.
    pub tranche_id: i64,
    pub residual_amount: Decimal,
    pub state: ClosureState,
    pub version: i64,
    pub created_at: TimeMs,
    pub activated_at: Option<TimeMs>,
    pub confirmed_at: Option<TimeMs>,
}

/// Residual owed at closure: collected money not yet transferred, never
/// negative.
pub fn closure_residual(money_collected: Decimal, money_transferred: Decimal) -> Decimal {
    (money_collected - money_transferred).floor_zero()
}
