//! Per-tranche settlement: the money an agent owes the operator for one
//! tranche (investment recovery and/or profit share).

use super::decimal::Decimal;
use super::primitives::TimeMs;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementState {
    Inactive,
    Pending,
    Succeeded,
}

impl SettlementState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementState::Inactive => "INACTIVE",
            SettlementState::Pending => "PENDING",
            SettlementState::Succeeded => "SUCCEEDED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INACTIVE" => Some(SettlementState::Inactive),
            "PENDING" => Some(SettlementState::Pending),
            "SUCCEEDED" => Some(SettlementState::Succeeded),
            _ => None,
        }
    }
}

impl std::fmt::Display for SettlementState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What the expected amount is made of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementConcept {
    AdminInvestment,
    Profit,
    Mixed,
}

impl SettlementConcept {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementConcept::AdminInvestment => "ADMIN_INVESTMENT",
            SettlementConcept::Profit => "PROFIT",
            SettlementConcept::Mixed => "MIXED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ADMIN_INVESTMENT" => Some(SettlementConcept::AdminInvestment),
            "PROFIT" => Some(SettlementConcept::Profit),
            "MIXED" => Some(SettlementConcept::Mixed),
            _ => None,
        }
    }

    /// Concept for a settlement made of an investment part and a profit part.
    pub fn from_components(investment: Decimal, profit: Decimal) -> Self {
        match (investment.is_positive(), profit.is_positive()) {
            (true, true) => SettlementConcept::Mixed,
            (false, true) => SettlementConcept::Profit,
            _ => SettlementConcept::AdminInvestment,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settlement {
    pub id: i64,
    pub tranche_id: i64,
    pub batch_id: i64,
    pub concept: SettlementConcept,
    pub expected_amount: Decimal,
    /// Investment component of `expected_amount`.
    pub expected_investment: Decimal,
    /// Profit component of `expected_amount`.
    pub expected_profit: Decimal,
    pub received_amount: Decimal,
    /// Amount absorbed by a bulk settlement.
    pub absorbed_amount: Decimal,
    pub shortfall: Decimal,
    pub closing_bulk_id: Option<i64>,
    pub state: SettlementState,
    pub version: i64,
    pub created_at: TimeMs,
    pub activated_at: Option<TimeMs>,
    pub confirmed_at: Option<TimeMs>,
}

impl Settlement {
    /// Amount still owed: `expected - absorbed - received`, floored at zero.
    pub fn outstanding(&self) -> Decimal {
        (self.expected_amount - self.absorbed_amount - self.received_amount).floor_zero()
    }
}
