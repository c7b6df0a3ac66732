//! Bulk settlement: consolidated reconciliation triggered by a wholesale
//! sale, which may close multiple per-tranche settlements at once.

use super::decimal::Decimal;
use super::primitives::{CommissionModel, TimeMs};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BulkSettlementState {
    Pending,
    Succeeded,
}

impl BulkSettlementState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BulkSettlementState::Pending => "PENDING",
            BulkSettlementState::Succeeded => "SUCCEEDED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(BulkSettlementState::Pending),
            "SUCCEEDED" => Some(BulkSettlementState::Succeeded),
            _ => None,
        }
    }
}

impl std::fmt::Display for BulkSettlementState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Units consumed from one tranche by the bulk sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffectedTranche {
    pub tranche_id: i64,
    pub batch_id: i64,
    pub units: i64,
}

/// One sponsor's cascade commission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SponsorShare {
    pub agent_id: i64,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkSettlement {
    pub id: i64,
    /// External id of the originating bulk sale, 1:1.
    pub bulk_sale_id: String,
    pub seller_id: i64,
    pub commission_model: CommissionModel,
    pub units: i64,
    pub gross_revenue: Decimal,
    // Money breakdown, written once by the confirmation transaction.
    pub debt_cleared: Decimal,
    pub operator_investment_existing: Decimal,
    pub operator_investment_forced: Decimal,
    pub agent_investment_existing: Decimal,
    pub agent_investment_forced: Decimal,
    pub net_profit: Decimal,
    pub agent_share: Decimal,
    pub operator_share: Decimal,
    pub sponsor_shares: Vec<SponsorShare>,
    pub involved_batch_ids: Vec<i64>,
    pub affected_tranches: Vec<AffectedTranche>,
    pub closed_settlement_ids: Vec<i64>,
    pub forced_batch_id: Option<i64>,
    pub state: BulkSettlementState,
    pub version: i64,
    pub created_at: TimeMs,
    pub confirmed_at: Option<TimeMs>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_roundtrip() {
        for s in [BulkSettlementState::Pending, BulkSettlementState::Succeeded] {
            assert_eq!(BulkSettlementState::parse(s.as_str()), Some(s));
        }
        assert_eq!(BulkSettlementState::parse("ACTIVE"), None);
    }

    #[test]
    fn test_affected_tranche_json_roundtrip() {
        let affected = vec![
            AffectedTranche {
                tranche_id: 3,
                batch_id: 1,
                units: 17,
            },
            AffectedTranche {
                tranche_id: 4,
                batch_id: 2,
                units: 13,
            },
        ];
        let json = serde_json::to_string(&affected).unwrap();
        let back: Vec<AffectedTranche> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, affected);
    }
}
