//! Domain primitives: TimeMs, CommissionModel.

use serde::{Deserialize, Serialize};

/// Time in milliseconds since Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeMs(pub i64);

impl TimeMs {
    pub fn new(ms: i64) -> Self {
        TimeMs(ms)
    }

    pub fn now() -> Self {
        TimeMs(chrono::Utc::now().timestamp_millis())
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }

    /// This instant minus `days` whole days.
    pub fn minus_days(&self, days: i64) -> Self {
        TimeMs(self.0 - days * 86_400_000)
    }
}

/// How net profit is divided between the agent, the operator, and the
/// agent's recruitment chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommissionModel {
    /// Agent keeps 60%, operator keeps 40%, no cascade.
    #[serde(rename = "60/40")]
    SixtyForty,
    /// Agent keeps 50%; each sponsor up the chain receives half of what the
    /// previous link received; the remainder goes to the operator.
    #[serde(rename = "50/50-cascade")]
    FiftyFiftyCascade,
}

impl CommissionModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommissionModel::SixtyForty => "60/40",
            CommissionModel::FiftyFiftyCascade => "50/50-cascade",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "60/40" => Some(CommissionModel::SixtyForty),
            "50/50-cascade" => Some(CommissionModel::FiftyFiftyCascade),
            _ => None,
        }
    }

    /// The operator's percentage of net profit under this model, used for
    /// per-tranche profit settlements outside a cascade context.
    pub fn operator_profit_pct(&self) -> u32 {
        match self {
            CommissionModel::SixtyForty => 40,
            CommissionModel::FiftyFiftyCascade => 50,
        }
    }
}

impl std::fmt::Display for CommissionModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
