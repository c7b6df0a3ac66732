//! Tranche aggregate: a sequential slice of a batch's stock, released and
//! sold one at a time.

use super::primitives::TimeMs;
use serde::{Deserialize, Serialize};

/// Tranche lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrancheState {
    Inactive,
    Released,
    InTransit,
    InHand,
    Finalized,
}

impl TrancheState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrancheState::Inactive => "INACTIVE",
            TrancheState::Released => "RELEASED",
            TrancheState::InTransit => "IN_TRANSIT",
            TrancheState::InHand => "IN_HAND",
            TrancheState::Finalized => "FINALIZED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INACTIVE" => Some(TrancheState::Inactive),
            "RELEASED" => Some(TrancheState::Released),
            "IN_TRANSIT" => Some(TrancheState::InTransit),
            "IN_HAND" => Some(TrancheState::InHand),
            "FINALIZED" => Some(TrancheState::Finalized),
            _ => None,
        }
    }

    /// Strictly linear transition table.
    pub fn can_transition_to(&self, next: TrancheState) -> bool {
        matches!(
            (self, next),
            (TrancheState::Inactive, TrancheState::Released)
                | (TrancheState::Released, TrancheState::InTransit)
                | (TrancheState::InTransit, TrancheState::InHand)
                | (TrancheState::InHand, TrancheState::Finalized)
        )
    }

    /// States in which retail sales may consume stock.
    pub fn is_sellable(&self) -> bool {
        matches!(self, TrancheState::InHand)
    }
}

impl std::fmt::Display for TrancheState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tranche {
    pub id: i64,
    pub batch_id: i64,
    /// 1-based position within the batch.
    pub ordinal: i32,
    pub initial_stock: i64,
    pub current_stock: i64,
    /// Units consumed by bulk sales, tracked apart from retail consumption.
    pub bulk_consumed: i64,
    pub state: TrancheState,
    pub version: i64,
    pub created_at: TimeMs,
    pub released_at: Option<TimeMs>,
    pub in_transit_at: Option<TimeMs>,
    pub in_hand_at: Option<TimeMs>,
    pub finalized_at: Option<TimeMs>,
}

impl Tranche {
    /// Whether this is the batch's last tranche given the batch shape.
    pub fn is_final(&self, tranche_count: usize) -> bool {
        self.ordinal as usize == tranche_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tranche(initial: i64, current: i64) -> Tranche {
        Tranche {
            id: 1,
            batch_id: 1,
            ordinal: 1,
            initial_stock: initial,
            current_stock: current,
            bulk_consumed: 0,
            state: TrancheState::InHand,
            version: 1,
            created_at: TimeMs::new(0),
            released_at: None,
            in_transit_at: None,
            in_hand_at: None,
            finalized_at: None,
        }
    }

    #[test]
    fn test_linear_transitions_only() {
        use TrancheState::*;
        let order = [Inactive, Released, InTransit, InHand, Finalized];
        for (i, from) in order.iter().enumerate() {
            for (j, to) in order.iter().enumerate() {
                let legal = j == i + 1;
                assert_eq!(
                    from.can_transition_to(*to),
                    legal,
                    "{} -> {}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn test_is_final() {
        let mut t = tranche(17, 17);
        t.ordinal = 3;
        assert!(t.is_final(3));
        t.ordinal = 2;
        assert!(t.is_final(2));
        assert!(!t.is_final(3));
    }

    #[test]
    fn test_sellable_states() {
        assert!(TrancheState::InHand.is_sellable());
        assert!(!TrancheState::Released.is_sellable());
        assert!(!TrancheState::Finalized.is_sellable());
    }
}
