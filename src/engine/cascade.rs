//! Commission cascade calculator.
//!
//! Pure profit-split function: no storage, no side effects, exact decimal
//! arithmetic. Conservation holds by construction because the operator share
//! is always computed as the remainder.

use crate::domain::{CommissionModel, Decimal};
use serde::{Deserialize, Serialize};

/// Hard cap on sponsor-chain hops. Bounds worst-case latency and neutralizes
/// cycles introduced by malformed directory data.
pub const MAX_CASCADE_HOPS: usize = 10;

/// Outcome of splitting net profit across the agent, the sponsor chain, and
/// the operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfitSplit {
    pub agent_share: Decimal,
    pub operator_share: Decimal,
    /// `(sponsor agent id, amount)`, closest sponsor first.
    pub sponsor_shares: Vec<(i64, Decimal)>,
}

impl ProfitSplit {
    fn all_zero() -> Self {
        ProfitSplit {
            agent_share: Decimal::zero(),
            operator_share: Decimal::zero(),
            sponsor_shares: Vec::new(),
        }
    }

    /// Sum of every share; equals net profit for any non-negative input.
    pub fn total(&self) -> Decimal {
        self.agent_share
            + self.operator_share
            + self.sponsor_shares.iter().map(|(_, s)| *s).sum::<Decimal>()
    }
}

/// Split `net_profit` according to `model`.
///
/// `sponsor_chain` lists the agent's upstream recruiters, closest first.
/// `operator_id` identifies the operator; the cascade stops and hands the
/// remainder over as soon as it reaches that id, the chain runs out, or
/// [`MAX_CASCADE_HOPS`] links have been paid.
///
/// Zero or negative profit short-circuits to all-zero shares.
pub fn split(
    net_profit: Decimal,
    model: CommissionModel,
    sponsor_chain: &[i64],
    operator_id: i64,
) -> ProfitSplit {
    if !net_profit.is_positive() {
        return ProfitSplit::all_zero();
    }

    match model {
        CommissionModel::SixtyForty => {
            let agent_share = net_profit.pct(60);
            ProfitSplit {
                agent_share,
                operator_share: net_profit - agent_share,
                sponsor_shares: Vec::new(),
            }
        }
        CommissionModel::FiftyFiftyCascade => {
            let agent_share = net_profit.half();
            let mut sponsor_shares = Vec::new();
            let mut link = agent_share;
            for &sponsor_id in sponsor_chain.iter().take(MAX_CASCADE_HOPS) {
                if sponsor_id == operator_id {
                    break;
                }
                link = link.half();
                sponsor_shares.push((sponsor_id, link));
            }
            let paid: Decimal = sponsor_shares.iter().map(|(_, s)| *s).sum();
            ProfitSplit {
                agent_share,
                operator_share: net_profit - agent_share - paid,
                sponsor_shares,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    const OPERATOR: i64 = 1;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_sixty_forty_no_cascade() {
        let split = split(dec("1000"), CommissionModel::SixtyForty, &[5, 6], OPERATOR);
        assert_eq!(split.agent_share, dec("600"));
        assert_eq!(split.operator_share, dec("400"));
        assert!(split.sponsor_shares.is_empty());
    }

    #[test]
    fn test_cascade_halves_down_the_chain() {
        let split = split(
            dec("1000"),
            CommissionModel::FiftyFiftyCascade,
            &[10, 11],
            OPERATOR,
        );
        assert_eq!(split.agent_share, dec("500"));
        assert_eq!(split.sponsor_shares, vec![(10, dec("250")), (11, dec("125"))]);
        assert_eq!(split.operator_share, dec("125"));
    }

    #[test]
    fn test_cascade_empty_chain_gives_remainder_to_operator() {
        let split = split(dec("1000"), CommissionModel::FiftyFiftyCascade, &[], OPERATOR);
        assert_eq!(split.agent_share, dec("500"));
        assert_eq!(split.operator_share, dec("500"));
        assert!(split.sponsor_shares.is_empty());
    }

    #[test]
    fn test_cascade_stops_at_operator_in_chain() {
        let split = split(
            dec("1000"),
            CommissionModel::FiftyFiftyCascade,
            &[10, OPERATOR, 12],
            OPERATOR,
        );
        assert_eq!(split.sponsor_shares, vec![(10, dec("250"))]);
        // operator takes everything after the chain stops
        assert_eq!(split.operator_share, dec("250"));
    }

    #[test]
    fn test_cascade_capped_at_ten_hops() {
        let chain: Vec<i64> = (100..120).collect();
        let split = split(dec("1024"), CommissionModel::FiftyFiftyCascade, &chain, OPERATOR);
        assert_eq!(split.sponsor_shares.len(), MAX_CASCADE_HOPS);
    }

    #[test]
    fn test_conservation_for_all_chain_lengths() {
        // decimal-exact: agent + sponsors + operator reconstructs the profit
        for len in 0..=10 {
            let chain: Vec<i64> = (100..100 + len).collect();
            for profit in ["1000", "0.3", "77777.77", "1"] {
                let split = split(
                    dec(profit),
                    CommissionModel::FiftyFiftyCascade,
                    &chain,
                    OPERATOR,
                );
                assert_eq!(split.total(), dec(profit), "len {} profit {}", len, profit);
            }
        }
    }

    #[test]
    fn test_zero_and_negative_profit_short_circuit() {
        for profit in ["0", "-50"] {
            let split = split(
                dec(profit),
                CommissionModel::FiftyFiftyCascade,
                &[10],
                OPERATOR,
            );
            assert_eq!(split.agent_share, Decimal::zero());
            assert_eq!(split.operator_share, Decimal::zero());
            assert!(split.sponsor_shares.is_empty());
        }
    }

    #[test]
    fn test_pure_and_idempotent() {
        let a = split(dec("123.45"), CommissionModel::FiftyFiftyCascade, &[7, 8], OPERATOR);
        let b = split(dec("123.45"), CommissionModel::FiftyFiftyCascade, &[7, 8], OPERATOR);
        assert_eq!(a, b);
    }
}
