//! Revenue split between the farmer, the mill and the savings fund.
//!
//! Amounts are integer cents. Farmer and mill shares are floored and the
//! fund takes whatever is left, so the three parts always add up to the
//! total being distributed.

use crate::domain::{invalid, DomainError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Percentages applied to a sale. Always sums to 100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevenueSplit {
    farmer_pct: u8,
    mill_pct: u8,
    fund_pct: u8,
}

impl RevenueSplit {
    pub fn new(farmer_pct: u8, mill_pct: u8, fund_pct: u8) -> Result<Self, DomainError> {
        let sum = farmer_pct as u16 + mill_pct as u16 + fund_pct as u16;
        if sum != 100 {
            return Err(invalid(format!(
                "revenue split must add up to 100 (got {}/{}/{} = {})",
                farmer_pct, mill_pct, fund_pct, sum
            )));
        }
        Ok(Self {
            farmer_pct,
            mill_pct,
            fund_pct,
        })
    }

    pub fn farmer_pct(&self) -> u8 {
        self.farmer_pct
    }

    pub fn mill_pct(&self) -> u8 {
        self.mill_pct
    }

    pub fn fund_pct(&self) -> u8 {
        self.fund_pct
    }
}

impl Default for RevenueSplit {
    fn default() -> Self {
        Self {
            farmer_pct: 70,
            mill_pct: 20,
            fund_pct: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Party {
    Farmer,
    Mill,
    Fund,
}

impl Party {
    pub const ALL: [Party; 3] = [Party::Farmer, Party::Mill, Party::Fund];

    pub fn as_str(&self) -> &'static str {
        match self {
            Party::Farmer => "farmer",
            Party::Mill => "mill",
            Party::Fund => "fund",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payout {
    pub percentage: u8,
    pub amount_cents: i64,
    pub wallet: Option<String>,
    pub transferred: bool,
    pub transferred_at: Option<DateTime<Utc>>,
    pub tx_hash: Option<String>,
}

impl Payout {
    fn pending(percentage: u8, amount_cents: i64) -> Self {
        Self {
            percentage,
            amount_cents,
            wallet: None,
            transferred: false,
            transferred_at: None,
            tx_hash: None,
        }
    }
}

/// Per-party breakdown of a value, with transfer bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Distribution {
    pub total_cents: i64,
    pub farmer: Payout,
    pub mill: Payout,
    pub fund: Payout,
}

impl Distribution {
    pub fn compute(split: RevenueSplit, total_cents: i64) -> Self {
        let farmer = total_cents * split.farmer_pct as i64 / 100;
        let mill = total_cents * split.mill_pct as i64 / 100;
        let fund = total_cents - farmer - mill;
        Self {
            total_cents,
            farmer: Payout::pending(split.farmer_pct, farmer),
            mill: Payout::pending(split.mill_pct, mill),
            fund: Payout::pending(split.fund_pct, fund),
        }
    }

    /// Percentages this distribution was created with.
    pub fn split(&self) -> RevenueSplit {
        RevenueSplit {
            farmer_pct: self.farmer.percentage,
            mill_pct: self.mill.percentage,
            fund_pct: self.fund.percentage,
        }
    }

    /// Recomputes the amounts for a new total, keeping the original
    /// percentages. Transfer state is reset.
    pub fn rebased(&self, total_cents: i64) -> Self {
        Self::compute(self.split(), total_cents)
    }

    pub fn payout(&self, party: Party) -> &Payout {
        match party {
            Party::Farmer => &self.farmer,
            Party::Mill => &self.mill,
            Party::Fund => &self.fund,
        }
    }

    pub fn payout_mut(&mut self, party: Party) -> &mut Payout {
        match party {
            Party::Farmer => &mut self.farmer,
            Party::Mill => &mut self.mill,
            Party::Fund => &mut self.fund,
        }
    }

    pub fn sum_cents(&self) -> i64 {
        self.farmer.amount_cents + self.mill.amount_cents + self.fund.amount_cents
    }

    pub fn any_transferred(&self) -> bool {
        Party::ALL.iter().any(|p| self.payout(*p).transferred)
    }

    pub fn fully_transferred(&self) -> bool {
        Party::ALL.iter().all(|p| self.payout(*p).transferred)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_must_total_one_hundred() {
        assert!(RevenueSplit::new(80, 10, 10).is_ok());
        assert!(RevenueSplit::new(70, 20, 5).is_err());
        assert!(RevenueSplit::new(255, 0, 0).is_err());
    }

    #[test]
    fn default_split_is_seventy_twenty_ten() {
        let d = Distribution::compute(RevenueSplit::default(), 10_000);
        assert_eq!(d.farmer.amount_cents, 7_000);
        assert_eq!(d.mill.amount_cents, 2_000);
        assert_eq!(d.fund.amount_cents, 1_000);
    }

    #[test]
    fn parts_always_sum_to_total() {
        let splits = [
            RevenueSplit::default(),
            RevenueSplit::new(80, 10, 10).unwrap(),
            RevenueSplit::new(33, 33, 34).unwrap(),
        ];
        for split in splits {
            for total in [0, 1, 7, 99, 1_471, 14_700, 123_457, 9_999_999] {
                let d = Distribution::compute(split, total);
                assert_eq!(d.sum_cents(), total, "split {:?} total {}", split, total);
                assert!(d.fund.amount_cents >= 0);
            }
        }
    }

    #[test]
    fn rebasing_keeps_percentages_and_resets_transfers() {
        let mut d = Distribution::compute(RevenueSplit::new(80, 10, 10).unwrap(), 1_000);
        d.farmer.transferred = true;
        let rebased = d.rebased(2_501);
        assert_eq!(rebased.split(), d.split());
        assert_eq!(rebased.sum_cents(), 2_501);
        assert!(!rebased.any_transferred());
    }
}
