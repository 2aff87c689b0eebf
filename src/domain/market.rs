use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Outcome;

/// Market snapshot. Owned and refreshed by the external market-data sync;
/// this engine only reads it (under lock during creation and processing).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub id: i64,
    /// Venue condition id; required for real execution
    pub external_condition_id: Option<String>,
    pub question: String,
    pub active: bool,
    pub closed: bool,
    pub yes_price: Decimal,
    pub no_price: Decimal,
    /// Venue minimum notional per order, when the venue enforces one
    pub min_order_value: Option<Decimal>,
    pub updated_at: DateTime<Utc>,
}

impl Market {
    pub fn is_open(&self) -> bool {
        self.active && !self.closed
    }

    /// Current price of the given outcome side
    pub fn price_for(&self, outcome: Outcome) -> Decimal {
        match outcome {
            Outcome::Yes => self.yes_price,
            Outcome::No => self.no_price,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn market(active: bool, closed: bool) -> Market {
        Market {
            id: 1,
            external_condition_id: Some("0xabc".to_string()),
            question: "Will it rain tomorrow?".to_string(),
            active,
            closed,
            yes_price: dec!(0.62),
            no_price: dec!(0.38),
            min_order_value: None,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn open_requires_active_and_not_closed() {
        assert!(market(true, false).is_open());
        assert!(!market(false, false).is_open());
        assert!(!market(true, true).is_open());
        assert!(!market(false, true).is_open());
    }

    #[test]
    fn price_follows_outcome() {
        let m = market(true, false);
        assert_eq!(m.price_for(Outcome::Yes), dec!(0.62));
        assert_eq!(m.price_for(Outcome::No), dec!(0.38));
    }
}
