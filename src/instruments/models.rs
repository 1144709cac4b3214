//! Contract metadata for a tradeable instrument

use chrono::{DateTime, FixedOffset, Timelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core_types::SymbolKey;
use crate::models::AccountTier;

/// Daily trading window in a declared fixed offset
///
/// `start_hour > end_hour` means the window wraps midnight (e.g. 20 -> 4).
/// Hours are compared in the instrument's own offset, not the server's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradingHours {
    pub start_hour: u32,
    pub end_hour: u32,
    /// Offset from UTC in minutes (e.g. +330 for IST)
    pub utc_offset_minutes: i32,
}

impl TradingHours {
    /// Whether `now` falls inside the window
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        let offset = FixedOffset::east_opt(self.utc_offset_minutes * 60)
            .unwrap_or_else(|| FixedOffset::east_opt(0).unwrap());
        let hour = now.with_timezone(&offset).hour();

        if self.start_hour <= self.end_hour {
            hour >= self.start_hour && hour < self.end_hour
        } else {
            // Wrap-around window, e.g. 20:00 -> 04:00
            hour >= self.start_hour || hour < self.end_hour
        }
    }
}

/// Per-symbol contract metadata
///
/// Invariants: `min_qty > 0`, `qty_step > 0`, `min_qty` is an integer
/// multiple of `qty_step`. Rows violating these are dropped at load time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contract {
    /// Canonical symbol key, e.g. `BTCUSD`
    pub symbol: SymbolKey,
    /// Human-readable name for client display
    pub display: String,
    /// Upstream feed identifier, e.g. `btcusdt`
    pub price_key: String,
    pub qty_step: Decimal,
    pub min_qty: Decimal,
    /// Money per unit price movement per unit quantity
    pub tick_value: Decimal,
    /// Multiply fill prices by the USDINR reference quote
    pub convert_to_inr: bool,
    pub max_lots_evaluation: Decimal,
    pub max_lots_funded: Decimal,
    /// None = tradeable around the clock
    pub trading_hours: Option<TradingHours>,
    pub daily_loss_limit: Decimal,
    /// Money per unit quantity, debited at entry
    pub commission: Decimal,
    /// Fixed adverse price adjustment on fills, in price units
    pub spread: Decimal,
    pub allow_partial_fills: Option<bool>,
    pub partial_fill_ratio: Option<f64>,
}

impl Contract {
    /// Tier-gated lot cap
    pub fn max_lots(&self, tier: AccountTier) -> Decimal {
        match tier {
            AccountTier::Evaluation => self.max_lots_evaluation,
            AccountTier::Funded => self.max_lots_funded,
        }
    }

    /// Lot-size validity: at least `min_qty` and a whole number of steps
    pub fn valid_quantity(&self, qty: Decimal) -> bool {
        if qty < self.min_qty || self.qty_step <= Decimal::ZERO {
            return false;
        }
        (qty % self.qty_step).is_zero()
    }

    /// Metadata sanity, enforced at load
    pub fn is_well_formed(&self) -> bool {
        self.min_qty > Decimal::ZERO
            && self.qty_step > Decimal::ZERO
            && (self.min_qty % self.qty_step).is_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn contract(min_qty: Decimal, qty_step: Decimal) -> Contract {
        Contract {
            symbol: "BTCUSD".into(),
            display: "Bitcoin".into(),
            price_key: "btcusdt".into(),
            qty_step,
            min_qty,
            tick_value: Decimal::ONE,
            convert_to_inr: false,
            max_lots_evaluation: dec!(5),
            max_lots_funded: dec!(10),
            trading_hours: None,
            daily_loss_limit: dec!(1000),
            commission: dec!(50),
            spread: dec!(5),
            allow_partial_fills: None,
            partial_fill_ratio: None,
        }
    }

    #[test]
    fn test_valid_quantity_boundaries() {
        let c = contract(dec!(0.01), dec!(0.01));

        // Exactly min_qty is accepted; one step below is not
        assert!(c.valid_quantity(dec!(0.01)));
        assert!(!c.valid_quantity(dec!(0.00)));
        assert!(c.valid_quantity(dec!(0.05)));

        // Off-step quantity rejected
        assert!(!c.valid_quantity(dec!(0.015)));
    }

    #[test]
    fn test_well_formed_requires_step_multiple() {
        assert!(contract(dec!(0.01), dec!(0.01)).is_well_formed());
        assert!(!contract(dec!(0.015), dec!(0.01)).is_well_formed());
        assert!(!contract(dec!(0), dec!(0.01)).is_well_formed());
    }

    #[test]
    fn test_trading_hours_plain_window() {
        let hours = TradingHours {
            start_hour: 9,
            end_hour: 17,
            utc_offset_minutes: 0,
        };
        let at = |h| Utc.with_ymd_and_hms(2025, 6, 2, h, 30, 0).unwrap();

        assert!(hours.contains(at(9)));
        assert!(hours.contains(at(16)));
        assert!(!hours.contains(at(17)));
        assert!(!hours.contains(at(3)));
    }

    #[test]
    fn test_trading_hours_wraps_midnight() {
        let hours = TradingHours {
            start_hour: 20,
            end_hour: 4,
            utc_offset_minutes: 0,
        };
        let at = |h| Utc.with_ymd_and_hms(2025, 6, 2, h, 0, 0).unwrap();

        assert!(hours.contains(at(23)));
        assert!(hours.contains(at(2)));
        assert!(!hours.contains(at(12)));
        assert!(!hours.contains(at(4)));
    }

    #[test]
    fn test_trading_hours_respects_offset() {
        // 9-17 at UTC+5:30; 04:00 UTC is 09:30 local -> open
        let hours = TradingHours {
            start_hour: 9,
            end_hour: 17,
            utc_offset_minutes: 330,
        };
        let at = |h| Utc.with_ymd_and_hms(2025, 6, 2, h, 0, 0).unwrap();
        assert!(hours.contains(at(4)));
        assert!(!hours.contains(at(12))); // 17:30 local -> closed
    }
}
