//! Built-in contract table
//!
//! Fallback metadata merged under whatever the store returns, so a symbol
//! the platform lists but has not yet configured still trades with sane
//! lot rules and costs.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::models::{Contract, TradingHours};

fn crypto(symbol: &str, display: &str, price_key: &str, commission: Decimal, spread: Decimal) -> Contract {
    Contract {
        symbol: symbol.to_string(),
        display: display.to_string(),
        price_key: price_key.to_string(),
        qty_step: dec!(0.01),
        min_qty: dec!(0.01),
        tick_value: Decimal::ONE,
        convert_to_inr: false,
        max_lots_evaluation: dec!(5),
        max_lots_funded: dec!(10),
        trading_hours: None, // crypto trades around the clock
        daily_loss_limit: dec!(2500),
        commission,
        spread,
        allow_partial_fills: None,
        partial_fill_ratio: None,
    }
}

/// The default table, keyed by canonical symbol
pub fn builtin_contracts() -> Vec<Contract> {
    vec![
        crypto("BTCUSD", "Bitcoin", "btcusdt", dec!(50), dec!(5)),
        crypto("ETHUSD", "Ethereum", "ethusdt", dec!(10), dec!(0.5)),
        crypto("SOLUSD", "Solana", "solusdt", dec!(1), dec!(0.05)),
        Contract {
            symbol: "BTCINR".to_string(),
            display: "Bitcoin (INR)".to_string(),
            price_key: "btcusdt".to_string(),
            qty_step: dec!(0.01),
            min_qty: dec!(0.01),
            tick_value: Decimal::ONE,
            convert_to_inr: true,
            max_lots_evaluation: dec!(5),
            max_lots_funded: dec!(10),
            // INR contracts follow the local session
            trading_hours: Some(TradingHours {
                start_hour: 9,
                end_hour: 23,
                utc_offset_minutes: 330,
            }),
            daily_loss_limit: dec!(200_000),
            commission: dec!(4000),
            spread: dec!(400),
            allow_partial_fills: None,
            partial_fill_ratio: None,
        },
    ]
}

/// Symbol aliases resolved by `normalize_symbol`
///
/// Keys are post-strip uppercase inputs; values are canonical keys.
pub fn builtin_aliases() -> Vec<(&'static str, &'static str)> {
    vec![
        ("BTCUSDT", "BTCUSD"),
        ("XBTUSD", "BTCUSD"),
        ("ETHUSDT", "ETHUSD"),
        ("SOLUSDT", "SOLUSD"),
    ]
}
