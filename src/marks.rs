//! In-memory mark store - latest accepted price per symbol
//!
//! Written by the matching engine on every accepted tick, read by fills,
//! risk evaluation, the welcome snapshot and `GET /prices`. Keeps the
//! previous distinct price alongside the current one for the slippage gap.

use std::collections::HashMap;
use std::sync::RwLock;

use rust_decimal::Decimal;

use crate::core_types::{EpochMs, SymbolKey};
use crate::models::PricePoint;

#[derive(Debug, Clone, Copy)]
pub struct Mark {
    pub price: Decimal,
    pub ts: EpochMs,
    /// The mark this one replaced, if any
    pub prev_price: Option<Decimal>,
}

#[derive(Default)]
pub struct MarkStore {
    inner: RwLock<HashMap<SymbolKey, Mark>>,
}

impl MarkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new mark, returning the replaced price
    pub fn set(&self, symbol: &SymbolKey, price: Decimal, ts: EpochMs) -> Option<Decimal> {
        let mut inner = self.inner.write().expect("mark store lock poisoned");
        let prev = inner.get(symbol).map(|m| m.price);
        inner.insert(
            symbol.clone(),
            Mark {
                price,
                ts,
                prev_price: prev,
            },
        );
        prev
    }

    pub fn get(&self, symbol: &str) -> Option<Mark> {
        self.inner
            .read()
            .expect("mark store lock poisoned")
            .get(symbol)
            .copied()
    }

    /// Latest price as the KV/wire shape
    pub fn price_point(&self, symbol: &str) -> Option<PricePoint> {
        self.get(symbol).map(|m| PricePoint {
            price: m.price,
            ts: m.ts,
        })
    }

    /// Full snapshot for the welcome message and `GET /prices`
    pub fn snapshot(&self) -> HashMap<SymbolKey, PricePoint> {
        self.inner
            .read()
            .expect("mark store lock poisoned")
            .iter()
            .map(|(symbol, m)| {
                (
                    symbol.clone(),
                    PricePoint {
                        price: m.price,
                        ts: m.ts,
                    },
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_set_tracks_previous_price() {
        let marks = MarkStore::new();
        let symbol = "BTCUSD".to_string();

        assert_eq!(marks.set(&symbol, dec!(30000), 1), None);
        assert_eq!(marks.set(&symbol, dec!(30010), 2), Some(dec!(30000)));

        let mark = marks.get("BTCUSD").unwrap();
        assert_eq!(mark.price, dec!(30010));
        assert_eq!(mark.prev_price, Some(dec!(30000)));
        assert_eq!(mark.ts, 2);
    }

    #[test]
    fn test_snapshot_contains_all_symbols() {
        let marks = MarkStore::new();
        marks.set(&"BTCUSD".to_string(), dec!(30000), 1);
        marks.set(&"ETHUSD".to_string(), dec!(2000), 1);

        let snap = marks.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap["ETHUSD"].price, dec!(2000));
    }
}
