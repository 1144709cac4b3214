//! Registry: canonical symbol resolution and contract lookup
//!
//! The contract table is replaced wholesale on every reload (RCU-style
//! atomic swap of an `Arc`), so readers on the tick path only clone an
//! `Arc` and never observe a half-updated table. A failed reload keeps
//! the previous snapshot.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use super::defaults::{builtin_aliases, builtin_contracts};
use super::models::{Contract, TradingHours};
use crate::core_types::SymbolKey;

/// How often the contract table is re-fetched from the store
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(600);

/// Normalize a raw symbol spelling into the canonical key
///
/// Case-insensitive; strips `:` and `_`; resolves the alias table; an
/// unknown spelling comes back uppercased as-is so the caller can still
/// reject it against the contract table.
pub fn normalize_symbol(raw: &str, aliases: &HashMap<String, SymbolKey>) -> SymbolKey {
    let stripped: String = raw
        .trim()
        .chars()
        .filter(|c| *c != ':' && *c != '_')
        .collect::<String>()
        .to_uppercase();

    match aliases.get(&stripped) {
        Some(canonical) => canonical.clone(),
        None => stripped,
    }
}

/// Process-wide instrument registry
pub struct InstrumentRegistry {
    table: RwLock<Arc<HashMap<SymbolKey, Contract>>>,
    aliases: HashMap<String, SymbolKey>,
}

impl InstrumentRegistry {
    /// Registry seeded with the built-in table only (no store yet)
    pub fn with_defaults() -> Self {
        let mut table = HashMap::new();
        for c in builtin_contracts() {
            table.insert(c.symbol.clone(), c);
        }
        let aliases = builtin_aliases()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        Self {
            table: RwLock::new(Arc::new(table)),
            aliases,
        }
    }

    pub fn normalize(&self, raw: &str) -> SymbolKey {
        normalize_symbol(raw, &self.aliases)
    }

    /// Contract lookup by any spelling; `None` means unknown instrument
    pub fn get_contract(&self, symbol: &str) -> Option<Contract> {
        let key = self.normalize(symbol);
        self.snapshot().get(&key).cloned()
    }

    /// Cheap read: clone of the current table `Arc`
    pub fn snapshot(&self) -> Arc<HashMap<SymbolKey, Contract>> {
        self.table.read().expect("registry lock poisoned").clone()
    }

    /// Whether the instrument is inside its trading window at `now`
    ///
    /// Unknown symbols and instruments without a window are always open;
    /// the unknown-symbol rejection happens elsewhere.
    pub fn is_within_trading_hours(&self, symbol: &str, now: DateTime<Utc>) -> bool {
        match self.get_contract(symbol) {
            Some(c) => match c.trading_hours {
                Some(hours) => hours.contains(now),
                None => true,
            },
            None => true,
        }
    }

    /// Install freshly loaded rows, merged over the built-in defaults
    ///
    /// Malformed rows are dropped with a warning rather than poisoning the
    /// table.
    pub fn install(&self, rows: Vec<Contract>) {
        let mut table: HashMap<SymbolKey, Contract> = HashMap::new();
        for c in builtin_contracts() {
            table.insert(c.symbol.clone(), c);
        }
        for c in rows {
            if !c.is_well_formed() {
                tracing::warn!(symbol = %c.symbol, "Dropping malformed instrument row");
                continue;
            }
            table.insert(c.symbol.clone(), c);
        }

        let count = table.len();
        *self.table.write().expect("registry lock poisoned") = Arc::new(table);
        tracing::info!(instruments = count, "Instrument table installed");
    }

    /// Load active rows from the store and swap them in
    ///
    /// Fails softly: on store errors the previous snapshot stays.
    pub async fn reload_from_store(&self, pool: &PgPool) {
        match load_active(pool).await {
            Ok(rows) => self.install(rows),
            Err(e) => {
                tracing::warn!("Instrument reload failed, keeping previous table: {e:#}");
            }
        }
    }

    /// Background refresh on a coarse timer
    pub async fn refresh_loop(self: Arc<Self>, pool: PgPool) {
        let mut tick = tokio::time::interval(REFRESH_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            self.reload_from_store(&pool).await;
        }
    }
}

/// Fetch active instrument rows
async fn load_active(pool: &PgPool) -> Result<Vec<Contract>, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT symbol, display, price_key, qty_step, min_qty, tick_value,
                  convert_to_inr, max_lots_evaluation, max_lots_funded,
                  session_start_hour, session_end_hour, session_utc_offset_minutes,
                  daily_loss_limit, commission, spread,
                  allow_partial_fills, partial_fill_ratio
           FROM instruments WHERE active = TRUE"#,
    )
    .fetch_all(pool)
    .await?;

    let contracts = rows
        .into_iter()
        .map(|r| {
            let trading_hours = match (
                r.get::<Option<i32>, _>("session_start_hour"),
                r.get::<Option<i32>, _>("session_end_hour"),
            ) {
                (Some(start), Some(end)) => Some(TradingHours {
                    start_hour: start as u32,
                    end_hour: end as u32,
                    utc_offset_minutes: r
                        .get::<Option<i32>, _>("session_utc_offset_minutes")
                        .unwrap_or(0),
                }),
                _ => None,
            };

            Contract {
                symbol: r.get("symbol"),
                display: r.get("display"),
                price_key: r.get("price_key"),
                qty_step: r.get("qty_step"),
                min_qty: r.get("min_qty"),
                tick_value: r.get("tick_value"),
                convert_to_inr: r.get("convert_to_inr"),
                max_lots_evaluation: r.get("max_lots_evaluation"),
                max_lots_funded: r.get("max_lots_funded"),
                trading_hours,
                daily_loss_limit: r.get("daily_loss_limit"),
                commission: r.get("commission"),
                spread: r.get("spread"),
                allow_partial_fills: r.get("allow_partial_fills"),
                partial_fill_ratio: r.get("partial_fill_ratio"),
            }
        })
        .collect();

    Ok(contracts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_separators_and_uppercases() {
        let reg = InstrumentRegistry::with_defaults();
        assert_eq!(reg.normalize("btc_usd"), "BTCUSD");
        assert_eq!(reg.normalize("BTC:USD"), "BTCUSD");
        assert_eq!(reg.normalize(" ethusd "), "ETHUSD");
    }

    #[test]
    fn test_normalize_resolves_aliases() {
        let reg = InstrumentRegistry::with_defaults();
        assert_eq!(reg.normalize("btcusdt"), "BTCUSD");
        assert_eq!(reg.normalize("XBT_USD"), "BTCUSD");
    }

    #[test]
    fn test_normalize_passes_unknown_through_uppercased() {
        let reg = InstrumentRegistry::with_defaults();
        assert_eq!(reg.normalize("doge_usd"), "DOGEUSD");
        // ...and the contract lookup then rejects it
        assert!(reg.get_contract("doge_usd").is_none());
    }

    #[test]
    fn test_install_merges_over_defaults() {
        let reg = InstrumentRegistry::with_defaults();
        let defaults = reg.snapshot().len();

        // Override one default and add one new symbol
        let mut custom = builtin_contracts();
        let mut btc = custom.remove(0);
        assert_eq!(btc.symbol, "BTCUSD");
        btc.commission = rust_decimal::Decimal::from(75);
        let mut doge = btc.clone();
        doge.symbol = "DOGEUSD".to_string();

        reg.install(vec![btc, doge]);

        let table = reg.snapshot();
        assert_eq!(table.len(), defaults + 1);
        assert_eq!(
            table.get("BTCUSD").unwrap().commission,
            rust_decimal::Decimal::from(75)
        );
        assert!(table.contains_key("DOGEUSD"));
    }

    #[test]
    fn test_install_drops_malformed_rows() {
        let reg = InstrumentRegistry::with_defaults();
        let mut bad = builtin_contracts().remove(0);
        bad.symbol = "BADUSD".to_string();
        bad.min_qty = rust_decimal::Decimal::ZERO;

        reg.install(vec![bad]);
        assert!(reg.get_contract("BADUSD").is_none());
    }
}
