//! In-memory KV store
//!
//! Mirrors the Redis layout for tests and DB-less development. TTLs are
//! honored by storing an expiry instant and filtering on read.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;

use super::{AUDIT_RING_CAP, KvStore};
use crate::core_types::{EpochMs, OrderId, SymbolKey};
use crate::models::{DepthSnapshot, PricePoint};

#[derive(Default)]
struct Inner {
    latest_prices: HashMap<SymbolKey, PricePoint>,
    ticks: HashMap<SymbolKey, VecDeque<(EpochMs, rust_decimal::Decimal)>>,
    orderbooks: HashMap<SymbolKey, (DepthSnapshot, Instant)>,
    idem: HashMap<String, (OrderId, Instant)>,
    audit: VecDeque<serde_json::Value>,
    published: Vec<(String, String)>,
}

#[derive(Default)]
pub struct MemoryKv {
    inner: Mutex<Inner>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("memory kv lock poisoned")
    }

    /// Test helper: tick ring contents, newest first
    pub fn tick_ring(&self, symbol: &str) -> Vec<(EpochMs, rust_decimal::Decimal)> {
        self.lock()
            .ticks
            .get(symbol)
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Test helper: everything published on a channel
    pub fn published_on(&self, channel: &str) -> Vec<String> {
        self.lock()
            .published
            .iter()
            .filter(|(c, _)| c == channel)
            .map(|(_, p)| p.clone())
            .collect()
    }

    /// Test helper: audit ring contents, newest first
    pub fn audit_entries(&self) -> Vec<serde_json::Value> {
        self.lock().audit.iter().cloned().collect()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn set_latest_prices(&self, entries: &[(SymbolKey, PricePoint)]) -> Result<()> {
        let mut inner = self.lock();
        for (symbol, point) in entries {
            inner.latest_prices.insert(symbol.clone(), *point);
        }
        Ok(())
    }

    async fn get_latest_prices(&self) -> Result<HashMap<SymbolKey, PricePoint>> {
        Ok(self.lock().latest_prices.clone())
    }

    async fn push_tick(
        &self,
        symbol: &SymbolKey,
        ts: EpochMs,
        price: rust_decimal::Decimal,
        cap: usize,
    ) -> Result<()> {
        let mut inner = self.lock();
        let ring = inner.ticks.entry(symbol.clone()).or_default();
        ring.push_front((ts, price));
        ring.truncate(cap);
        Ok(())
    }

    async fn set_orderbook(&self, depth: &DepthSnapshot, ttl_secs: u64) -> Result<()> {
        let expires = Instant::now() + Duration::from_secs(ttl_secs);
        self.lock()
            .orderbooks
            .insert(depth.symbol.clone(), (depth.clone(), expires));
        Ok(())
    }

    async fn get_orderbook(&self, symbol: &SymbolKey) -> Result<Option<DepthSnapshot>> {
        let inner = self.lock();
        Ok(inner
            .orderbooks
            .get(symbol)
            .filter(|(_, expires)| *expires > Instant::now())
            .map(|(depth, _)| depth.clone()))
    }

    async fn idem_claim(
        &self,
        key: &str,
        order_id: &OrderId,
        ttl_secs: u64,
    ) -> Result<Option<OrderId>> {
        let mut inner = self.lock();
        let now = Instant::now();
        if let Some((existing, expires)) = inner.idem.get(key) {
            if *expires > now {
                return Ok(Some(existing.clone()));
            }
        }
        inner.idem.insert(
            key.to_string(),
            (order_id.clone(), now + Duration::from_secs(ttl_secs)),
        );
        Ok(None)
    }

    async fn push_audit(&self, entry: serde_json::Value) -> Result<()> {
        let mut inner = self.lock();
        inner.audit.push_front(entry);
        inner.audit.truncate(AUDIT_RING_CAP);
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        self.lock()
            .published
            .push((channel.to_string(), payload.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_tick_ring_trims_to_cap() {
        let kv = MemoryKv::new();
        let symbol = "BTCUSD".to_string();
        for i in 0..10 {
            kv.push_tick(&symbol, i, dec!(100) + rust_decimal::Decimal::from(i), 5)
                .await
                .unwrap();
        }
        let ring = kv.tick_ring("BTCUSD");
        assert_eq!(ring.len(), 5);
        // Newest first
        assert_eq!(ring[0].0, 9);
        assert_eq!(ring[4].0, 5);
    }

    #[tokio::test]
    async fn test_idem_claim_returns_existing_within_ttl() {
        let kv = MemoryKv::new();
        let first = kv.idem_claim("k1", &"order-1".to_string(), 300).await.unwrap();
        assert!(first.is_none());

        let second = kv.idem_claim("k1", &"order-2".to_string(), 300).await.unwrap();
        assert_eq!(second, Some("order-1".to_string()));
    }

    #[tokio::test]
    async fn test_orderbook_ttl_expiry() {
        let kv = MemoryKv::new();
        let depth = DepthSnapshot {
            symbol: "BTCUSD".into(),
            bids: vec![(dec!(29999), dec!(1))],
            asks: vec![(dec!(30001), dec!(1))],
            ts: 1,
        };
        kv.set_orderbook(&depth, 0).await.unwrap();
        assert!(kv.get_orderbook(&"BTCUSD".to_string()).await.unwrap().is_none());

        kv.set_orderbook(&depth, 10).await.unwrap();
        assert!(kv.get_orderbook(&"BTCUSD".to_string()).await.unwrap().is_some());
    }
}
