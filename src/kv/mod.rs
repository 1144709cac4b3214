//! KV store layer (tick cache, depth snapshots, idempotency, audit ring)
//!
//! The trait abstracts the Redis layout so the engine and hub can run
//! against an in-memory double in tests and DB-less dev. Layout:
//!
//! - hash `latest_prices`, field `{symbol}` -> JSON `{price, ts}`
//! - list `ticks:{symbol}`, left-pushed, trimmed to the ring cap
//! - key  `orderbook:{symbol}` -> JSON snapshot, short TTL
//! - key  `idem:{key}` -> order id, idempotency window TTL
//! - list `audit:orders`, left-pushed, trimmed to 10 000
//! - channels `price_ticks`, `orderbook_{symbol}`, `trade_events`,
//!   `order_events` mirroring the in-process bus for external observers
//!
//! KV failures are infrastructure: callers log and continue, they never
//! surface to users.

pub mod memory;
pub mod redis_kv;

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;

use crate::core_types::{EpochMs, OrderId, SymbolKey};
use crate::models::{DepthSnapshot, PricePoint};

/// Cap of the `audit:orders` ring
pub const AUDIT_RING_CAP: usize = 10_000;

#[async_trait]
pub trait KvStore: Send + Sync {
    /// Write a batch of latest-price entries into the hash
    async fn set_latest_prices(&self, entries: &[(SymbolKey, PricePoint)]) -> Result<()>;

    /// Read the whole latest-price hash
    async fn get_latest_prices(&self) -> Result<HashMap<SymbolKey, PricePoint>>;

    /// Left-push one tick into the per-symbol ring and trim to `cap`
    async fn push_tick(
        &self,
        symbol: &SymbolKey,
        ts: EpochMs,
        price: rust_decimal::Decimal,
        cap: usize,
    ) -> Result<()>;

    /// Store a depth snapshot with a TTL
    async fn set_orderbook(&self, depth: &DepthSnapshot, ttl_secs: u64) -> Result<()>;

    async fn get_orderbook(&self, symbol: &SymbolKey) -> Result<Option<DepthSnapshot>>;

    /// Claim an idempotency key for `order_id`
    ///
    /// Returns `None` when the claim is fresh, or the previously stored
    /// order id when the key was already claimed inside its TTL.
    async fn idem_claim(
        &self,
        key: &str,
        order_id: &OrderId,
        ttl_secs: u64,
    ) -> Result<Option<OrderId>>;

    /// Left-push an audit record onto `audit:orders`
    async fn push_audit(&self, entry: serde_json::Value) -> Result<()>;

    /// Fire-and-forget publish on a KV channel
    async fn publish(&self, channel: &str, payload: &str) -> Result<()>;
}
