//! Redis-backed KV store

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;

use super::{AUDIT_RING_CAP, KvStore};
use crate::core_types::{EpochMs, OrderId, SymbolKey};
use crate::models::{DepthSnapshot, PricePoint};

/// Redis KV store on a shared multiplexed connection
#[derive(Clone)]
pub struct RedisKv {
    conn: MultiplexedConnection,
}

impl RedisKv {
    /// Connect using the configured URL
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        tracing::info!("Redis connection established");
        Ok(Self { conn })
    }

    fn conn(&self) -> MultiplexedConnection {
        self.conn.clone()
    }
}

#[async_trait]
impl KvStore for RedisKv {
    async fn set_latest_prices(&self, entries: &[(SymbolKey, PricePoint)]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        for (symbol, point) in entries {
            pipe.hset("latest_prices", symbol, serde_json::to_string(point)?)
                .ignore();
        }
        let _: () = pipe.query_async(&mut self.conn()).await?;
        Ok(())
    }

    async fn get_latest_prices(&self) -> Result<HashMap<SymbolKey, PricePoint>> {
        let raw: HashMap<String, String> = self.conn().hgetall("latest_prices").await?;
        let mut out = HashMap::with_capacity(raw.len());
        for (symbol, json) in raw {
            match serde_json::from_str::<PricePoint>(&json) {
                Ok(point) => {
                    out.insert(symbol, point);
                }
                Err(e) => tracing::warn!(%symbol, "Skipping unparseable latest_prices entry: {e}"),
            }
        }
        Ok(out)
    }

    async fn push_tick(
        &self,
        symbol: &SymbolKey,
        ts: EpochMs,
        price: rust_decimal::Decimal,
        cap: usize,
    ) -> Result<()> {
        let key = format!("ticks:{}", symbol);
        let entry = serde_json::json!({ "ts": ts, "price": price }).to_string();
        let mut pipe = redis::pipe();
        pipe.lpush(&key, entry)
            .ignore()
            .ltrim(&key, 0, cap as isize - 1)
            .ignore();
        let _: () = pipe.query_async(&mut self.conn()).await?;
        Ok(())
    }

    async fn set_orderbook(&self, depth: &DepthSnapshot, ttl_secs: u64) -> Result<()> {
        let key = format!("orderbook:{}", depth.symbol);
        let _: () = self
            .conn()
            .set_ex(key, serde_json::to_string(depth)?, ttl_secs)
            .await?;
        Ok(())
    }

    async fn get_orderbook(&self, symbol: &SymbolKey) -> Result<Option<DepthSnapshot>> {
        let raw: Option<String> = self.conn().get(format!("orderbook:{}", symbol)).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn idem_claim(
        &self,
        key: &str,
        order_id: &OrderId,
        ttl_secs: u64,
    ) -> Result<Option<OrderId>> {
        let full_key = format!("idem:{}", key);
        // SET NX EX: only the first claim inside the TTL wins
        let claimed: Option<String> = redis::cmd("SET")
            .arg(&full_key)
            .arg(order_id)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut self.conn())
            .await?;

        if claimed.is_some() {
            return Ok(None);
        }
        let existing: Option<String> = self.conn().get(&full_key).await?;
        Ok(existing)
    }

    async fn push_audit(&self, entry: serde_json::Value) -> Result<()> {
        let mut pipe = redis::pipe();
        pipe.lpush("audit:orders", entry.to_string())
            .ignore()
            .ltrim("audit:orders", 0, AUDIT_RING_CAP as isize - 1)
            .ignore();
        let _: () = pipe.query_async(&mut self.conn()).await?;
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let _: () = self.conn().publish(channel, payload).await?;
        Ok(())
    }
}
