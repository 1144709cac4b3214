//! Price hub - normalization and fan-out
//!
//! Consumes raw feed events, maps feed keys onto canonical symbols, and
//! publishes each accepted trade four ways:
//!
//! 1. `latest_prices` KV hash, batched on a coalescing timer
//! 2. `ticks:{symbol}` KV ring, throttled per symbol
//! 3. the internal tick channel feeding the matching engine (lossless)
//! 4. the in-process bus, from which the WS broadcaster fans out under
//!    its own rate limit
//!
//! Consecutive identical prices on a symbol are suppressed before any of
//! the above. Depth snapshots are batched and written with a short TTL.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::bus::EventBus;
use crate::config::HubConfig;
use crate::core_types::SymbolKey;
use crate::feed::FeedEvent;
use crate::instruments::InstrumentRegistry;
use crate::kv::KvStore;
use crate::models::{DepthSnapshot, PricePoint, Tick};

pub struct PriceHub {
    registry: Arc<InstrumentRegistry>,
    kv: Arc<dyn KvStore>,
    bus: EventBus,
    cfg: HubConfig,
    /// Lossless tick path into the matching engine
    engine_tx: mpsc::Sender<Tick>,
    // Single-consumer working state; only the run loop touches these
    last_published: HashMap<SymbolKey, rust_decimal::Decimal>,
    pending_prices: HashMap<SymbolKey, PricePoint>,
    last_ring_push: HashMap<SymbolKey, Instant>,
    pending_depth: HashMap<SymbolKey, DepthSnapshot>,
}

impl PriceHub {
    pub fn new(
        registry: Arc<InstrumentRegistry>,
        kv: Arc<dyn KvStore>,
        bus: EventBus,
        cfg: HubConfig,
        engine_tx: mpsc::Sender<Tick>,
    ) -> Self {
        Self {
            registry,
            kv,
            bus,
            cfg,
            engine_tx,
            last_published: HashMap::new(),
            pending_prices: HashMap::new(),
            last_ring_push: HashMap::new(),
            pending_depth: HashMap::new(),
        }
    }

    /// Drain feed events until the feeds hang up
    pub async fn run(mut self, mut events: mpsc::Receiver<FeedEvent>) {
        let mut price_flush = tokio::time::interval(Duration::from_millis(self.cfg.price_flush_ms));
        let mut depth_flush = tokio::time::interval(Duration::from_millis(self.cfg.depth_batch_ms));
        tracing::info!("[PriceHub] Started");

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(FeedEvent::Trade { price_key, price, ts }) => {
                        self.on_trade(&price_key, price, ts).await;
                    }
                    Some(FeedEvent::Depth { price_key, bids, asks }) => {
                        self.on_depth(&price_key, bids, asks);
                    }
                    None => {
                        tracing::info!("[PriceHub] Feed channel closed, stopping");
                        return;
                    }
                },
                _ = price_flush.tick() => self.flush_prices().await,
                _ = depth_flush.tick() => self.flush_depth().await,
            }
        }
    }

    /// Canonical symbols served by a feed key (several symbols may share
    /// one upstream stream)
    fn symbols_for_key(&self, price_key: &str) -> Vec<SymbolKey> {
        self.registry
            .snapshot()
            .values()
            .filter(|c| c.price_key == price_key)
            .map(|c| c.symbol.clone())
            .collect()
    }

    async fn on_trade(&mut self, price_key: &str, price: rust_decimal::Decimal, ts: i64) {
        for symbol in self.symbols_for_key(price_key) {
            // No-op suppression: identical consecutive price on a symbol
            if self.last_published.get(&symbol) == Some(&price) {
                continue;
            }
            self.last_published.insert(symbol.clone(), price);

            // 1. Coalesce into the next latest_prices flush
            self.pending_prices
                .insert(symbol.clone(), PricePoint { price, ts });

            // 2. Tick-history ring, at most one push per symbol per window
            let due = self
                .last_ring_push
                .get(&symbol)
                .map(|at| at.elapsed() >= Duration::from_millis(self.cfg.tick_ring_throttle_ms))
                .unwrap_or(true);
            if due {
                self.last_ring_push.insert(symbol.clone(), Instant::now());
                if let Err(e) = self
                    .kv
                    .push_tick(&symbol, ts, price, self.cfg.tick_history_limit)
                    .await
                {
                    tracing::warn!(%symbol, "Tick ring push failed: {e}");
                }
            }

            let tick = Tick {
                symbol: symbol.clone(),
                price,
                ts,
            };

            // 3. The matching/risk path must never drop a tick: block on a
            // full channel rather than discard
            if self.engine_tx.send(tick.clone()).await.is_err() {
                tracing::error!("[PriceHub] Engine tick channel closed");
            }

            // 4. Observers (the WS broadcaster applies its own budget)
            self.bus.publish_tick(tick.clone());
            if let Ok(payload) = serde_json::to_string(&tick) {
                if let Err(e) = self.kv.publish("price_ticks", &payload).await {
                    tracing::warn!("KV publish price_ticks failed: {e}");
                }
            }
        }
    }

    fn on_depth(
        &mut self,
        price_key: &str,
        bids: Vec<(rust_decimal::Decimal, rust_decimal::Decimal)>,
        asks: Vec<(rust_decimal::Decimal, rust_decimal::Decimal)>,
    ) {
        let ts = chrono::Utc::now().timestamp_millis();
        for symbol in self.symbols_for_key(price_key) {
            self.pending_depth.insert(
                symbol.clone(),
                DepthSnapshot {
                    symbol,
                    bids: bids.clone(),
                    asks: asks.clone(),
                    ts,
                },
            );
        }
    }

    /// Write the coalesced latest-price batch
    async fn flush_prices(&mut self) {
        if self.pending_prices.is_empty() {
            return;
        }
        let batch: Vec<(SymbolKey, PricePoint)> = self.pending_prices.drain().collect();
        if let Err(e) = self.kv.set_latest_prices(&batch).await {
            tracing::warn!("latest_prices flush failed ({} entries): {e}", batch.len());
        }
    }

    /// Publish the freshest depth snapshot per symbol
    async fn flush_depth(&mut self) {
        if self.pending_depth.is_empty() {
            return;
        }
        for (symbol, depth) in std::mem::take(&mut self.pending_depth) {
            if let Err(e) = self.kv.set_orderbook(&depth, self.cfg.orderbook_ttl_secs).await {
                tracing::warn!(%symbol, "Depth snapshot write failed: {e}");
            }
            if let Ok(payload) = serde_json::to_string(&depth) {
                let channel = format!("orderbook_{}", symbol);
                if let Err(e) = self.kv.publish(&channel, &payload).await {
                    tracing::warn!(%symbol, "Depth publish failed: {e}");
                }
            }
            self.bus.publish_depth(depth);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::memory::MemoryKv;
    use rust_decimal_macros::dec;

    fn hub_with(
        cfg: HubConfig,
    ) -> (PriceHub, Arc<MemoryKv>, mpsc::Receiver<Tick>, EventBus) {
        let registry = Arc::new(InstrumentRegistry::with_defaults());
        let kv = Arc::new(MemoryKv::new());
        let bus = EventBus::new();
        let (tx, rx) = mpsc::channel(64);
        let hub = PriceHub::new(registry, kv.clone(), bus.clone(), cfg, tx);
        (hub, kv, rx, bus)
    }

    #[tokio::test]
    async fn test_trade_fans_out_to_engine_and_bus() {
        let (mut hub, _kv, mut engine_rx, bus) = hub_with(HubConfig::default());
        let mut bus_rx = bus.subscribe_ticks();

        hub.on_trade("btcusdt", dec!(30000), 1).await;

        // btcusdt serves both BTCUSD and BTCINR in the default table
        let mut symbols = vec![
            engine_rx.recv().await.unwrap().symbol,
            engine_rx.recv().await.unwrap().symbol,
        ];
        symbols.sort();
        assert_eq!(symbols, vec!["BTCINR", "BTCUSD"]);
        assert!(bus_rx.recv().await.is_ok());
    }

    #[tokio::test]
    async fn test_identical_consecutive_price_suppressed() {
        let (mut hub, _kv, mut engine_rx, _bus) = hub_with(HubConfig::default());

        hub.on_trade("ethusdt", dec!(2000), 1).await;
        hub.on_trade("ethusdt", dec!(2000), 2).await; // same price, skipped
        hub.on_trade("ethusdt", dec!(2001), 3).await;

        assert_eq!(engine_rx.recv().await.unwrap().ts, 1);
        assert_eq!(engine_rx.recv().await.unwrap().ts, 3);
        assert!(engine_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_tick_ring_throttled_per_symbol() {
        let (mut hub, kv, _engine_rx, _bus) = hub_with(HubConfig::default());

        hub.on_trade("ethusdt", dec!(2000), 1).await;
        hub.on_trade("ethusdt", dec!(2001), 2).await; // inside throttle window
        hub.on_trade("ethusdt", dec!(2002), 3).await;

        // Only the first made it into the ring
        assert_eq!(kv.tick_ring("ETHUSD").len(), 1);
    }

    #[tokio::test]
    async fn test_latest_prices_flush_holds_newest() {
        let (mut hub, kv, _engine_rx, _bus) = hub_with(HubConfig::default());

        hub.on_trade("ethusdt", dec!(2000), 1).await;
        hub.on_trade("ethusdt", dec!(2005), 2).await;
        hub.flush_prices().await;

        let prices = kv.get_latest_prices().await.unwrap();
        assert_eq!(prices["ETHUSD"].price, dec!(2005));
        assert_eq!(prices["ETHUSD"].ts, 2);
    }
}
