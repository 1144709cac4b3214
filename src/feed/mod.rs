//! Upstream exchange feeds
//!
//! One supervised WebSocket connection per upstream stream: a trade
//! stream and a depth10@100ms depth stream per feed key. Connections
//! reconnect with capped exponential backoff and carry an idle watchdog
//! that forces a reconnect when the exchange goes quiet.

pub mod client;
pub mod parser;
pub mod rest;

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::{FeedConfig, HubConfig};
use crate::core_types::EpochMs;
use crate::instruments::InstrumentRegistry;

pub use client::FeedConnection;
pub use rest::RestPriceFetcher;

/// A normalized event off an upstream stream, keyed by the feed key (the
/// exchange's spelling); the hub maps it onto canonical symbols.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    Trade {
        price_key: String,
        price: rust_decimal::Decimal,
        ts: EpochMs,
    },
    Depth {
        price_key: String,
        bids: Vec<(rust_decimal::Decimal, rust_decimal::Decimal)>,
        asks: Vec<(rust_decimal::Decimal, rust_decimal::Decimal)>,
    },
}

/// Spawn trade + depth connections for every distinct feed key
pub fn spawn_feeds(
    feed_cfg: &FeedConfig,
    hub_cfg: &HubConfig,
    registry: &Arc<InstrumentRegistry>,
    events: mpsc::Sender<FeedEvent>,
) -> Vec<tokio::task::JoinHandle<()>> {
    let keys: HashSet<String> = registry
        .snapshot()
        .values()
        .map(|c| c.price_key.clone())
        .collect();

    let mut handles = Vec::new();
    for key in keys {
        let trade_url = format!("{}/{}@trade", feed_cfg.ws_base, key);
        handles.push(FeedConnection::spawn(
            trade_url,
            key.clone(),
            hub_cfg.feed_idle_secs,
            parser::parse_trade,
            events.clone(),
        ));

        let depth_url = format!("{}/{}@depth10@100ms", feed_cfg.ws_base, key);
        handles.push(FeedConnection::spawn(
            depth_url,
            key,
            hub_cfg.feed_idle_secs,
            parser::parse_depth,
            events.clone(),
        ));
    }
    handles
}
