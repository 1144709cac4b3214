//! Matching engine
//!
//! Tick-driven execution against the shared trade state: limit fills,
//! SL/TP exits, fill execution with latency/spread/slippage/commission,
//! and trade closing. There is no counterparty book; every fill is
//! simulated against the live mark.
//!
//! Per-account fills and closes are serialized by an async mutex keyed by
//! account id. The fill path is the only critical section that spans a
//! suspension point (the execution-latency sleep), which is intentional:
//! two fills for one account must never interleave balance math.

pub mod engine;
pub mod fills;
pub mod orders;

use rust_decimal::Decimal;

pub use engine::MatchingEngine;
pub use orders::{OrderRequest, PlaceOutcome};

/// Synchronous price fallback for stale marks
///
/// Implemented by the upstream REST client; a test double stands in for
/// it in the suite.
#[async_trait::async_trait]
pub trait PriceFetcher: Send + Sync {
    /// Current price for an upstream feed key (e.g. `btcusdt`)
    async fn latest_price(&self, price_key: &str) -> anyhow::Result<Decimal>;
}
