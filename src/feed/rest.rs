//! REST fallback price fetch
//!
//! Market orders against a stale mark try one synchronous fetch of the
//! current upstream price before giving up with `NO_LIVE_PRICE`.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;

use crate::matching::PriceFetcher;

#[derive(Debug, Deserialize)]
struct TickerPrice {
    price: Decimal,
}

pub struct RestPriceFetcher {
    client: reqwest::Client,
    base: String,
}

impl RestPriceFetcher {
    pub fn new(base: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(3))
            .build()
            .expect("reqwest client");
        Self {
            client,
            base: base.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait::async_trait]
impl PriceFetcher for RestPriceFetcher {
    async fn latest_price(&self, price_key: &str) -> Result<Decimal> {
        let url = format!(
            "{}/api/v3/ticker/price?symbol={}",
            self.base,
            price_key.to_uppercase()
        );
        let ticker: TickerPrice = self
            .client
            .get(&url)
            .send()
            .await
            .context("fallback price request")?
            .error_for_status()
            .context("fallback price status")?
            .json()
            .await
            .context("fallback price body")?;

        Ok(ticker.price)
    }
}
