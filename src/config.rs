use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;

/// Top-level application configuration
///
/// Loaded from `config/{env}.yaml`, then overridden by environment
/// variables, then validated. Every tuning knob has a default so a missing
/// section never prevents boot; unknown values fall back and are logged
/// once at startup.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    /// PostgreSQL connection URL for the durable store
    #[serde(default)]
    pub postgres_url: Option<String>,
    /// Redis connection URL for the KV layer
    #[serde(default)]
    pub redis_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Static API key required on WebSocket upgrade (and non-dev boots)
    #[serde(default)]
    pub feed_api_key: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4000,
            feed_api_key: None,
        }
    }
}

/// Upstream exchange feed endpoints
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FeedConfig {
    /// Base WS URL; streams are appended as `/{pair}@trade` etc.
    pub ws_base: String,
    /// REST base used for the stale-price fallback fetch
    pub rest_base: String,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            ws_base: "wss://stream.binance.com:9443/ws".to_string(),
            rest_base: "https://api.binance.com".to_string(),
        }
    }
}

/// Price hub tuning
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HubConfig {
    /// Process-wide WS broadcast budget per second
    pub max_broadcast_tps: u32,
    /// Cap of the per-symbol KV tick ring
    pub tick_history_limit: usize,
    /// Coalescing window for the latest-price hash write
    pub price_flush_ms: u64,
    /// Minimum interval between tick-ring pushes per symbol
    pub tick_ring_throttle_ms: u64,
    /// Depth snapshot TTL in the KV store
    pub orderbook_ttl_secs: u64,
    /// Depth re-publish batching window
    pub depth_batch_ms: u64,
    /// Client heartbeat interval; a missed pong terminates the socket
    pub heartbeat_secs: u64,
    /// Per-client send buffer cap before messages are skipped
    pub client_buffer_limit_bytes: usize,
    /// Feed watchdog: force-reconnect after this long without a message
    pub feed_idle_secs: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_broadcast_tps: 20,
            tick_history_limit: 1000,
            price_flush_ms: 200,
            tick_ring_throttle_ms: 1000,
            orderbook_ttl_secs: 10,
            depth_batch_ms: 500,
            heartbeat_secs: 25,
            client_buffer_limit_bytes: 1024 * 1024,
            feed_idle_secs: 15,
        }
    }
}

/// Matching / risk engine tuning
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EngineConfig {
    /// Artificial latency applied to every fill
    pub execution_latency_ms: u64,
    /// A trade younger than this cannot be closed by SL/TP
    pub sltp_grace_ms: i64,
    /// A mark older than this is stale for market orders
    pub price_stale_ms: i64,
    /// Window of the duplicate-order suppression set
    pub duplicate_order_ms: u64,
    /// Idempotency-key TTL in the KV store, seconds
    pub idempotency_ttl_secs: u64,
    pub enable_partial_fills: bool,
    /// Fraction of the requested quantity filled per slice
    pub partial_fill_ratio: f64,
    /// Draw the per-fill ratio uniformly from [partial_fill_ratio, 1.0]
    /// instead of using it verbatim
    pub partial_fill_random: bool,
    /// Cap on the per-fill slippage, in price units
    pub max_slippage: rust_decimal::Decimal,
    /// USDINR quote applied when no live FX mark exists
    pub usd_inr_fallback: rust_decimal::Decimal,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            execution_latency_ms: 150,
            sltp_grace_ms: 1000,
            price_stale_ms: 5000,
            duplicate_order_ms: 500,
            idempotency_ttl_secs: 300,
            enable_partial_fills: false,
            partial_fill_ratio: 0.5,
            partial_fill_random: false,
            max_slippage: rust_decimal::Decimal::from(5),
            usd_inr_fallback: rust_decimal::Decimal::from(83),
        }
    }
}

impl AppConfig {
    /// Load config from YAML file based on environment
    pub fn load(env: &str) -> Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        let mut config: Self =
            serde_yaml::from_str(&content).context("Failed to parse config yaml")?;

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Built-in defaults, used when no config file is present (tests, dev)
    pub fn default_config() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: "./logs".to_string(),
            log_file: "propsim.log".to_string(),
            use_json: false,
            rotation: "daily".to_string(),
            gateway: GatewayConfig::default(),
            feed: FeedConfig::default(),
            hub: HubConfig::default(),
            engine: EngineConfig::default(),
            postgres_url: None,
            redis_url: None,
        }
    }

    /// Apply environment variable overrides
    ///
    /// Environment variables take precedence over YAML config. A value that
    /// fails to parse keeps the configured default and is logged once.
    pub fn apply_env_overrides(&mut self) {
        if let Some(p) = env_parse::<u16>("PORT") {
            tracing::info!("Config override: gateway.port = {} (from PORT)", p);
            self.gateway.port = p;
        }
        if let Ok(key) = std::env::var("FEED_API_KEY") {
            tracing::info!("Config override: gateway.feed_api_key = [REDACTED] (from FEED_API_KEY)");
            self.gateway.feed_api_key = Some(key);
        }
        if let Ok(url) = std::env::var("DATABASE_URL") {
            tracing::info!("Config override: postgres_url = [REDACTED] (from DATABASE_URL)");
            self.postgres_url = Some(url);
        }
        if let Ok(url) = std::env::var("REDIS_URL").or_else(|_| std::env::var("UPSTASH_REDIS_URL")) {
            tracing::info!("Config override: redis_url = [REDACTED] (from REDIS_URL)");
            self.redis_url = Some(url);
        }
        if let Ok(url) = std::env::var("FEED_WS_BASE") {
            tracing::info!("Config override: feed.ws_base = {} (from FEED_WS_BASE)", url);
            self.feed.ws_base = url;
        }
        if let Ok(url) = std::env::var("FEED_REST_BASE") {
            tracing::info!("Config override: feed.rest_base = {} (from FEED_REST_BASE)", url);
            self.feed.rest_base = url;
        }
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            tracing::info!("Config override: log_level = {} (from LOG_LEVEL)", level);
            self.log_level = level;
        }

        if let Some(v) = env_parse::<u32>("MAX_BROADCAST_TPS") {
            self.hub.max_broadcast_tps = v;
        }
        if let Some(v) = env_parse::<usize>("TICK_HISTORY_LIMIT") {
            self.hub.tick_history_limit = v;
        }
        if let Some(v) = env_parse::<u64>("EXECUTION_LATENCY_MS") {
            self.engine.execution_latency_ms = v;
        }
        if let Some(v) = env_parse::<i64>("SLTP_GRACE_MS") {
            self.engine.sltp_grace_ms = v;
        }
        if let Some(v) = env_parse::<i64>("PRICE_STALE_MS") {
            self.engine.price_stale_ms = v;
        }
        if let Some(v) = env_parse::<u64>("DUPLICATE_ORDER_MS") {
            self.engine.duplicate_order_ms = v;
        }
        if let Some(v) = env_parse::<bool>("ENABLE_PARTIAL_FILLS") {
            self.engine.enable_partial_fills = v;
        }
        if let Some(v) = env_parse::<f64>("PARTIAL_FILL_RATIO") {
            self.engine.partial_fill_ratio = v;
        }
    }

    /// Validate configuration at startup
    ///
    /// Returns an error if any critical configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.gateway.port == 0 {
            anyhow::bail!("Invalid gateway.port: must be > 0");
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log_level '{}': must be one of {:?}",
                self.log_level,
                valid_levels
            );
        }

        if !(0.0..=1.0).contains(&self.engine.partial_fill_ratio) {
            anyhow::bail!(
                "Invalid engine.partial_fill_ratio {}: must be within [0, 1]",
                self.engine.partial_fill_ratio
            );
        }

        if self.hub.max_broadcast_tps == 0 {
            anyhow::bail!("Invalid hub.max_broadcast_tps: must be > 0");
        }
        if self.hub.tick_history_limit == 0 {
            anyhow::bail!("Invalid hub.tick_history_limit: must be > 0");
        }

        Ok(())
    }
}

/// Parse an env var, logging (once, at load) when the value is unusable
fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    match std::env::var(name) {
        Ok(raw) => match raw.parse::<T>() {
            Ok(v) => {
                tracing::info!("Config override: {} = {} (from env)", name, raw);
                Some(v)
            }
            Err(_) => {
                tracing::warn!("Ignoring unparseable env {}={:?}, keeping default", name, raw);
                None
            }
        },
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_valid_config() {
        let config = AppConfig::default_config();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_invalid_port() {
        let mut config = AppConfig::default_config();
        config.gateway.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let mut config = AppConfig::default_config();
        config.log_level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_partial_fill_ratio_range() {
        let mut config = AppConfig::default_config();
        config.engine.partial_fill_ratio = 1.5;
        assert!(config.validate().is_err());

        config.engine.partial_fill_ratio = 0.5;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_engine_defaults_match_documented_values() {
        let engine = EngineConfig::default();
        assert_eq!(engine.execution_latency_ms, 150);
        assert_eq!(engine.sltp_grace_ms, 1000);
        assert_eq!(engine.price_stale_ms, 5000);
        assert_eq!(engine.duplicate_order_ms, 500);
        assert!(!engine.enable_partial_fills);
    }
}
