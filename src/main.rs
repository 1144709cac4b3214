//! Process entry point
//!
//! Boot order: config/logging -> stores -> registry -> shared state ->
//! risk engine -> matching engine (closer injection) -> price hub and
//! feeds -> WebSocket broadcaster -> HTTP server. Teardown is
//! signal-driven and leaves the latency window to drain before exit.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;

use propsim::config::AppConfig;
use propsim::feed::{self, RestPriceFetcher};
use propsim::gateway::{self, AppState};
use propsim::hub::PriceHub;
use propsim::kv::{KvStore, memory::MemoryKv, redis_kv::RedisKv};
use propsim::matching::MatchingEngine;
use propsim::persistence::{DynTradeStore, MemoryStore, PgStore, TradeStore};
use propsim::risk::{RiskEngine, daily_reset::DailyResetJob};
use propsim::websocket::{ConnectionManager, WsBroadcaster};
use propsim::{EventBus, InstrumentRegistry, MarkStore, SharedTradeState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_env = std::env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());
    let config = match AppConfig::load(&app_env) {
        Ok(config) => config,
        Err(e) => {
            // Tests and bare dev boots run without a config file
            eprintln!("Config file unavailable ({e:#}), using built-in defaults");
            let mut config = AppConfig::default_config();
            config.apply_env_overrides();
            config.validate()?;
            config
        }
    };

    let _log_guard = propsim::logging::init_logging(&config);
    tracing::info!(env = %app_env, "propsim starting");

    if app_env != "dev" && config.gateway.feed_api_key.is_none() {
        anyhow::bail!("FEED_API_KEY is required outside dev");
    }

    // Stores first; everything else layers on them
    let store: DynTradeStore = match &config.postgres_url {
        Some(url) => Arc::new(
            PgStore::connect(url)
                .await
                .context("PostgreSQL connect failed")?,
        ),
        None => {
            tracing::warn!("No postgres_url configured, running on the in-memory store");
            Arc::new(MemoryStore::new())
        }
    };
    let kv: Arc<dyn KvStore> = match &config.redis_url {
        Some(url) => Arc::new(RedisKv::connect(url).await.context("Redis connect failed")?),
        None => {
            tracing::warn!("No redis_url configured, running on the in-memory KV");
            Arc::new(MemoryKv::new())
        }
    };

    // Registry -> state -> bus -> engines, in that order
    let registry = Arc::new(InstrumentRegistry::with_defaults());
    let bus = EventBus::new();
    let state = Arc::new(SharedTradeState::new(bus.clone()));
    let marks = Arc::new(MarkStore::new());

    let accounts = store.load_accounts().await.context("account load failed")?;
    tracing::info!(count = accounts.len(), "Accounts loaded");
    state.install_accounts(accounts);

    // Crash recovery: open rows become open in-memory trades again, and
    // resting limit orders go back into the pending list
    let open_trades = store.load_open_trades().await.unwrap_or_default();
    if !open_trades.is_empty() {
        tracing::info!(count = open_trades.len(), "Recovered open trades");
        for trade in open_trades {
            state.add_open_trade(trade);
        }
    }
    let pending = store.load_pending_orders().await.unwrap_or_default();
    if !pending.is_empty() {
        tracing::info!(count = pending.len(), "Recovered pending orders");
        for order in pending {
            state.add_pending_order(order);
        }
    }

    let risk = Arc::new(RiskEngine::new(
        state.clone(),
        registry.clone(),
        store.clone(),
        bus.clone(),
    ));

    let price_fetcher: Arc<dyn propsim::matching::PriceFetcher> =
        Arc::new(RestPriceFetcher::new(&config.feed.rest_base));
    let engine = Arc::new(MatchingEngine::new(
        state.clone(),
        registry.clone(),
        store.clone(),
        kv.clone(),
        bus.clone(),
        marks.clone(),
        risk.clone(),
        config.engine.clone(),
        Some(price_fetcher),
    ));
    risk.set_closer(engine.clone());

    // Lossless tick path: feeds -> hub -> engine
    let (engine_tx, engine_rx) = mpsc::channel(4096);
    tokio::spawn(engine.clone().run(engine_rx));

    let (feed_tx, feed_rx) = mpsc::channel(4096);
    let hub = PriceHub::new(
        registry.clone(),
        kv.clone(),
        bus.clone(),
        config.hub.clone(),
        engine_tx,
    );
    tokio::spawn(hub.run(feed_rx));
    let _feed_handles = feed::spawn_feeds(&config.feed, &config.hub, &registry, feed_tx);

    if let Some(url) = &config.postgres_url {
        // Periodic instrument refresh needs its own pool handle
        let pool = PgStore::connect(url).await?;
        registry.reload_from_store(pool.pool()).await;
        tokio::spawn(registry.clone().refresh_loop(pool.pool().clone()));
    }

    let ws_manager = Arc::new(ConnectionManager::new(
        config.hub.max_broadcast_tps,
        config.hub.client_buffer_limit_bytes,
    ));
    tokio::spawn(WsBroadcaster::new(ws_manager.clone(), bus.clone()).run());

    let reset_job = Arc::new(DailyResetJob::new(risk.clone(), state.clone(), marks.clone()));
    tokio::spawn(reset_job.run());

    let app_state = Arc::new(AppState {
        config: Arc::new(config.clone()),
        engine,
        trade_state: state,
        registry,
        marks,
        kv,
        ws_manager,
    });
    let router = gateway::router(app_state);

    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    tracing::info!(%addr, "Gateway listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    // In-flight fills hold their latency window; give them time to settle
    // before the process goes away
    let drain = std::time::Duration::from_millis(config.engine.execution_latency_ms * 2);
    tracing::info!(?drain, "Draining in-flight fills before exit");
    tokio::time::sleep(drain).await;

    tracing::info!("propsim stopped");
    Ok(())
}

/// Resolve on SIGTERM / SIGINT
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate()).expect("SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("SIGINT handler");
        tokio::select! {
            _ = sigterm.recv() => tracing::info!("SIGTERM received"),
            _ = sigint.recv() => tracing::info!("SIGINT received"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.expect("ctrl-c handler");
        tracing::info!("CTRL+C received");
    }
}
