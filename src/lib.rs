//! propsim - Simulated trading execution core
//!
//! A tick feed from external exchanges drives an in-memory matching
//! engine that fills simulated orders against live marks, while a risk
//! engine enforces prop-firm rules and can liquidate accounts. Prices fan
//! out to a Redis KV layer and to WebSocket clients; durable facts live
//! in PostgreSQL.
//!
//! # Modules
//!
//! - [`core_types`] - Fundamental id/key aliases
//! - [`config`] - YAML + env configuration
//! - [`models`] - Accounts, orders, trades, ticks
//! - [`errors`] - Tagged business error codes
//! - [`instruments`] - Contract metadata registry
//! - [`state`] - Shared in-memory trade state
//! - [`bus`] - In-process event fan-out
//! - [`marks`] - Latest-price store
//! - [`feed`] - Upstream exchange WebSocket ingest
//! - [`hub`] - Price hub (KV writes + tick channel + broadcast feed)
//! - [`matching`] - Tick-driven matching engine
//! - [`risk`] - Prop-firm risk engine
//! - [`kv`] / [`persistence`] - Redis and PostgreSQL access
//! - [`websocket`] / [`gateway`] - Client-facing surfaces

// Core types - must be first!
pub mod core_types;

// Configuration and ambient plumbing
pub mod config;
pub mod errors;
pub mod logging;

// Domain
pub mod bus;
pub mod instruments;
pub mod marks;
pub mod models;
pub mod state;

// Engines
pub mod matching;
pub mod risk;

// Market data path
pub mod feed;
pub mod hub;

// Storage
pub mod kv;
pub mod persistence;

// Client-facing surfaces
pub mod gateway;
pub mod websocket;

// Convenient re-exports at crate root
pub use bus::EventBus;
pub use config::AppConfig;
pub use errors::RejectReason;
pub use instruments::InstrumentRegistry;
pub use marks::MarkStore;
pub use matching::MatchingEngine;
pub use models::{Account, Order, Tick, Trade};
pub use risk::RiskEngine;
pub use state::SharedTradeState;
