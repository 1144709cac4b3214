//! Durable store access (PostgreSQL)
//!
//! The trait abstracts the relational store, enabling:
//! - Testability through the in-memory implementation
//! - Clean separation between engine logic and infrastructure
//!
//! The in-memory copies in [`crate::state`] are authoritative during a
//! tick; a change only counts as durable once the matching store write
//! has succeeded. Transient store failures are retried with exponential
//! backoff and absorbed here, never surfaced to users.

pub mod memory;
pub mod pg;
pub mod retry;

use anyhow::Result;
use async_trait::async_trait;

use crate::core_types::OrderId;
use crate::models::{Account, Order, OrderStatus, Trade};

#[async_trait]
pub trait TradeStore: Send + Sync {
    /// Load every account the engine should manage
    async fn load_accounts(&self) -> Result<Vec<Account>>;

    /// Persist the mutable account fields (balances, status, session)
    async fn save_account(&self, account: &Account) -> Result<()>;

    /// Insert an order row in its initial status
    async fn insert_order(&self, order: &Order) -> Result<()>;

    /// Move an order row to a terminal (or pending -> filled) status
    async fn update_order_status(&self, order_id: &OrderId, status: OrderStatus) -> Result<()>;

    /// Insert a freshly opened trade
    async fn insert_trade(&self, trade: &Trade) -> Result<()>;

    /// Write the closing fields of a trade
    async fn close_trade(&self, trade: &Trade) -> Result<()>;

    /// Append a row to `trade_audit_logs`
    async fn insert_audit(&self, event: &str, payload: serde_json::Value) -> Result<()>;

    /// Whether an order row already exists (idempotency replays)
    async fn order_exists(&self, order_id: &OrderId) -> Result<bool>;

    /// Open trade rows for crash recovery
    async fn load_open_trades(&self) -> Result<Vec<Trade>>;

    /// Pending limit orders for crash recovery
    async fn load_pending_orders(&self) -> Result<Vec<Order>>;
}

/// Convenience alias used throughout the engine
pub type DynTradeStore = std::sync::Arc<dyn TradeStore>;

pub use memory::MemoryStore;
pub use pg::PgStore;
pub use retry::with_retry;
