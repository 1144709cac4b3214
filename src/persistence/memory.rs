//! In-memory trade store
//!
//! Same contract as [`super::PgStore`], backed by plain maps. Used by the
//! test suite and by DB-less development boots. The inspection helpers
//! exist for assertions only.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use super::TradeStore;
use crate::core_types::OrderId;
use crate::models::{Account, Order, OrderStatus, Trade};

#[derive(Default)]
struct Inner {
    accounts: HashMap<String, Account>,
    orders: HashMap<OrderId, Order>,
    trades: HashMap<String, Trade>,
    audit: Vec<(String, serde_json::Value)>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed accounts before boot (what a fixture migration would insert)
    pub fn seed_accounts(&self, accounts: Vec<Account>) {
        let mut inner = self.lock();
        for a in accounts {
            inner.accounts.insert(a.id.clone(), a);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("memory store lock poisoned")
    }

    // -- inspection helpers ------------------------------------------

    pub fn order_rows(&self) -> Vec<Order> {
        self.lock().orders.values().cloned().collect()
    }

    pub fn order_row(&self, id: &str) -> Option<Order> {
        self.lock().orders.get(id).cloned()
    }

    pub fn trade_rows(&self) -> Vec<Trade> {
        self.lock().trades.values().cloned().collect()
    }

    pub fn account_row(&self, id: &str) -> Option<Account> {
        self.lock().accounts.get(id).cloned()
    }

    pub fn audit_rows(&self) -> Vec<(String, serde_json::Value)> {
        self.lock().audit.clone()
    }
}

#[async_trait]
impl TradeStore for MemoryStore {
    async fn load_accounts(&self) -> Result<Vec<Account>> {
        Ok(self.lock().accounts.values().cloned().collect())
    }

    async fn save_account(&self, account: &Account) -> Result<()> {
        self.lock()
            .accounts
            .insert(account.id.clone(), account.clone());
        Ok(())
    }

    async fn insert_order(&self, order: &Order) -> Result<()> {
        // Same semantics as ON CONFLICT DO NOTHING
        self.lock()
            .orders
            .entry(order.id.clone())
            .or_insert_with(|| order.clone());
        Ok(())
    }

    async fn update_order_status(&self, order_id: &OrderId, status: OrderStatus) -> Result<()> {
        if let Some(order) = self.lock().orders.get_mut(order_id) {
            order.status = status;
        }
        Ok(())
    }

    async fn insert_trade(&self, trade: &Trade) -> Result<()> {
        self.lock()
            .trades
            .entry(trade.id.clone())
            .or_insert_with(|| trade.clone());
        Ok(())
    }

    async fn close_trade(&self, trade: &Trade) -> Result<()> {
        self.lock().trades.insert(trade.id.clone(), trade.clone());
        Ok(())
    }

    async fn insert_audit(&self, event: &str, payload: serde_json::Value) -> Result<()> {
        self.lock().audit.push((event.to_string(), payload));
        Ok(())
    }

    async fn order_exists(&self, order_id: &OrderId) -> Result<bool> {
        Ok(self.lock().orders.contains_key(order_id))
    }

    async fn load_open_trades(&self) -> Result<Vec<Trade>> {
        Ok(self
            .lock()
            .trades
            .values()
            .filter(|t| t.is_open())
            .cloned()
            .collect())
    }

    async fn load_pending_orders(&self) -> Result<Vec<Order>> {
        Ok(self
            .lock()
            .orders
            .values()
            .filter(|o| o.status == OrderStatus::Pending)
            .cloned()
            .collect())
    }
}
