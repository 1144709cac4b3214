//! Shared trade state - in-memory authoritative snapshot
//!
//! One process-wide facade over accounts, open trades and pending limit
//! orders. A single mutex guards the maps; every read path returns an
//! owned snapshot so no consumer ever iterates under a writer, and no
//! lock is ever held across an await point.
//!
//! Trades live in an arena keyed by id with an account -> trade-ids index;
//! trades and accounts never hold references to each other.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::bus::{AccountEvent, EventBus};
use crate::core_types::{AccountId, OrderId, SymbolKey, TradeId};
use crate::models::{Account, Order, SessionPnl, Trade};

#[derive(Default)]
struct Inner {
    accounts: HashMap<AccountId, Account>,
    trades: HashMap<TradeId, Trade>,
    account_trades: HashMap<AccountId, HashSet<TradeId>>,
    pending: HashMap<OrderId, Order>,
    sessions: HashMap<AccountId, SessionPnl>,
}

/// Process-wide trade state facade
pub struct SharedTradeState {
    inner: Mutex<Inner>,
    bus: EventBus,
}

impl SharedTradeState {
    pub fn new(bus: EventBus) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            bus,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("trade state lock poisoned")
    }

    // ------------------------------------------------------------
    // Accounts
    // ------------------------------------------------------------

    /// Replace the whole account set (boot / full reload)
    pub fn install_accounts(&self, accounts: Vec<Account>) {
        let mut inner = self.lock();
        inner.accounts = accounts.into_iter().map(|a| (a.id.clone(), a)).collect();
    }

    pub fn get_account(&self, id: &str) -> Option<Account> {
        self.lock().accounts.get(id).cloned()
    }

    pub fn get_accounts(&self) -> Vec<Account> {
        self.lock().accounts.values().cloned().collect()
    }

    /// Apply a mutation to one account and fan the update out on the bus
    ///
    /// Returns the post-mutation copy, or `None` for an unknown id.
    pub fn update_account<F>(&self, id: &str, patch: F) -> Option<Account>
    where
        F: FnOnce(&mut Account),
    {
        let updated = {
            let mut inner = self.lock();
            let account = inner.accounts.get_mut(id)?;
            patch(account);
            account.clone()
        };
        self.bus.publish_account(AccountEvent::Update {
            account: updated.clone(),
        });
        Some(updated)
    }

    // ------------------------------------------------------------
    // Open trades
    // ------------------------------------------------------------

    pub fn add_open_trade(&self, trade: Trade) {
        let mut inner = self.lock();
        inner
            .account_trades
            .entry(trade.account_id.clone())
            .or_default()
            .insert(trade.id.clone());
        inner.trades.insert(trade.id.clone(), trade);
    }

    /// Remove a trade from the open set, returning it
    pub fn remove_open_trade(&self, id: &str) -> Option<Trade> {
        let mut inner = self.lock();
        let trade = inner.trades.remove(id)?;
        if let Some(set) = inner.account_trades.get_mut(&trade.account_id) {
            set.remove(id);
            if set.is_empty() {
                inner.account_trades.remove(&trade.account_id);
            }
        }
        Some(trade)
    }

    pub fn get_open_trade(&self, id: &str) -> Option<Trade> {
        self.lock().trades.get(id).cloned()
    }

    pub fn get_open_trades(&self) -> Vec<Trade> {
        self.lock().trades.values().cloned().collect()
    }

    pub fn open_trades_for_symbol(&self, symbol: &SymbolKey) -> Vec<Trade> {
        self.lock()
            .trades
            .values()
            .filter(|t| &t.symbol == symbol)
            .cloned()
            .collect()
    }

    pub fn open_trades_for_account(&self, account_id: &str) -> Vec<Trade> {
        let inner = self.lock();
        match inner.account_trades.get(account_id) {
            Some(ids) => ids
                .iter()
                .filter_map(|id| inner.trades.get(id))
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    // ------------------------------------------------------------
    // Session PnL
    // ------------------------------------------------------------

    pub fn get_session(&self, account_id: &str) -> SessionPnl {
        self.lock()
            .sessions
            .get(account_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Fold a closed trade's net PnL into the account's session counters,
    /// rolling the day over if the calendar date changed.
    pub fn apply_session_pnl(
        &self,
        account_id: &str,
        net_pnl: rust_decimal::Decimal,
        today: chrono::NaiveDate,
    ) -> SessionPnl {
        let mut inner = self.lock();
        let session = inner.sessions.entry(account_id.to_string()).or_default();
        session.apply(net_pnl, today);
        session.clone()
    }

    /// Day rollover: zero the realized counter, keep best_day and total
    pub fn reset_session_day(&self, account_id: &str, today: chrono::NaiveDate) {
        let mut inner = self.lock();
        let session = inner.sessions.entry(account_id.to_string()).or_default();
        session.day = Some(today);
        session.realized = rust_decimal::Decimal::ZERO;
    }

    // ------------------------------------------------------------
    // Pending limit orders
    // ------------------------------------------------------------

    pub fn add_pending_order(&self, order: Order) {
        self.lock().pending.insert(order.id.clone(), order);
    }

    pub fn remove_pending_order(&self, id: &str) -> Option<Order> {
        self.lock().pending.remove(id)
    }

    /// Snapshot of all pending orders, oldest first
    pub fn get_pending_orders(&self) -> Vec<Order> {
        let mut orders: Vec<Order> = self.lock().pending.values().cloned().collect();
        orders.sort_by_key(|o| o.created_at);
        orders
    }

    /// Pending orders on one symbol, oldest first
    pub fn pending_orders_for_symbol(&self, symbol: &SymbolKey) -> Vec<Order> {
        let mut orders: Vec<Order> = self
            .lock()
            .pending
            .values()
            .filter(|o| &o.symbol == symbol)
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.created_at);
        orders
    }
}
