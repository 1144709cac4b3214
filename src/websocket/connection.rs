//! WebSocket connection manager
//!
//! Tracks active client connections in a DashMap, with per-client symbol
//! subscriptions and an outstanding-bytes counter for slow-consumer
//! protection. Market-data pushes run through a process-wide token
//! bucket; excess messages are dropped, never queued.

use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

use super::messages::WsMessage;
use crate::core_types::SymbolKey;

/// Pre-serialized frames; the writer task sends them verbatim
pub type WsSender = mpsc::UnboundedSender<String>;

/// Unique connection identifier
pub type ConnectionId = u64;

struct Client {
    tx: WsSender,
    subscriptions: Mutex<HashSet<SymbolKey>>,
    /// Bytes queued but not yet written to the socket
    buffered: Arc<AtomicUsize>,
}

/// One-second fixed window over the process-wide broadcast budget
///
/// Deliberately approximate under contention; the budget protects the
/// process, it is not an SLA.
struct TokenWindow {
    window_start: Instant,
    used: u32,
}

pub struct ConnectionManager {
    clients: DashMap<ConnectionId, Client>,
    next_conn_id: AtomicU64,
    bucket: Mutex<TokenWindow>,
    max_broadcast_tps: u32,
    buffer_limit: usize,
}

impl ConnectionManager {
    pub fn new(max_broadcast_tps: u32, buffer_limit: usize) -> Self {
        Self {
            clients: DashMap::new(),
            next_conn_id: AtomicU64::new(1),
            bucket: Mutex::new(TokenWindow {
                window_start: Instant::now(),
                used: 0,
            }),
            max_broadcast_tps,
            buffer_limit,
        }
    }

    /// Register a new connection; returns its id
    pub fn add_connection(&self, tx: WsSender, buffered: Arc<AtomicUsize>) -> ConnectionId {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        self.clients.insert(
            conn_id,
            Client {
                tx,
                subscriptions: Mutex::new(HashSet::new()),
                buffered,
            },
        );
        tracing::info!(conn_id, total = self.clients.len(), "WebSocket connection added");
        conn_id
    }

    pub fn remove_connection(&self, conn_id: ConnectionId) {
        self.clients.remove(&conn_id);
        tracing::info!(conn_id, total = self.clients.len(), "WebSocket connection removed");
    }

    pub fn subscribe(&self, conn_id: ConnectionId, symbol: SymbolKey) {
        if let Some(client) = self.clients.get(&conn_id) {
            client
                .subscriptions
                .lock()
                .expect("subscriptions lock poisoned")
                .insert(symbol);
        }
    }

    pub fn unsubscribe(&self, conn_id: ConnectionId, symbol: &str) {
        if let Some(client) = self.clients.get(&conn_id) {
            client
                .subscriptions
                .lock()
                .expect("subscriptions lock poisoned")
                .remove(symbol);
        }
    }

    /// Send one message to one connection (welcome, pong, sync_state)
    pub fn send_to(&self, conn_id: ConnectionId, message: &WsMessage) {
        let Some(client) = self.clients.get(&conn_id) else {
            return;
        };
        if let Ok(json) = serde_json::to_string(message) {
            client.buffered.fetch_add(json.len(), Ordering::Relaxed);
            let _ = client.tx.send(json);
        }
    }

    /// Fan a message out to every eligible connection
    ///
    /// Market-data messages consume a broadcast token first; when the
    /// window budget is spent the message is dropped entirely. Per client:
    /// skip when the message's symbol is filtered out by a non-empty
    /// subscription set, and skip slow consumers whose send buffer is over
    /// the cap.
    pub fn broadcast(&self, message: &WsMessage) {
        if message.is_market_data() && !self.take_broadcast_token() {
            return;
        }

        let Ok(json) = serde_json::to_string(message) else {
            return;
        };
        let symbol = message.symbol();

        for entry in self.clients.iter() {
            let client = entry.value();

            if let Some(symbol) = symbol {
                let subs = client
                    .subscriptions
                    .lock()
                    .expect("subscriptions lock poisoned");
                if !subs.is_empty() && !subs.contains(symbol) {
                    continue;
                }
            }

            // Slow-consumer guard: don't let one stuck socket eat memory
            if client.buffered.load(Ordering::Relaxed) > self.buffer_limit {
                continue;
            }

            client.buffered.fetch_add(json.len(), Ordering::Relaxed);
            let _ = client.tx.send(json.clone());
        }
    }

    fn take_broadcast_token(&self) -> bool {
        let mut window = self.bucket.lock().expect("broadcast bucket poisoned");
        if window.window_start.elapsed().as_secs() >= 1 {
            window.window_start = Instant::now();
            window.used = 0;
        }
        if window.used < self.max_broadcast_tps {
            window.used += 1;
            true
        } else {
            false
        }
    }

    /// (connections)
    pub fn connection_count(&self) -> usize {
        self.clients.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn price_msg(symbol: &str) -> WsMessage {
        WsMessage::Price {
            symbol: symbol.into(),
            price: dec!(30000),
            ts: 1,
        }
    }

    fn connect(manager: &ConnectionManager) -> (ConnectionId, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = manager.add_connection(tx, Arc::new(AtomicUsize::new(0)));
        (id, rx)
    }

    #[test]
    fn test_add_remove_connection() {
        let manager = ConnectionManager::new(20, 1024 * 1024);
        let (id, _rx) = connect(&manager);
        assert_eq!(manager.connection_count(), 1);
        manager.remove_connection(id);
        assert_eq!(manager.connection_count(), 0);
    }

    #[test]
    fn test_subscription_filter() {
        let manager = ConnectionManager::new(100, 1024 * 1024);
        let (id, mut rx) = connect(&manager);

        // Empty subscription set receives everything
        manager.broadcast(&price_msg("BTCUSD"));
        assert!(rx.try_recv().is_ok());

        // Subscribed to ETHUSD only: BTCUSD is filtered out
        manager.subscribe(id, "ETHUSD".into());
        manager.broadcast(&price_msg("BTCUSD"));
        assert!(rx.try_recv().is_err());
        manager.broadcast(&price_msg("ETHUSD"));
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_broadcast_budget_drops_excess() {
        let manager = ConnectionManager::new(20, 1024 * 1024);
        let (_id, mut rx) = connect(&manager);

        // A burst of 200 market-data messages delivers at most 20
        for _ in 0..200 {
            manager.broadcast(&price_msg("BTCUSD"));
        }
        let mut delivered = 0;
        while rx.try_recv().is_ok() {
            delivered += 1;
        }
        assert_eq!(delivered, 20);
    }

    #[test]
    fn test_lifecycle_messages_bypass_budget() {
        let manager = ConnectionManager::new(1, 1024 * 1024);
        let (_id, mut rx) = connect(&manager);

        manager.broadcast(&price_msg("BTCUSD")); // consumes the only token
        manager.broadcast(&price_msg("BTCUSD")); // dropped
        manager.broadcast(&WsMessage::Pong); // not market data, goes out

        let mut delivered = 0;
        while rx.try_recv().is_ok() {
            delivered += 1;
        }
        assert_eq!(delivered, 2);
    }

    #[test]
    fn test_slow_consumer_skipped() {
        let manager = ConnectionManager::new(100, 64);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let buffered = Arc::new(AtomicUsize::new(0));
        manager.add_connection(tx, buffered.clone());

        // Over the buffer cap: the client is skipped for this message
        buffered.store(1000, Ordering::Relaxed);
        manager.broadcast(&price_msg("BTCUSD"));
        assert!(rx.try_recv().is_err());
    }
}
