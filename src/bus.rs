//! Event bus - in-process publish/subscribe fan-out
//!
//! Lossy broadcast channels connect the producing side (price hub,
//! matching engine, risk engine) to observers (the WebSocket broadcaster
//! and anything else that subscribes). Delivery is at-most-once per
//! subscriber: a lagging receiver drops the oldest messages, and every
//! consumer must be able to re-seed itself from shared state plus the KV
//! latest-price hash.
//!
//! # Message Flow
//!
//! ```text
//! PriceHub → price_ticks ─┬→ MatchingEngine (dedicated channel, lossless)
//!                         └→ WsBroadcaster
//! MatchingEngine → trade_events / order_events → WsBroadcaster
//! RiskEngine → trade_events (breach closes) → WsBroadcaster
//! PriceHub → depth_events → WsBroadcaster
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::core_types::AccountId;
use crate::errors::RejectReason;
use crate::models::{Account, DepthSnapshot, ExitReason, Order, Tick, Trade};

/// Capacity of each broadcast channel; overflow drops oldest per receiver
const BUS_CAPACITY: usize = 1024;

// ============================================================
// TRADE EVENTS
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeEventKind {
    #[serde(rename = "TRADE_OPENED")]
    Opened,
    #[serde(rename = "TRADE_CLOSED")]
    Closed,
}

/// Open/close lifecycle of a trade
///
/// For a given trade the open event is always published before the close
/// event; both are emitted while the per-account fill lock is still held.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeEvent {
    #[serde(rename = "type")]
    pub kind: TradeEventKind,
    pub trade: Trade,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<ExitReason>,
}

// ============================================================
// ORDER EVENTS
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEventKind {
    #[serde(rename = "ORDER_PENDING")]
    Pending,
    #[serde(rename = "ORDER_FILLED")]
    Filled,
    #[serde(rename = "ORDER_REJECTED")]
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderEvent {
    #[serde(rename = "type")]
    pub kind: OrderEventKind,
    pub order: Order,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<RejectReason>,
}

// ============================================================
// ACCOUNT EVENTS
// ============================================================

/// Account-scoped observations pushed to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AccountEvent {
    /// Durable account patch was applied (balance, status, ...)
    #[serde(rename = "account_update")]
    Update { account: Account },
    /// Aggregate unrealized PnL for the account at the current mark.
    /// Observational only; nothing is persisted for these.
    #[serde(rename = "account_upnl")]
    Upnl {
        account_id: AccountId,
        upnl: rust_decimal::Decimal,
        ts: i64,
    },
}

// ============================================================
// BUS
// ============================================================

/// Handles to every channel; cheap to clone
#[derive(Clone)]
pub struct EventBus {
    price_ticks: broadcast::Sender<Tick>,
    depth_events: broadcast::Sender<DepthSnapshot>,
    trade_events: broadcast::Sender<TradeEvent>,
    order_events: broadcast::Sender<OrderEvent>,
    account_events: broadcast::Sender<AccountEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            price_ticks: broadcast::channel(BUS_CAPACITY).0,
            depth_events: broadcast::channel(BUS_CAPACITY).0,
            trade_events: broadcast::channel(BUS_CAPACITY).0,
            order_events: broadcast::channel(BUS_CAPACITY).0,
            account_events: broadcast::channel(BUS_CAPACITY).0,
        }
    }

    // Publishing ignores the no-subscriber error: an empty bus is normal
    // during boot and in tests.

    pub fn publish_tick(&self, tick: Tick) {
        let _ = self.price_ticks.send(tick);
    }

    pub fn publish_depth(&self, depth: DepthSnapshot) {
        let _ = self.depth_events.send(depth);
    }

    pub fn publish_trade(&self, event: TradeEvent) {
        let _ = self.trade_events.send(event);
    }

    pub fn publish_order(&self, event: OrderEvent) {
        let _ = self.order_events.send(event);
    }

    pub fn publish_account(&self, event: AccountEvent) {
        let _ = self.account_events.send(event);
    }

    pub fn subscribe_ticks(&self) -> broadcast::Receiver<Tick> {
        self.price_ticks.subscribe()
    }

    pub fn subscribe_depth(&self) -> broadcast::Receiver<DepthSnapshot> {
        self.depth_events.subscribe()
    }

    pub fn subscribe_trades(&self) -> broadcast::Receiver<TradeEvent> {
        self.trade_events.subscribe()
    }

    pub fn subscribe_orders(&self) -> broadcast::Receiver<OrderEvent> {
        self.order_events.subscribe()
    }

    pub fn subscribe_accounts(&self) -> broadcast::Receiver<AccountEvent> {
        self.account_events.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe_ticks();
        let mut rx2 = bus.subscribe_ticks();

        bus.publish_tick(Tick {
            symbol: "BTCUSD".into(),
            price: dec!(30000),
            ts: 1,
        });

        assert_eq!(rx1.recv().await.unwrap().price, dec!(30000));
        assert_eq!(rx2.recv().await.unwrap().price, dec!(30000));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_silent() {
        let bus = EventBus::new();
        // Must not panic or error
        bus.publish_tick(Tick {
            symbol: "BTCUSD".into(),
            price: dec!(1),
            ts: 1,
        });
    }

    #[tokio::test]
    async fn test_trade_event_serializes_with_wire_tags() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe_orders();

        let order = crate::models::Order {
            id: "o1".into(),
            account_id: "a1".into(),
            user_id: "u1".into(),
            symbol: "BTCUSD".into(),
            side: crate::models::Side::Buy,
            quantity: dec!(1),
            order_type: crate::models::OrderType::Market,
            limit_price: None,
            stop_loss: None,
            take_profit: None,
            idempotency_key: None,
            created_at: 0,
            status: crate::models::OrderStatus::Rejected,
        };
        bus.publish_order(OrderEvent {
            kind: OrderEventKind::Rejected,
            order,
            reason: Some(RejectReason::MarketClosed),
        });

        let event = rx.recv().await.unwrap();
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "ORDER_REJECTED");
        assert_eq!(json["reason"], "MARKET_CLOSED");
    }
}
