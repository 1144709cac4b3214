//! Wire messages for the client WebSocket

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::core_types::{AccountId, EpochMs, SymbolKey};
use crate::errors::RejectReason;
use crate::models::{Account, DepthSnapshot, Order, PricePoint, Trade};

/// Server -> client messages
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum WsMessage {
    /// First message after upgrade: current prices and depth snapshots
    #[serde(rename = "welcome")]
    Welcome {
        prices: HashMap<SymbolKey, PricePoint>,
        orderbooks: HashMap<SymbolKey, DepthSnapshot>,
    },
    /// Full state mirror so a reconnecting client can rebuild its view
    #[serde(rename = "sync_state")]
    SyncState {
        accounts: Vec<Account>,
        #[serde(rename = "pendingOrders")]
        pending_orders: Vec<Order>,
        #[serde(rename = "openTrades")]
        open_trades: Vec<Trade>,
    },
    #[serde(rename = "price")]
    Price {
        symbol: SymbolKey,
        price: Decimal,
        ts: EpochMs,
    },
    #[serde(rename = "orderbook")]
    Orderbook {
        symbol: SymbolKey,
        bids: Vec<(Decimal, Decimal)>,
        asks: Vec<(Decimal, Decimal)>,
        ts: EpochMs,
    },
    #[serde(rename = "trade_fill")]
    TradeFill { trade: Trade },
    #[serde(rename = "trade_close")]
    TradeClose { trade: Trade },
    #[serde(rename = "order_pending")]
    OrderPending { order: Order },
    #[serde(rename = "order_reject")]
    OrderReject {
        order: Order,
        reason: Option<RejectReason>,
    },
    #[serde(rename = "account_update")]
    AccountUpdate { account: Account },
    #[serde(rename = "account_upnl")]
    AccountUpnl {
        account_id: AccountId,
        upnl: Decimal,
        ts: EpochMs,
    },
    #[serde(rename = "pong")]
    Pong,
}

impl WsMessage {
    /// Symbol this message is scoped to, for subscription filtering.
    /// Account and order messages are not symbol-filtered.
    pub fn symbol(&self) -> Option<&str> {
        match self {
            WsMessage::Price { symbol, .. } | WsMessage::Orderbook { symbol, .. } => Some(symbol),
            _ => None,
        }
    }

    /// Market-data messages compete for the broadcast budget; order and
    /// trade lifecycle messages do not (the KV hash already carries the
    /// latest price, nothing carries a dropped fill)
    pub fn is_market_data(&self) -> bool {
        matches!(self, WsMessage::Price { .. } | WsMessage::Orderbook { .. })
    }
}

/// Client -> server messages
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Subscribe { symbol: String },
    Unsubscribe { symbol: String },
    Ping,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_price_message_wire_shape() {
        let msg = WsMessage::Price {
            symbol: "BTCUSD".into(),
            price: dec!(30010.5),
            ts: 1690000000099,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "price");
        assert_eq!(json["symbol"], "BTCUSD");
    }

    #[test]
    fn test_client_message_parses() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"subscribe","symbol":"BTCUSD"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Subscribe { symbol } if symbol == "BTCUSD"));

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Ping));
    }

    #[test]
    fn test_only_market_data_is_budgeted() {
        let price = WsMessage::Price {
            symbol: "BTCUSD".into(),
            price: dec!(1),
            ts: 0,
        };
        assert!(price.is_market_data());
        assert!(!WsMessage::Pong.is_market_data());
    }
}
