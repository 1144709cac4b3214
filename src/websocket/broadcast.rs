//! Bus -> client fan-out service
//!
//! Subscribes every bus channel, maps events onto wire messages and hands
//! them to the connection manager, which applies the broadcast budget and
//! per-client filtering. A lagged receiver just skips ahead: clients
//! recover from the KV latest-price hash and sync_state.

use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

use super::connection::ConnectionManager;
use super::messages::WsMessage;
use crate::bus::{AccountEvent, EventBus, OrderEventKind, TradeEventKind};

pub struct WsBroadcaster {
    manager: Arc<ConnectionManager>,
    bus: EventBus,
}

impl WsBroadcaster {
    pub fn new(manager: Arc<ConnectionManager>, bus: EventBus) -> Self {
        Self { manager, bus }
    }

    /// Consume bus events until shutdown
    pub async fn run(self) {
        let mut ticks = self.bus.subscribe_ticks();
        let mut depth = self.bus.subscribe_depth();
        let mut trades = self.bus.subscribe_trades();
        let mut orders = self.bus.subscribe_orders();
        let mut accounts = self.bus.subscribe_accounts();
        tracing::info!("[WsBroadcaster] Started");

        loop {
            tokio::select! {
                tick = ticks.recv() => match tick {
                    Ok(tick) => self.manager.broadcast(&WsMessage::Price {
                        symbol: tick.symbol,
                        price: tick.price,
                        ts: tick.ts,
                    }),
                    Err(RecvError::Lagged(n)) => {
                        tracing::debug!(skipped = n, "Broadcaster lagged on price_ticks");
                    }
                    Err(RecvError::Closed) => break,
                },
                snapshot = depth.recv() => match snapshot {
                    Ok(d) => self.manager.broadcast(&WsMessage::Orderbook {
                        symbol: d.symbol,
                        bids: d.bids,
                        asks: d.asks,
                        ts: d.ts,
                    }),
                    Err(RecvError::Lagged(n)) => {
                        tracing::debug!(skipped = n, "Broadcaster lagged on depth");
                    }
                    Err(RecvError::Closed) => break,
                },
                event = trades.recv() => match event {
                    Ok(event) => {
                        let msg = match event.kind {
                            TradeEventKind::Opened => WsMessage::TradeFill { trade: event.trade },
                            TradeEventKind::Closed => WsMessage::TradeClose { trade: event.trade },
                        };
                        self.manager.broadcast(&msg);
                    }
                    Err(RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "Broadcaster lagged on trade_events");
                    }
                    Err(RecvError::Closed) => break,
                },
                event = orders.recv() => match event {
                    Ok(event) => {
                        let msg = match event.kind {
                            OrderEventKind::Pending => {
                                Some(WsMessage::OrderPending { order: event.order })
                            }
                            OrderEventKind::Rejected => Some(WsMessage::OrderReject {
                                order: event.order,
                                reason: event.reason,
                            }),
                            // Fills reach clients as trade_fill
                            OrderEventKind::Filled => None,
                        };
                        if let Some(msg) = msg {
                            self.manager.broadcast(&msg);
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "Broadcaster lagged on order_events");
                    }
                    Err(RecvError::Closed) => break,
                },
                event = accounts.recv() => match event {
                    Ok(AccountEvent::Update { account }) => {
                        self.manager.broadcast(&WsMessage::AccountUpdate { account });
                    }
                    Ok(AccountEvent::Upnl { account_id, upnl, ts }) => {
                        self.manager.broadcast(&WsMessage::AccountUpnl { account_id, upnl, ts });
                    }
                    Err(RecvError::Lagged(n)) => {
                        tracing::debug!(skipped = n, "Broadcaster lagged on account events");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        tracing::info!("[WsBroadcaster] Bus closed, stopping");
    }
}
