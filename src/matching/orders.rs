//! Order submission
//!
//! Validated requests arrive from the gateway, pass duplicate and
//! idempotency suppression and the pre-trade risk gate, then either fill
//! immediately (market) or rest in the pending list (limit).

use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

use super::engine::MatchingEngine;
use super::fills::FillPricing;
use crate::bus::{OrderEvent, OrderEventKind};
use crate::core_types::OrderId;
use crate::errors::RejectReason;
use crate::models::{Order, OrderStatus, OrderType, Side, Trade};

/// An order as accepted by the HTTP gateway (field-validated upstream)
#[derive(Debug, Clone, serde::Deserialize)]
pub struct OrderRequest {
    pub account_id: String,
    pub user_id: String,
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    pub order_type: OrderType,
    pub limit_price: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub idempotency_key: Option<String>,
}

/// Result of a successful submission
#[derive(Debug, Clone)]
pub enum PlaceOutcome {
    /// Order accepted; market orders carry the resulting trade
    Placed {
        order_id: OrderId,
        trade: Option<Trade>,
    },
    /// Same idempotency key seen inside its window; nothing was done
    Duplicate { order_id: OrderId },
}

impl MatchingEngine {
    /// Submit an order
    ///
    /// Every rejection is emitted as an `order_reject` event and audited;
    /// the returned error carries the wire code.
    pub async fn place_order(&self, req: OrderRequest) -> Result<PlaceOutcome, RejectReason> {
        let symbol = self.registry.normalize(&req.symbol);
        if self.registry.get_contract(&symbol).is_none() {
            return Err(RejectReason::SymbolNotSupported);
        }
        if req.order_type == OrderType::Limit && req.limit_price.is_none() {
            return Err(RejectReason::LimitPriceRequired);
        }

        let order_id = uuid::Uuid::new_v4().to_string();

        // Idempotent replay wins over everything else: the client is
        // retrying, not re-ordering
        if let Some(key) = &req.idempotency_key {
            match self
                .kv
                .idem_claim(key, &order_id, self.cfg.idempotency_ttl_secs)
                .await
            {
                Ok(Some(existing)) => {
                    tracing::info!(idempotency_key = %key, order_id = %existing,
                        "Idempotent replay, returning original order");
                    return Ok(PlaceOutcome::Duplicate { order_id: existing });
                }
                Ok(None) => {}
                Err(e) => {
                    // KV trouble must not block order flow
                    tracing::warn!("Idempotency claim failed, proceeding: {e:#}");
                }
            }
        }

        if self.is_duplicate_submission(&req, &symbol) {
            return Err(RejectReason::DuplicateOrder);
        }

        let now = Utc::now();
        let order = Order {
            id: order_id,
            account_id: req.account_id.clone(),
            user_id: req.user_id.clone(),
            symbol: symbol.clone(),
            side: req.side,
            quantity: req.quantity,
            order_type: req.order_type,
            limit_price: req.limit_price,
            stop_loss: req.stop_loss,
            take_profit: req.take_profit,
            idempotency_key: req.idempotency_key.clone(),
            created_at: now.timestamp_millis(),
            status: OrderStatus::Pending,
        };

        if let Err(reason) = self
            .risk
            .pre_trade_check(&req.account_id, &symbol, req.quantity, now)
        {
            self.reject_order(&order, reason, false).await;
            return Err(reason);
        }

        match req.order_type {
            OrderType::Market => self.place_market_order(order).await,
            OrderType::Limit => self.place_limit_order(order).await,
        }
    }

    async fn place_market_order(&self, mut order: Order) -> Result<PlaceOutcome, RejectReason> {
        let contract = self
            .registry
            .get_contract(&order.symbol)
            .ok_or(RejectReason::ContractMetaNotFound)?;

        // A stale mark falls back to a synchronous upstream fetch
        let now_ms = Utc::now().timestamp_millis();
        let entry_mark = match self.marks.get(&order.symbol) {
            Some(mark) if now_ms - mark.ts <= self.cfg.price_stale_ms => mark.price,
            _ => match self.fetch_fallback_price(&contract.price_key).await {
                Some(price) => {
                    self.marks.set(&order.symbol, price, now_ms);
                    price
                }
                None => {
                    self.reject_order(&order, RejectReason::NoLivePrice, false)
                        .await;
                    return Err(RejectReason::NoLivePrice);
                }
            },
        };

        // The row exists (status=filled) before the fill settles; a
        // post-latency risk failure flips it to rejected
        order.status = OrderStatus::Filled;
        if let Err(e) = self.store.insert_order(&order).await {
            tracing::error!(order_id = %order.id, "Order persist failed: {e:#}");
        }

        let order_id = order.id.clone();
        let trade = self
            .fill_order(order, FillPricing::MarketAtFill { entry_mark })
            .await?;

        Ok(PlaceOutcome::Placed {
            order_id,
            trade: Some(trade),
        })
    }

    async fn place_limit_order(&self, mut order: Order) -> Result<PlaceOutcome, RejectReason> {
        order.status = OrderStatus::Pending;
        self.state.add_pending_order(order.clone());
        if let Err(e) = self.store.insert_order(&order).await {
            tracing::error!(order_id = %order.id, "Order persist failed: {e:#}");
        }

        tracing::info!(order_id = %order.id, symbol = %order.symbol,
            limit_price = ?order.limit_price, "Limit order resting");

        let order_id = order.id.clone();
        self.publish_order_event(OrderEvent {
            kind: OrderEventKind::Pending,
            order,
            reason: None,
        })
        .await;

        Ok(PlaceOutcome::Placed {
            order_id,
            trade: None,
        })
    }

    /// Same-shape submission inside the suppression window?
    ///
    /// The hash covers `{account, symbol, side, quantity, type}`; entries
    /// expire after the configured window.
    fn is_duplicate_submission(&self, req: &OrderRequest, symbol: &str) -> bool {
        let mut hasher = DefaultHasher::new();
        (&req.account_id, symbol, req.side as u8, req.quantity, req.order_type as u8)
            .hash(&mut hasher);
        let fingerprint = hasher.finish();

        let window = Duration::from_millis(self.cfg.duplicate_order_ms);
        let now = Instant::now();

        let mut recent = self.recent_orders.lock().expect("duplicate set poisoned");
        recent.retain(|_, seen| now.duration_since(*seen) < window);

        if recent.contains_key(&fingerprint) {
            tracing::warn!(account_id = %req.account_id, %symbol, "Duplicate order suppressed");
            return true;
        }
        recent.insert(fingerprint, now);
        false
    }

    async fn fetch_fallback_price(&self, price_key: &str) -> Option<Decimal> {
        let fetcher = self.price_fetcher.as_ref()?;
        match fetcher.latest_price(price_key).await {
            Ok(price) => Some(price),
            Err(e) => {
                tracing::warn!(%price_key, "Fallback price fetch failed: {e:#}");
                None
            }
        }
    }

    /// Emit + audit a rejection; `after_fill` marks the persisted row
    pub(crate) async fn reject_order(&self, order: &Order, reason: RejectReason, after_fill: bool) {
        tracing::warn!(order_id = %order.id, account_id = %order.account_id,
            code = reason.code(), "Order rejected");

        if after_fill {
            if let Err(e) = self
                .store
                .update_order_status(&order.id, OrderStatus::Rejected)
                .await
            {
                tracing::error!(order_id = %order.id, "Reject persist failed: {e:#}");
            }
        }

        let mut rejected = order.clone();
        rejected.status = OrderStatus::Rejected;
        self.publish_order_event(OrderEvent {
            kind: OrderEventKind::Rejected,
            order: rejected,
            reason: Some(reason),
        })
        .await;

        self.risk
            .audit(
                "ORDER_REJECTED",
                serde_json::json!({
                    "order_id": order.id,
                    "account_id": order.account_id,
                    "symbol": order.symbol,
                    "reason": reason.code(),
                }),
            )
            .await;
    }

    /// Publish an order event on the bus, the KV channel and the KV audit
    /// ring
    pub(crate) async fn publish_order_event(&self, event: OrderEvent) {
        self.bus.publish_order(event.clone());

        if let Ok(payload) = serde_json::to_string(&event) {
            if let Err(e) = self.kv.publish("order_events", &payload).await {
                tracing::warn!("KV publish order_events failed: {e}");
            }
        }
        if let Ok(entry) = serde_json::to_value(&event) {
            if let Err(e) = self.kv.push_audit(entry).await {
                tracing::warn!("KV audit push failed: {e}");
            }
        }
    }
}
