//! Fill execution
//!
//! A fill is a task that (a) enters the per-account mutex, (b) waits out
//! the execution latency, (c) prices the fill with spread and slippage,
//! (d) passes the post-fill risk gate, (e) writes state and store, and
//! (f) emits events. The latency sleep is not cancellable; the mutex
//! guarantees per-account serialization regardless of scheduler.

use chrono::Utc;
use rand::Rng;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::time::Duration;

use super::engine::MatchingEngine;
use crate::bus::{OrderEvent, OrderEventKind, TradeEvent, TradeEventKind};
use crate::errors::RejectReason;
use crate::instruments::Contract;
use crate::models::{Order, OrderStatus, OrderType, Trade};

/// Where the fill's base price comes from
#[derive(Debug, Clone, Copy)]
pub(crate) enum FillPricing {
    /// Limit triggers: the crossing tick pins the base price; `prev` is
    /// the mark it replaced (slippage gap)
    Pinned { base: Decimal, prev: Decimal },
    /// Market orders: re-read the mark after the latency window; the mark
    /// at submission is the slippage reference
    MarketAtFill { entry_mark: Decimal },
}

/// Fraction of the tick-to-tick gap charged as slippage
fn slippage_gap_factor() -> Decimal {
    Decimal::new(2, 1) // 0.2
}

impl MatchingEngine {
    /// Execute a fill for `order`
    ///
    /// On a risk rejection after latency the order row is marked rejected
    /// and no trade is created. On success the open trade is returned and
    /// any unfilled remainder is re-queued under a fresh id.
    pub(crate) async fn fill_order(
        &self,
        order: Order,
        pricing: FillPricing,
    ) -> Result<Trade, RejectReason> {
        let contract = self
            .registry
            .get_contract(&order.symbol)
            .ok_or(RejectReason::ContractMetaNotFound)?;

        let lock = self.account_lock(&order.account_id);
        let _guard = lock.lock().await;

        // Model the exchange round-trip; deliberately not cancellable
        if self.cfg.execution_latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.cfg.execution_latency_ms)).await;
        }

        let (base, prev) = match pricing {
            FillPricing::Pinned { base, prev } => (base, prev),
            FillPricing::MarketAtFill { entry_mark } => {
                let base = self
                    .marks
                    .get(&order.symbol)
                    .map(|m| m.price)
                    .unwrap_or(entry_mark);
                (self.apply_fx(&contract, base), self.apply_fx(&contract, entry_mark))
            }
        };

        // Adverse execution: buys pay the spread and the gap slippage,
        // sells receive less
        let slippage = ((base - prev).abs() * slippage_gap_factor()).min(self.cfg.max_slippage);
        let exec_price = base + order.side.sign() * (contract.spread + slippage);

        let filled_qty = self.fill_quantity(&contract, order.quantity);

        if let Err(reason) = self.risk.evaluate_immediate_risk(
            &order.account_id,
            &order.symbol,
            filled_qty,
            exec_price,
        ) {
            self.reject_order(&order, reason, true).await;
            return Err(reason);
        }

        let now_ms = Utc::now().timestamp_millis();
        let trade = Trade {
            id: uuid::Uuid::new_v4().to_string(),
            order_id: order.id.clone(),
            account_id: order.account_id.clone(),
            symbol: order.symbol.clone(),
            side: order.side,
            quantity: filled_qty,
            entry_price: exec_price,
            stop_loss: order.stop_loss,
            take_profit: order.take_profit,
            time_opened: now_ms,
            // Entry commission is carried in the running PnL
            pnl: -contract.commission * filled_qty,
            exit_price: None,
            time_closed: None,
            exit_reason: None,
        };

        tracing::info!(
            order_id = %order.id,
            trade_id = %trade.id,
            account_id = %order.account_id,
            symbol = %order.symbol,
            qty = %filled_qty,
            exec_price = %exec_price,
            slippage = %slippage,
            "Order filled"
        );

        self.state.add_open_trade(trade.clone());
        if let Err(e) = self.store.insert_trade(&trade).await {
            tracing::error!(trade_id = %trade.id, "Trade persist failed: {e:#}");
        }
        if let Err(e) = self
            .store
            .update_order_status(&order.id, OrderStatus::Filled)
            .await
        {
            tracing::error!(order_id = %order.id, "Order status persist failed: {e:#}");
        }

        let mut filled_order = order.clone();
        filled_order.status = OrderStatus::Filled;
        self.publish_order_event(OrderEvent {
            kind: OrderEventKind::Filled,
            order: filled_order,
            reason: None,
        })
        .await;

        let event = TradeEvent {
            kind: TradeEventKind::Opened,
            trade: trade.clone(),
            reason: None,
        };
        self.bus.publish_trade(event.clone());
        if let Ok(payload) = serde_json::to_string(&event) {
            if let Err(e) = self.kv.publish("trade_events", &payload).await {
                tracing::warn!("KV publish trade_events failed: {e}");
            }
        }

        // Re-queue the remainder, if any, as a resting order at the fill's
        // base price
        let remainder = order.quantity - filled_qty;
        if remainder > Decimal::ZERO {
            self.requeue_remainder(&order, remainder, base).await;
        }

        Ok(trade)
    }

    /// USDINR conversion for INR-quoted contracts (market path only; limit
    /// prices already live in the contract's own quote space)
    fn apply_fx(&self, contract: &Contract, price: Decimal) -> Decimal {
        if !contract.convert_to_inr {
            return price;
        }
        let fx = self
            .marks
            .get("USDINR")
            .map(|m| m.price)
            .unwrap_or(self.cfg.usd_inr_fallback);
        price * fx
    }

    /// Quantity actually filled by this slice
    ///
    /// With partial fills off this is the full quantity. Otherwise the
    /// slice is `quantity * ratio`, floored to the lot step; a would-be
    /// remainder below `min_qty` widens the slice to the full quantity so
    /// no unfillable tail is ever queued.
    fn fill_quantity(&self, contract: &Contract, quantity: Decimal) -> Decimal {
        let enabled = self.cfg.enable_partial_fills || contract.allow_partial_fills.unwrap_or(false);
        if !enabled {
            return quantity;
        }

        let ratio = contract
            .partial_fill_ratio
            .unwrap_or(self.cfg.partial_fill_ratio);
        let ratio = if self.cfg.partial_fill_random {
            rand::thread_rng().gen_range(ratio..=1.0)
        } else {
            ratio
        };
        let ratio = Decimal::from_f64(ratio).unwrap_or(Decimal::ONE);

        let step = contract.qty_step;
        let mut slice = ((quantity * ratio) / step).floor() * step;
        if slice < step {
            slice = step;
        }
        if quantity - slice < contract.min_qty {
            slice = quantity;
        }
        slice
    }

    /// Rest the unfilled remainder as a fresh pending order
    async fn requeue_remainder(&self, order: &Order, remainder: Decimal, base_price: Decimal) {
        let rest = Order {
            id: uuid::Uuid::new_v4().to_string(),
            quantity: remainder,
            order_type: OrderType::Limit,
            limit_price: match order.order_type {
                OrderType::Limit => order.limit_price,
                OrderType::Market => Some(base_price),
            },
            created_at: Utc::now().timestamp_millis(),
            status: OrderStatus::Pending,
            ..order.clone()
        };

        tracing::info!(
            parent_order = %order.id,
            rest_order = %rest.id,
            remainder = %remainder,
            "Partial fill, re-queueing remainder"
        );

        self.state.add_pending_order(rest.clone());
        if let Err(e) = self.store.insert_order(&rest).await {
            tracing::error!(order_id = %rest.id, "Rest order persist failed: {e:#}");
        }
        self.publish_order_event(OrderEvent {
            kind: OrderEventKind::Pending,
            order: rest,
            reason: None,
        })
        .await;
    }
}
