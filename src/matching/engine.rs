//! Engine core: tick processing and trade closing

use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use super::PriceFetcher;
use crate::bus::{AccountEvent, EventBus, TradeEvent, TradeEventKind};
use crate::config::EngineConfig;
use crate::core_types::AccountId;
use crate::instruments::InstrumentRegistry;
use crate::kv::KvStore;
use crate::marks::MarkStore;
use crate::models::{ExitReason, Tick, Trade};
use crate::persistence::DynTradeStore;
use crate::risk::{RiskEngine, TradeCloser};
use crate::state::SharedTradeState;

pub struct MatchingEngine {
    pub(crate) state: Arc<SharedTradeState>,
    pub(crate) registry: Arc<InstrumentRegistry>,
    pub(crate) store: DynTradeStore,
    pub(crate) kv: Arc<dyn KvStore>,
    pub(crate) bus: EventBus,
    pub(crate) marks: Arc<MarkStore>,
    pub(crate) risk: Arc<RiskEngine>,
    pub(crate) cfg: EngineConfig,
    /// Non-reentrant per-account fill/close serialization
    pub(crate) account_locks: DashMap<AccountId, Arc<tokio::sync::Mutex<()>>>,
    /// Short-lived duplicate-order hashes
    pub(crate) recent_orders: Mutex<HashMap<u64, Instant>>,
    pub(crate) price_fetcher: Option<Arc<dyn PriceFetcher>>,
}

impl MatchingEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state: Arc<SharedTradeState>,
        registry: Arc<InstrumentRegistry>,
        store: DynTradeStore,
        kv: Arc<dyn KvStore>,
        bus: EventBus,
        marks: Arc<MarkStore>,
        risk: Arc<RiskEngine>,
        cfg: EngineConfig,
        price_fetcher: Option<Arc<dyn PriceFetcher>>,
    ) -> Self {
        Self {
            state,
            registry,
            store,
            kv,
            bus,
            marks,
            risk,
            cfg,
            account_locks: DashMap::new(),
            recent_orders: Mutex::new(HashMap::new()),
            price_fetcher,
        }
    }

    /// The per-account fill/close mutex
    pub(crate) fn account_lock(&self, account_id: &AccountId) -> Arc<tokio::sync::Mutex<()>> {
        self.account_locks
            .entry(account_id.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Drain the engine-side tick channel
    ///
    /// One consumer per process; ticks for one symbol arrive (and are
    /// handled) in order. The matching path never drops a tick, whatever
    /// the broadcast side is doing.
    pub async fn run(self: Arc<Self>, mut ticks: tokio::sync::mpsc::Receiver<Tick>) {
        tracing::info!("[MatchingEngine] Started, waiting for ticks");
        while let Some(tick) = ticks.recv().await {
            self.process_tick(&tick).await;
        }
        tracing::info!("[MatchingEngine] Tick channel closed, stopping");
    }

    /// Handle one accepted tick, in the fixed order that keeps a single
    /// tick from both filling a limit order and closing it again:
    /// mark update -> uPnL -> limit fills -> SL/TP -> risk evaluation.
    pub async fn process_tick(&self, tick: &Tick) {
        // 1. Mark update; remember the replaced price for slippage gaps
        let prev = self
            .marks
            .set(&tick.symbol, tick.price, tick.ts)
            .unwrap_or(tick.price);

        // 2. Unrealized PnL per account (observational, nothing persisted)
        self.publish_upnl(tick);

        // 3. Limit-fill scan
        for order in self.state.pending_orders_for_symbol(&tick.symbol) {
            if !order.limit_crossed(tick.price) {
                continue;
            }
            // Claim the order before the (suspending) fill so the next
            // tick cannot double-fill it
            if self.state.remove_pending_order(&order.id).is_none() {
                continue;
            }
            let _ = self
                .fill_order(order, super::fills::FillPricing::Pinned {
                    base: tick.price,
                    prev,
                })
                .await;
        }

        // 4. SL/TP scan; fresh snapshot so step-3 fills are visible but
        // protected by the grace window
        let now_ms = Utc::now().timestamp_millis();
        for trade in self.state.open_trades_for_symbol(&tick.symbol) {
            if now_ms - trade.time_opened < self.cfg.sltp_grace_ms {
                continue;
            }
            if trade.sl_crossed(tick.price) {
                let stop = trade.stop_loss.expect("sl_crossed implies stop_loss");
                if let Err(e) = self.close_trade(&trade, stop, ExitReason::SlHit).await {
                    tracing::error!(trade_id = %trade.id, "SL close failed: {e:#}");
                }
            } else if trade.tp_crossed(tick.price) {
                let target = trade.take_profit.expect("tp_crossed implies take_profit");
                if let Err(e) = self.close_trade(&trade, target, ExitReason::TpHit).await {
                    tracing::error!(trade_id = %trade.id, "TP close failed: {e:#}");
                }
            }
        }

        // 5. Hand off to the risk engine
        self.risk
            .evaluate_open_positions(&tick.symbol, tick.price, prev, Utc::now())
            .await;
    }

    /// Aggregate unrealized PnL per account for this symbol and emit
    /// `account_upnl` events
    fn publish_upnl(&self, tick: &Tick) {
        let Some(contract) = self.registry.get_contract(&tick.symbol) else {
            return;
        };

        let mut per_account: HashMap<AccountId, Decimal> = HashMap::new();
        for trade in self.state.open_trades_for_symbol(&tick.symbol) {
            let upnl = trade.price_pnl(tick.price, contract.tick_value);
            *per_account.entry(trade.account_id).or_default() += upnl;
        }

        for (account_id, upnl) in per_account {
            self.bus.publish_account(AccountEvent::Upnl {
                account_id,
                upnl,
                ts: tick.ts,
            });
        }
    }

    /// Close an open trade at `close_price` and settle it on the account
    ///
    /// Serialized with fills through the per-account mutex. Net PnL folds
    /// the entry commission carried in `trade.pnl`; no closing commission
    /// is charged.
    pub async fn close_trade(
        &self,
        trade: &Trade,
        close_price: Decimal,
        reason: ExitReason,
    ) -> anyhow::Result<()> {
        let lock = self.account_lock(&trade.account_id);
        let _guard = lock.lock().await;

        // Already closed by a racing path (breach vs SL on the same tick)
        let Some(mut trade) = self.state.remove_open_trade(&trade.id) else {
            return Ok(());
        };

        let tick_value = self
            .registry
            .get_contract(&trade.symbol)
            .map(|c| c.tick_value)
            .unwrap_or(Decimal::ONE);

        let net_pnl = trade.price_pnl(close_price, tick_value) + trade.pnl;
        let now = Utc::now();

        trade.pnl = net_pnl;
        trade.exit_price = Some(close_price);
        trade.time_closed = Some(now.timestamp_millis());
        trade.exit_reason = Some(reason);

        tracing::info!(
            trade_id = %trade.id,
            account_id = %trade.account_id,
            reason = reason.as_str(),
            exit_price = %close_price,
            net_pnl = %net_pnl,
            "Trade closed"
        );

        if let Err(e) = self.store.close_trade(&trade).await {
            tracing::error!(trade_id = %trade.id, "Trade close persist failed: {e:#}");
        }

        let event = TradeEvent {
            kind: TradeEventKind::Closed,
            trade: trade.clone(),
            reason: Some(reason),
        };
        self.bus.publish_trade(event.clone());
        if let Ok(payload) = serde_json::to_string(&event) {
            if let Err(e) = self.kv.publish("trade_events", &payload).await {
                tracing::warn!("KV publish trade_events failed: {e}");
            }
        }

        // Apply to the account and the session accumulator
        let today = now.date_naive();
        let session = self
            .state
            .apply_session_pnl(&trade.account_id, net_pnl, today);
        let updated = self.state.update_account(&trade.account_id, |a| {
            a.current_balance += net_pnl;
            a.total_profit += net_pnl;
            if session.realized > a.best_day_profit {
                a.best_day_profit = session.realized;
            }
        });
        if let Some(updated) = updated {
            if let Err(e) = self.store.save_account(&updated).await {
                tracing::error!(account_id = %updated.id, "Account persist failed: {e:#}");
            }
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl TradeCloser for MatchingEngine {
    async fn close_trade(
        &self,
        trade: &Trade,
        close_price: Decimal,
        reason: ExitReason,
    ) -> anyhow::Result<()> {
        MatchingEngine::close_trade(self, trade, close_price, reason).await
    }
}
