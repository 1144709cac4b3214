//! Risk engine - orchestration
//!
//! Gates order flow (pre-trade and post-fill), evaluates every account on
//! every tick, and liquidates on breach. All transitions are audited into
//! `trade_audit_logs` and fanned out as account events.

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use rust_decimal::Decimal;
use std::sync::Arc;

use super::rules;
use crate::bus::EventBus;
use crate::core_types::AccountId;
use crate::errors::RejectReason;
use crate::instruments::InstrumentRegistry;
use crate::models::{Account, AccountStatus, ExitReason, Trade, TrailingDdMode};
use crate::persistence::DynTradeStore;
use crate::state::SharedTradeState;

/// Trade closing, injected at boot
///
/// The matching engine implements this; the risk engine only ever sees the
/// trait, which keeps the matching <-> risk call graph acyclic.
#[async_trait::async_trait]
pub trait TradeCloser: Send + Sync {
    /// Close an open trade at `close_price` and settle it on the account
    async fn close_trade(
        &self,
        trade: &Trade,
        close_price: Decimal,
        reason: ExitReason,
    ) -> anyhow::Result<()>;
}

pub struct RiskEngine {
    state: Arc<SharedTradeState>,
    registry: Arc<InstrumentRegistry>,
    store: DynTradeStore,
    bus: EventBus,
    closer: OnceCell<Arc<dyn TradeCloser>>,
}

impl RiskEngine {
    pub fn new(
        state: Arc<SharedTradeState>,
        registry: Arc<InstrumentRegistry>,
        store: DynTradeStore,
        bus: EventBus,
    ) -> Self {
        Self {
            state,
            registry,
            store,
            bus,
            closer: OnceCell::new(),
        }
    }

    /// Inject the closer; boot order is risk engine first, then matching
    pub fn set_closer(&self, closer: Arc<dyn TradeCloser>) {
        if self.closer.set(closer).is_err() {
            tracing::warn!("TradeCloser was already injected, ignoring");
        }
    }

    fn closer(&self) -> Option<&Arc<dyn TradeCloser>> {
        let closer = self.closer.get();
        if closer.is_none() {
            tracing::error!("RiskEngine has no TradeCloser injected; breach close skipped");
        }
        closer
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn store(&self) -> &DynTradeStore {
        &self.store
    }

    /// Cloned closer handle for collaborators (daily reset)
    pub fn closer_handle(&self) -> Option<Arc<dyn TradeCloser>> {
        self.closer.get().cloned()
    }

    // ------------------------------------------------------------
    // Gates
    // ------------------------------------------------------------

    /// Pre-trade gate. Pure read over the current account snapshot and
    /// instrument metadata; mutates nothing.
    pub fn pre_trade_check(
        &self,
        account_id: &AccountId,
        symbol: &str,
        quantity: Decimal,
        now: DateTime<Utc>,
    ) -> Result<(), RejectReason> {
        let account = self
            .state
            .get_account(account_id)
            .ok_or(RejectReason::AccountNotFound)?;

        if !account.status.can_trade() {
            return Err(RejectReason::AccountInactive);
        }

        let contract = self
            .registry
            .get_contract(symbol)
            .ok_or(RejectReason::SymbolNotSupported)?;

        if !self.registry.is_within_trading_hours(symbol, now) {
            return Err(RejectReason::MarketClosed);
        }

        if !contract.valid_quantity(quantity) {
            return Err(RejectReason::InvalidLotSize);
        }
        if quantity > contract.max_lots(account.tier) {
            return Err(RejectReason::MaxLotSize);
        }

        // A day already at its loss limit cannot add exposure
        let session = self.state.get_session(account_id);
        if session.day == Some(now.date_naive())
            && account.daily_loss_limit > Decimal::ZERO
            && session.realized <= -account.daily_loss_limit
        {
            return Err(RejectReason::DailyLossLimit);
        }

        Ok(())
    }

    /// Post-fill gate, run after the latency window with the proposed
    /// execution price. Tests the hypothetical post-fill balance; a
    /// failure here means the order is rejected and no trade is created.
    pub fn evaluate_immediate_risk(
        &self,
        account_id: &AccountId,
        symbol: &str,
        quantity: Decimal,
        _exec_price: Decimal,
    ) -> Result<(), RejectReason> {
        let account = self
            .state
            .get_account(account_id)
            .ok_or(RejectReason::AccountNotFound)?;

        if !account.status.can_trade() {
            // The account may have blown while the fill was in flight
            return Err(RejectReason::AccountInactive);
        }

        let contract = self
            .registry
            .get_contract(symbol)
            .ok_or(RejectReason::SymbolNotSupported)?;

        let hypothetical = account.current_balance - contract.commission * quantity;

        if hypothetical <= account.start_balance - account.max_loss {
            return Err(RejectReason::MaxLoss);
        }
        if account.trail_drawdown > Decimal::ZERO && hypothetical <= rules::dd_floor(&account) {
            return Err(RejectReason::TrailingDrawdown);
        }

        Ok(())
    }

    // ------------------------------------------------------------
    // Per-tick evaluation
    // ------------------------------------------------------------

    /// Evaluate every account against the rule matrix after a tick
    ///
    /// Called by the matching engine at the end of its tick handling, so a
    /// limit fill and the evaluation of its consequences land on the same
    /// tick, in order.
    pub async fn evaluate_open_positions(
        &self,
        _symbol: &str,
        price: Decimal,
        prev_price: Decimal,
        now: DateTime<Utc>,
    ) {
        for account in self.state.get_accounts() {
            match account.status {
                AccountStatus::Blown | AccountStatus::Suspended | AccountStatus::Paused => continue,
                AccountStatus::Active | AccountStatus::Passed => {}
            }

            self.advance_peak(&account).await;

            // Re-read: the peak advance may have changed the snapshot
            let Some(account) = self.state.get_account(&account.id) else {
                continue;
            };

            let session = self.state.get_session(&account.id);
            let realized_today = if session.day == Some(now.date_naive()) {
                session.realized
            } else {
                Decimal::ZERO
            };

            if let Some(reason) = rules::check_breach(&account, realized_today) {
                self.handle_breach(&account.id, reason, price, prev_price)
                    .await;
                continue;
            }

            self.check_consistency(&account).await;

            // Re-read: a consistency flag set just now must block the
            // pass check on this same tick
            if let Some(account) = self.state.get_account(&account.id) {
                self.check_profit_target(&account).await;
            }
        }
    }

    /// Persist a peak advance (Live accounts only)
    async fn advance_peak(&self, account: &Account) {
        let new_peak = rules::advance_peak(account);
        if new_peak == account.peak_balance {
            return;
        }
        let updated = self
            .state
            .update_account(&account.id, |a| a.peak_balance = new_peak);
        if let Some(updated) = updated {
            if let Err(e) = self.store.save_account(&updated).await {
                tracing::warn!(account_id = %account.id, "Peak persist failed: {e:#}");
            }
        }
    }

    async fn check_consistency(&self, account: &Account) {
        if account.consistency_flag || !rules::consistency_violated(account) {
            return;
        }
        tracing::info!(account_id = %account.id, best_day = %account.best_day_profit,
            "Consistency rule violated, flagging account");

        if let Some(updated) = self
            .state
            .update_account(&account.id, |a| a.consistency_flag = true)
        {
            let _ = self.store.save_account(&updated).await;
        }
        self.audit(
            "CONSISTENCY_FLAG",
            serde_json::json!({
                "account_id": account.id,
                "best_day_profit": account.best_day_profit,
                "profit_target": account.profit_target,
            }),
        )
        .await;
    }

    async fn check_profit_target(&self, account: &Account) {
        if account.status != AccountStatus::Active || !rules::target_reached(account) {
            return;
        }
        tracing::info!(account_id = %account.id, total = %account.total_profit,
            "Profit target reached, account passed");

        if let Some(updated) = self.state.update_account(&account.id, |a| {
            a.status = AccountStatus::Passed;
            // Pass freezes the trailing drawdown: the peak stops advancing
            a.trailing_dd_mode = TrailingDdMode::Frozen;
        }) {
            let _ = self.store.save_account(&updated).await;
        }
        self.audit(
            "ACCOUNT_PASSED",
            serde_json::json!({
                "account_id": account.id,
                "total_profit": account.total_profit,
                "profit_target": account.profit_target,
            }),
        )
        .await;
    }

    // ------------------------------------------------------------
    // Breach liquidation
    // ------------------------------------------------------------

    /// Blow the account and liquidate every open position
    ///
    /// The account row is updated (status + blown_reason) before any
    /// position is touched, so a crash mid-liquidation still leaves the
    /// account visibly blown. The close loop runs through the injected
    /// closer, never back through the tick handler.
    pub async fn handle_breach(
        &self,
        account_id: &AccountId,
        reason: ExitReason,
        tick_price: Decimal,
        prev_price: Decimal,
    ) {
        tracing::warn!(account_id = %account_id, reason = reason.as_str(), "Risk breach, liquidating");

        let updated = self.state.update_account(account_id, |a| {
            a.status = AccountStatus::Blown;
            a.blown_reason = Some(reason.as_str().to_string());
            a.trailing_dd_mode = TrailingDdMode::Frozen;
        });
        let Some(updated) = updated else {
            tracing::error!(account_id = %account_id, "Breach on unknown account");
            return;
        };
        if let Err(e) = self.store.save_account(&updated).await {
            tracing::error!(account_id = %account_id, "Failed to persist blown status: {e:#}");
        }

        self.audit(
            reason.as_str(),
            serde_json::json!({
                "account_id": account_id,
                "balance": updated.current_balance,
                "tick_price": tick_price,
            }),
        )
        .await;

        let Some(closer) = self.closer() else { return };

        for trade in self.state.open_trades_for_account(account_id) {
            let exit_price =
                rules::breach_exit_price(trade.entry_price, tick_price, prev_price, trade.side);
            if let Err(e) = closer.close_trade(&trade, exit_price, reason).await {
                tracing::error!(trade_id = %trade.id, "Breach close failed: {e:#}");
            }
        }
    }

    /// Audit a risk transition into the durable log
    pub async fn audit(&self, event: &str, payload: serde_json::Value) {
        if let Err(e) = self.store.insert_audit(event, payload).await {
            tracing::warn!(event, "Audit insert failed: {e:#}");
        }
    }
}
