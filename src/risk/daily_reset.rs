//! Daily reset job
//!
//! At every UTC day rollover: optionally force-close open positions
//! (accounts with `close_on_daily_reset` set), then re-anchor the session:
//! `session_day = today`, `start_of_day_equity = current_balance`, daily
//! counters zeroed. Every reset is audited.

use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use std::sync::Arc;

use super::engine::RiskEngine;
use crate::marks::MarkStore;
use crate::models::ExitReason;
use crate::state::SharedTradeState;

pub struct DailyResetJob {
    risk: Arc<RiskEngine>,
    state: Arc<SharedTradeState>,
    marks: Arc<MarkStore>,
}

impl DailyResetJob {
    pub fn new(risk: Arc<RiskEngine>, state: Arc<SharedTradeState>, marks: Arc<MarkStore>) -> Self {
        Self { risk, state, marks }
    }

    /// Sleep until each midnight and run the reset
    pub async fn run(self: Arc<Self>) {
        loop {
            let now = Utc::now();
            let next_midnight = (now + ChronoDuration::days(1))
                .date_naive()
                .and_hms_opt(0, 0, 0)
                .expect("midnight exists")
                .and_utc();
            let sleep_for = (next_midnight - now)
                .to_std()
                .unwrap_or(std::time::Duration::from_secs(60));

            tracing::info!(seconds = sleep_for.as_secs(), "Daily reset scheduled");
            tokio::time::sleep(sleep_for).await;

            self.reset_all(Utc::now().date_naive()).await;
        }
    }

    /// Reset every managed account for `today`
    pub async fn reset_all(&self, today: NaiveDate) {
        tracing::info!(%today, "Running daily reset");

        for account in self.state.get_accounts() {
            if account.session_day == today {
                continue;
            }

            // Account policy: flat overnight
            if account.close_on_daily_reset {
                self.force_close_positions(&account.id).await;
            }

            // Re-read: force-closes settled PnL into the balance
            let Some(account) = self.state.get_account(&account.id) else {
                continue;
            };

            let updated = self.state.update_account(&account.id, |a| {
                a.session_day = today;
                a.start_of_day_equity = a.current_balance;
            });
            self.state.reset_session_day(&account.id, today);

            if let Some(updated) = updated {
                if let Err(e) = self.risk.store().save_account(&updated).await {
                    tracing::warn!(account_id = %updated.id, "Daily reset persist failed: {e:#}");
                }
            }

            self.risk
                .audit(
                    "DAILY_RESET",
                    serde_json::json!({
                        "account_id": account.id,
                        "start_of_day_equity": account.current_balance,
                        "day": today,
                    }),
                )
                .await;
        }
    }

    /// Close all open trades of one account at the last known mark
    async fn force_close_positions(&self, account_id: &str) {
        let Some(closer) = self.risk.closer_handle() else {
            tracing::error!("Daily reset has no closer, positions left open");
            return;
        };

        for trade in self.state.open_trades_for_account(account_id) {
            let Some(mark) = self.marks.get(&trade.symbol) else {
                tracing::warn!(trade_id = %trade.id, symbol = %trade.symbol,
                    "No mark for daily-reset close, leaving position open");
                continue;
            };
            if let Err(e) = closer
                .close_trade(&trade, mark.price, ExitReason::DailyReset)
                .await
            {
                tracing::error!(trade_id = %trade.id, "Daily-reset close failed: {e:#}");
            }
        }
    }
}
