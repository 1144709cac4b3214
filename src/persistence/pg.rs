//! PostgreSQL store implementation
//!
//! Plain `sqlx::query` with explicit column reads; enum fields travel as
//! their wire strings. Every call runs behind the shared retry policy.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::Row;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use std::time::Duration;

use super::retry::with_retry;
use super::TradeStore;
use crate::core_types::OrderId;
use crate::models::{
    Account, AccountStatus, AccountTier, ExitReason, Order, OrderStatus, OrderType, Side, Trade,
    TrailingDdMode,
};

/// PostgreSQL-backed trade store
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new connection pool
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;

        tracing::info!("PostgreSQL connection pool established");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health
    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// ------------------------------------------------------------
// Row mapping (wire strings <-> enums)
// ------------------------------------------------------------

fn side_from_str(s: &str) -> Result<Side> {
    match s {
        "buy" => Ok(Side::Buy),
        "sell" => Ok(Side::Sell),
        other => anyhow::bail!("unknown side '{other}'"),
    }
}

fn side_str(side: Side) -> &'static str {
    match side {
        Side::Buy => "buy",
        Side::Sell => "sell",
    }
}

fn status_str(status: AccountStatus) -> &'static str {
    match status {
        AccountStatus::Active => "active",
        AccountStatus::Paused => "paused",
        AccountStatus::Passed => "passed",
        AccountStatus::Blown => "blown",
        AccountStatus::Suspended => "suspended",
    }
}

fn status_from_str(s: &str) -> Result<AccountStatus> {
    match s {
        "active" => Ok(AccountStatus::Active),
        "paused" => Ok(AccountStatus::Paused),
        "passed" => Ok(AccountStatus::Passed),
        "blown" => Ok(AccountStatus::Blown),
        "suspended" => Ok(AccountStatus::Suspended),
        other => anyhow::bail!("unknown account status '{other}'"),
    }
}

fn order_status_str(status: OrderStatus) -> &'static str {
    match status {
        OrderStatus::Pending => "pending",
        OrderStatus::Filled => "filled",
        OrderStatus::Rejected => "rejected",
        OrderStatus::Cancelled => "cancelled",
    }
}

fn exit_reason_from_str(s: &str) -> Option<ExitReason> {
    match s {
        "SL Hit" => Some(ExitReason::SlHit),
        "TP Hit" => Some(ExitReason::TpHit),
        "DAILY_LOSS_LIMIT" => Some(ExitReason::DailyLossLimit),
        "MAX_LOSS" => Some(ExitReason::MaxLoss),
        "MAX_INTRADAY_LOSS" => Some(ExitReason::MaxIntradayLoss),
        "TRAILING_DRAWDOWN" => Some(ExitReason::TrailingDrawdown),
        "DAILY_RESET" => Some(ExitReason::DailyReset),
        "MANUAL" => Some(ExitReason::Manual),
        _ => None,
    }
}

fn account_from_row(r: &PgRow) -> Result<Account> {
    Ok(Account {
        id: r.get("id"),
        user_id: r.get("user_id"),
        tier: match r.get::<&str, _>("tier") {
            "funded" => AccountTier::Funded,
            _ => AccountTier::Evaluation,
        },
        status: status_from_str(r.get("status"))?,
        start_balance: r.get("start_balance"),
        current_balance: r.get("current_balance"),
        peak_balance: r.get("peak_balance"),
        max_loss: r.get("max_loss"),
        daily_loss_limit: r.get("daily_loss_limit"),
        max_intraday_loss: r.get("max_intraday_loss"),
        trail_drawdown: r.get("trail_drawdown"),
        trailing_dd_mode: match r.get::<&str, _>("trailing_dd_mode") {
            "FROZEN" => TrailingDdMode::Frozen,
            _ => TrailingDdMode::Live,
        },
        profit_target: r.get("profit_target"),
        total_profit: r.get("total_profit"),
        best_day_profit: r.get("best_day_profit"),
        consistency_flag: r.get("consistency_flag"),
        start_of_day_equity: r.get("start_of_day_equity"),
        session_day: r.get("session_day"),
        close_on_daily_reset: r.get("close_on_daily_reset"),
        blown_reason: r.get("blown_reason"),
    })
}

fn order_from_row(r: &PgRow) -> Result<Order> {
    Ok(Order {
        id: r.get("id"),
        account_id: r.get("account_id"),
        user_id: r.get("user_id"),
        symbol: r.get("symbol"),
        side: side_from_str(r.get("side"))?,
        quantity: r.get("quantity"),
        order_type: match r.get::<&str, _>("order_type") {
            "market" => OrderType::Market,
            _ => OrderType::Limit,
        },
        limit_price: r.get("limit_price"),
        stop_loss: r.get("stop_loss"),
        take_profit: r.get("take_profit"),
        idempotency_key: r.get("idempotency_key"),
        created_at: r.get("created_at"),
        status: OrderStatus::Pending,
    })
}

fn trade_from_row(r: &PgRow) -> Result<Trade> {
    Ok(Trade {
        id: r.get("id"),
        order_id: r.get("order_id"),
        account_id: r.get("account_id"),
        symbol: r.get("symbol"),
        side: side_from_str(r.get("side"))?,
        quantity: r.get("quantity"),
        entry_price: r.get("entry_price"),
        stop_loss: r.get("stop_loss"),
        take_profit: r.get("take_profit"),
        time_opened: r.get("time_opened"),
        pnl: r.get("pnl"),
        exit_price: r.get("exit_price"),
        time_closed: r.get("time_closed"),
        exit_reason: r
            .get::<Option<&str>, _>("exit_reason")
            .and_then(exit_reason_from_str),
    })
}

#[async_trait]
impl TradeStore for PgStore {
    async fn load_accounts(&self) -> Result<Vec<Account>> {
        let rows = with_retry("load_accounts", || async {
            sqlx::query(
                r#"SELECT id, user_id, tier, status, start_balance, current_balance,
                          peak_balance, max_loss, daily_loss_limit, max_intraday_loss,
                          trail_drawdown, trailing_dd_mode, profit_target, total_profit,
                          best_day_profit, consistency_flag, start_of_day_equity,
                          session_day, close_on_daily_reset, blown_reason
                   FROM accounts
                   WHERE status NOT IN ('suspended')"#,
            )
            .fetch_all(&self.pool)
            .await
            .context("fetch accounts")
        })
        .await?;

        rows.iter().map(account_from_row).collect()
    }

    async fn save_account(&self, account: &Account) -> Result<()> {
        let account = account.clone();
        with_retry("save_account", || {
            let a = account.clone();
            async move {
                sqlx::query(
                    r#"UPDATE accounts
                       SET status = $2, current_balance = $3, peak_balance = $4,
                           total_profit = $5, best_day_profit = $6, consistency_flag = $7,
                           trailing_dd_mode = $8, start_of_day_equity = $9,
                           session_day = $10, blown_reason = $11
                       WHERE id = $1"#,
                )
                .bind(&a.id)
                .bind(status_str(a.status))
                .bind(a.current_balance)
                .bind(a.peak_balance)
                .bind(a.total_profit)
                .bind(a.best_day_profit)
                .bind(a.consistency_flag)
                .bind(match a.trailing_dd_mode {
                    TrailingDdMode::Live => "LIVE",
                    TrailingDdMode::Frozen => "FROZEN",
                })
                .bind(a.start_of_day_equity)
                .bind(a.session_day)
                .bind(&a.blown_reason)
                .execute(&self.pool)
                .await
                .context("update account")?;
                Ok(())
            }
        })
        .await
    }

    async fn insert_order(&self, order: &Order) -> Result<()> {
        let order = order.clone();
        with_retry("insert_order", || {
            let o = order.clone();
            async move {
                sqlx::query(
                    r#"INSERT INTO orders
                         (id, account_id, user_id, symbol, side, quantity, order_type,
                          limit_price, stop_loss, take_profit, idempotency_key,
                          created_at, status)
                       VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                       ON CONFLICT (id) DO NOTHING"#,
                )
                .bind(&o.id)
                .bind(&o.account_id)
                .bind(&o.user_id)
                .bind(&o.symbol)
                .bind(side_str(o.side))
                .bind(o.quantity)
                .bind(match o.order_type {
                    OrderType::Market => "market",
                    OrderType::Limit => "limit",
                })
                .bind(o.limit_price)
                .bind(o.stop_loss)
                .bind(o.take_profit)
                .bind(&o.idempotency_key)
                .bind(o.created_at)
                .bind(order_status_str(o.status))
                .execute(&self.pool)
                .await
                .context("insert order")?;
                Ok(())
            }
        })
        .await
    }

    async fn update_order_status(&self, order_id: &OrderId, status: OrderStatus) -> Result<()> {
        let order_id = order_id.clone();
        with_retry("update_order_status", || {
            let id = order_id.clone();
            async move {
                sqlx::query(r#"UPDATE orders SET status = $2 WHERE id = $1"#)
                    .bind(&id)
                    .bind(order_status_str(status))
                    .execute(&self.pool)
                    .await
                    .context("update order status")?;
                Ok(())
            }
        })
        .await
    }

    async fn insert_trade(&self, trade: &Trade) -> Result<()> {
        let trade = trade.clone();
        with_retry("insert_trade", || {
            let t = trade.clone();
            async move {
                sqlx::query(
                    r#"INSERT INTO trades
                         (id, order_id, account_id, symbol, side, quantity, entry_price,
                          stop_loss, take_profit, time_opened, pnl, is_open)
                       VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, TRUE)
                       ON CONFLICT (id) DO NOTHING"#,
                )
                .bind(&t.id)
                .bind(&t.order_id)
                .bind(&t.account_id)
                .bind(&t.symbol)
                .bind(side_str(t.side))
                .bind(t.quantity)
                .bind(t.entry_price)
                .bind(t.stop_loss)
                .bind(t.take_profit)
                .bind(t.time_opened)
                .bind(t.pnl)
                .execute(&self.pool)
                .await
                .context("insert trade")?;
                Ok(())
            }
        })
        .await
    }

    async fn close_trade(&self, trade: &Trade) -> Result<()> {
        let trade = trade.clone();
        with_retry("close_trade", || {
            let t = trade.clone();
            async move {
                sqlx::query(
                    r#"UPDATE trades
                       SET is_open = FALSE, exit_price = $2, time_closed = $3,
                           exit_reason = $4, pnl = $5
                       WHERE id = $1"#,
                )
                .bind(&t.id)
                .bind(t.exit_price)
                .bind(t.time_closed)
                .bind(t.exit_reason.map(|r| r.as_str()))
                .bind(t.pnl)
                .execute(&self.pool)
                .await
                .context("close trade")?;
                Ok(())
            }
        })
        .await
    }

    async fn insert_audit(&self, event: &str, payload: serde_json::Value) -> Result<()> {
        let event = event.to_string();
        with_retry("insert_audit", || {
            let event = event.clone();
            let payload = payload.clone();
            async move {
                sqlx::query(
                    r#"INSERT INTO trade_audit_logs (event, payload, created_at)
                       VALUES ($1, $2, NOW())"#,
                )
                .bind(&event)
                .bind(payload)
                .execute(&self.pool)
                .await
                .context("insert audit row")?;
                Ok(())
            }
        })
        .await
    }

    async fn order_exists(&self, order_id: &OrderId) -> Result<bool> {
        let row = sqlx::query(r#"SELECT 1 AS one FROM orders WHERE id = $1"#)
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await
            .context("order exists")?;
        Ok(row.is_some())
    }

    async fn load_open_trades(&self) -> Result<Vec<Trade>> {
        let rows = with_retry("load_open_trades", || async {
            sqlx::query(
                r#"SELECT id, order_id, account_id, symbol, side, quantity, entry_price,
                          stop_loss, take_profit, time_opened, pnl, exit_price,
                          time_closed, exit_reason
                   FROM trades WHERE is_open = TRUE"#,
            )
            .fetch_all(&self.pool)
            .await
            .context("fetch open trades")
        })
        .await?;

        rows.iter().map(trade_from_row).collect()
    }

    async fn load_pending_orders(&self) -> Result<Vec<Order>> {
        let rows = with_retry("load_pending_orders", || async {
            sqlx::query(
                r#"SELECT id, account_id, user_id, symbol, side, quantity, order_type,
                          limit_price, stop_loss, take_profit, idempotency_key, created_at
                   FROM orders WHERE status = 'pending'"#,
            )
            .fetch_all(&self.pool)
            .await
            .context("fetch pending orders")
        })
        .await?;

        rows.iter().map(order_from_row).collect()
    }
}
