// models.rs - Core account, order and trade types

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core_types::{AccountId, EpochMs, OrderId, SymbolKey, TradeId, UserId};

/// Order side: Buy or Sell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Direction multiplier for PnL math: +1 for buys, -1 for sells
    #[inline]
    pub fn sign(&self) -> Decimal {
        match self {
            Side::Buy => Decimal::ONE,
            Side::Sell => Decimal::NEGATIVE_ONE,
        }
    }

    /// The opposite side
    pub fn flip(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market, // Execute immediately at the current mark (plus costs)
    Limit,  // Rest until the mark crosses limit_price
}

/// Order status - terminal states for a persisted order
///
/// Once an order row exists it MUST reach one of these states, it never
/// disappears or becomes unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,  // Limit order resting, waiting for a crossing tick
    Filled,   // Executed; an open trade exists (or existed)
    Rejected, // Refused by validation or the risk gate
    Cancelled,
}

/// Account tier - gates lot-size caps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountTier {
    Evaluation,
    Funded,
}

/// Account lifecycle status
///
/// `Blown` and `Passed` are terminal for drawdown math: the trailing peak
/// freezes and no further fills are accepted for blown accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Paused,
    Passed,
    Blown,
    Suspended,
}

impl AccountStatus {
    /// Whether the account may open new positions
    ///
    /// Passed accounts keep trading (under the frozen drawdown floor)
    /// until the platform converts or retires them.
    #[inline]
    pub fn can_trade(&self) -> bool {
        matches!(self, AccountStatus::Active | AccountStatus::Passed)
    }
}

/// Trailing drawdown mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TrailingDdMode {
    /// Peak advances with equity; the drawdown floor follows it up
    Live,
    /// Peak is pinned (account passed, or frozen by ops); floor no longer rises
    Frozen,
}

/// Why a trade was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    #[serde(rename = "SL Hit")]
    SlHit,
    #[serde(rename = "TP Hit")]
    TpHit,
    #[serde(rename = "DAILY_LOSS_LIMIT")]
    DailyLossLimit,
    #[serde(rename = "MAX_LOSS")]
    MaxLoss,
    #[serde(rename = "MAX_INTRADAY_LOSS")]
    MaxIntradayLoss,
    #[serde(rename = "TRAILING_DRAWDOWN")]
    TrailingDrawdown,
    #[serde(rename = "DAILY_RESET")]
    DailyReset,
    #[serde(rename = "MANUAL")]
    Manual,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SlHit => "SL Hit",
            Self::TpHit => "TP Hit",
            Self::DailyLossLimit => "DAILY_LOSS_LIMIT",
            Self::MaxLoss => "MAX_LOSS",
            Self::MaxIntradayLoss => "MAX_INTRADAY_LOSS",
            Self::TrailingDrawdown => "TRAILING_DRAWDOWN",
            Self::DailyReset => "DAILY_RESET",
            Self::Manual => "MANUAL",
        }
    }

    /// True for exits caused by a risk breach (liquidation path)
    pub fn is_breach(&self) -> bool {
        matches!(
            self,
            Self::DailyLossLimit | Self::MaxLoss | Self::MaxIntradayLoss | Self::TrailingDrawdown
        )
    }
}

// ============================================================
// ORDER
// ============================================================

/// An order as submitted by the gateway (already field-validated)
///
/// Market orders fill inside `place_order`; limit orders rest in the
/// pending list until a tick crosses `limit_price`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub account_id: AccountId,
    pub user_id: UserId,
    pub symbol: SymbolKey,
    pub side: Side,
    pub quantity: Decimal,
    pub order_type: OrderType,
    pub limit_price: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub idempotency_key: Option<String>,
    pub created_at: EpochMs,
    pub status: OrderStatus,
}

impl Order {
    /// Whether a tick at `price` crosses this limit order
    ///
    /// Buys fill when the market trades at or below the limit, sells at or
    /// above. Market orders never rest, so this is limit-only.
    #[inline]
    pub fn limit_crossed(&self, price: Decimal) -> bool {
        match (self.order_type, self.limit_price) {
            (OrderType::Limit, Some(limit)) => match self.side {
                Side::Buy => price <= limit,
                Side::Sell => price >= limit,
            },
            _ => false,
        }
    }
}

// ============================================================
// TRADE
// ============================================================

/// A position opened by a fill
///
/// `pnl` is seeded with the entry commission (negative) and becomes the
/// final realized figure on close. A trade is open iff `time_closed` is
/// unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: TradeId,
    pub order_id: OrderId,
    pub account_id: AccountId,
    pub symbol: SymbolKey,
    pub side: Side,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub time_opened: EpochMs,
    pub pnl: Decimal,
    pub exit_price: Option<Decimal>,
    pub time_closed: Option<EpochMs>,
    pub exit_reason: Option<ExitReason>,
}

impl Trade {
    #[inline]
    pub fn is_open(&self) -> bool {
        self.time_closed.is_none()
    }

    /// Price move valued in money: `(mark - entry) * qty * tick_value`,
    /// negated for sells. Does not include the entry commission.
    #[inline]
    pub fn price_pnl(&self, mark: Decimal, tick_value: Decimal) -> Decimal {
        (mark - self.entry_price) * self.quantity * tick_value * self.side.sign()
    }

    /// Whether a tick at `price` crosses the stop loss
    #[inline]
    pub fn sl_crossed(&self, price: Decimal) -> bool {
        match (self.side, self.stop_loss) {
            (Side::Buy, Some(sl)) => price <= sl,
            (Side::Sell, Some(sl)) => price >= sl,
            _ => false,
        }
    }

    /// Whether a tick at `price` crosses the take profit
    #[inline]
    pub fn tp_crossed(&self, price: Decimal) -> bool {
        match (self.side, self.take_profit) {
            (Side::Buy, Some(tp)) => price >= tp,
            (Side::Sell, Some(tp)) => price <= tp,
            _ => false,
        }
    }
}

// ============================================================
// ACCOUNT
// ============================================================

/// A prop-firm evaluation or funded account
///
/// The in-memory copy is authoritative during a tick; every mutation is
/// flushed to the store before it counts as durable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub user_id: UserId,
    pub tier: AccountTier,
    pub status: AccountStatus,
    pub start_balance: Decimal,
    pub current_balance: Decimal,
    /// Monotone non-decreasing while trailing_dd_mode is Live
    pub peak_balance: Decimal,
    pub max_loss: Decimal,
    pub daily_loss_limit: Decimal,
    pub max_intraday_loss: Decimal,
    pub trail_drawdown: Decimal,
    pub trailing_dd_mode: TrailingDdMode,
    pub profit_target: Decimal,
    pub total_profit: Decimal,
    pub best_day_profit: Decimal,
    pub consistency_flag: bool,
    pub start_of_day_equity: Decimal,
    pub session_day: NaiveDate,
    /// Account policy: force-close positions at the daily reset
    pub close_on_daily_reset: bool,
    pub blown_reason: Option<String>,
}

// ============================================================
// SESSION PNL
// ============================================================

/// Per-account, per-calendar-day realized PnL accumulator
///
/// Rebuilt on day rollover; drives the daily-loss and consistency rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionPnl {
    pub day: Option<NaiveDate>,
    pub realized: Decimal,
    pub best_day: Decimal,
    pub total: Decimal,
}

impl SessionPnl {
    /// Fold a closed trade's net PnL in, rolling the day over first if the
    /// calendar date changed.
    pub fn apply(&mut self, net_pnl: Decimal, today: NaiveDate) {
        if self.day != Some(today) {
            self.day = Some(today);
            self.realized = Decimal::ZERO;
        }
        self.realized += net_pnl;
        self.total += net_pnl;
        if self.realized > self.best_day {
            self.best_day = self.realized;
        }
    }
}

// ============================================================
// MARKET DATA
// ============================================================

/// A single normalized price event from an upstream trade stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: SymbolKey,
    pub price: Decimal,
    pub ts: EpochMs,
}

/// Pass-through depth snapshot from an upstream depth stream
///
/// Bids descending, asks ascending, exactly as the exchange sends them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepthSnapshot {
    pub symbol: SymbolKey,
    pub bids: Vec<(Decimal, Decimal)>,
    pub asks: Vec<(Decimal, Decimal)>,
    pub ts: EpochMs,
}

/// Latest accepted price for a symbol, as cached in the KV hash
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub price: Decimal,
    pub ts: EpochMs,
}

// ============================================================
// TESTS
// ============================================================
