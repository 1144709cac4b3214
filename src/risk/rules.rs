//! Pure rule calculations
//!
//! Deterministic functions over account numbers; no state, no I/O. The
//! orchestration in [`super::engine`] decides when to call these and what
//! to do with the answers.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::models::{Account, ExitReason, Side, TrailingDdMode};

/// Effective peak for drawdown math: the recorded peak, floored at the
/// starting balance.
#[inline]
pub fn effective_peak(account: &Account) -> Decimal {
    account.peak_balance.max(account.start_balance)
}

/// The trailing drawdown floor
///
/// Live mode: the floor follows the advancing peak but never sits below
/// `start_balance - trail_drawdown`. Frozen mode (passed accounts): the
/// peak is pinned, so the floor stops rising.
pub fn dd_floor(account: &Account) -> Decimal {
    let peak = effective_peak(account);
    match account.trailing_dd_mode {
        TrailingDdMode::Live => {
            (account.start_balance - account.trail_drawdown).max(peak - account.trail_drawdown)
        }
        TrailingDdMode::Frozen => peak - account.trail_drawdown,
    }
}

/// New peak after observing `current_balance`; only Live mode advances
pub fn advance_peak(account: &Account) -> Decimal {
    match account.trailing_dd_mode {
        TrailingDdMode::Live => effective_peak(account).max(account.current_balance),
        TrailingDdMode::Frozen => effective_peak(account),
    }
}

/// First breached rule, in evaluation order, or None
///
/// `session_realized` is today's closed PnL (the Session PnL accumulator).
pub fn check_breach(account: &Account, session_realized: Decimal) -> Option<ExitReason> {
    // Static max loss
    if account.current_balance <= account.start_balance - account.max_loss {
        return Some(ExitReason::MaxLoss);
    }
    // Daily loss limit over closed PnL
    if account.daily_loss_limit > Decimal::ZERO && session_realized <= -account.daily_loss_limit {
        return Some(ExitReason::DailyLossLimit);
    }
    // Max intraday loss: peak-to-trough from the day's starting equity
    if account.max_intraday_loss > Decimal::ZERO
        && account.start_of_day_equity - account.current_balance >= account.max_intraday_loss
    {
        return Some(ExitReason::MaxIntradayLoss);
    }
    // Trailing drawdown
    if account.trail_drawdown > Decimal::ZERO && account.current_balance <= dd_floor(account) {
        return Some(ExitReason::TrailingDrawdown);
    }
    None
}

/// Consistency rule: one day may not contribute more than half the target
#[inline]
pub fn consistency_violated(account: &Account) -> bool {
    account.profit_target > Decimal::ZERO
        && account.best_day_profit > account.profit_target * dec!(0.5)
}

/// Profit-target pass: target reached without a consistency violation
#[inline]
pub fn target_reached(account: &Account) -> bool {
    account.profit_target > Decimal::ZERO
        && account.total_profit >= account.profit_target
        && !account.consistency_flag
}

/// Exit price for a breach liquidation
///
/// `slippage = entry * 0.0001 + |tick - prev_tick| * 0.25`, applied on the
/// exit side: closing a long sells (price reduced), closing a short buys
/// back (price raised). Normal SL/TP exits do not come through here.
pub fn breach_exit_price(
    entry_price: Decimal,
    tick_price: Decimal,
    prev_tick: Decimal,
    position_side: Side,
) -> Decimal {
    let liquidity_gap = (tick_price - prev_tick).abs();
    let slippage = entry_price * dec!(0.0001) + liquidity_gap * dec!(0.25);
    match position_side {
        Side::Buy => tick_price - slippage,
        Side::Sell => tick_price + slippage,
    }
}
