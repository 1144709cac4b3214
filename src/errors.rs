//! Tagged business error codes
//!
//! Every business decision (validation, risk, duplicate suppression) is
//! returned as a [`RejectReason`], never thrown across a module boundary.
//! Only unexpected infrastructure failures travel as `anyhow::Error` up to
//! the top-level logger.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reason an order was refused
///
/// The string form is the wire code: HTTP 400 bodies carry it as
/// `{status:"error", error:CODE}` and the WS path attaches it to
/// `order_reject` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectReason {
    // -- validation --------------------------------------------------
    #[error("Missing required field")]
    MissingField,
    #[error("Side must be buy or sell")]
    InvalidSide,
    #[error("Order type must be market or limit")]
    InvalidOrderType,
    #[error("Limit orders require a limit price")]
    LimitPriceRequired,
    #[error("Quantity below minimum or not a step multiple")]
    InvalidLotSize,
    #[error("Symbol is not supported")]
    SymbolNotSupported,
    #[error("No contract metadata for symbol")]
    ContractMetaNotFound,
    #[error("Market is closed for this instrument")]
    MarketClosed,

    // -- risk --------------------------------------------------------
    #[error("Account not found")]
    AccountNotFound,
    #[error("Account is not active")]
    AccountInactive,
    #[error("Quantity exceeds the tier lot cap")]
    MaxLotSize,
    #[error("Static max loss breached")]
    MaxLoss,
    #[error("Trailing drawdown breached")]
    TrailingDrawdown,
    #[error("Daily loss limit breached")]
    DailyLossLimit,
    #[error("Max intraday loss breached")]
    MaxIntradayLoss,

    // -- operational -------------------------------------------------
    #[error("No live price available")]
    NoLivePrice,
    #[error("Duplicate order")]
    DuplicateOrder,
    #[error("Risk engine could not evaluate the account")]
    RiskEngineError,
}

impl RejectReason {
    /// Wire code, e.g. `INVALID_LOT_SIZE`
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingField => "MISSING_FIELD",
            Self::InvalidSide => "INVALID_SIDE",
            Self::InvalidOrderType => "INVALID_ORDER_TYPE",
            Self::LimitPriceRequired => "LIMIT_PRICE_REQUIRED",
            Self::InvalidLotSize => "INVALID_LOT_SIZE",
            Self::SymbolNotSupported => "SYMBOL_NOT_SUPPORTED",
            Self::ContractMetaNotFound => "CONTRACT_META_NOT_FOUND",
            Self::MarketClosed => "MARKET_CLOSED",
            Self::AccountNotFound => "ACCOUNT_NOT_FOUND",
            Self::AccountInactive => "ACCOUNT_INACTIVE",
            Self::MaxLotSize => "MAX_LOT_SIZE",
            Self::MaxLoss => "MAX_LOSS",
            Self::TrailingDrawdown => "TRAILING_DRAWDOWN",
            Self::DailyLossLimit => "DAILY_LOSS_LIMIT",
            Self::MaxIntradayLoss => "MAX_INTRADAY_LOSS",
            Self::NoLivePrice => "NO_LIVE_PRICE",
            Self::DuplicateOrder => "DUPLICATE_ORDER",
            Self::RiskEngineError => "RISK_ENGINE_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_matches_serde_tag() {
        // The wire code and the serde representation must never diverge
        let json = serde_json::to_string(&RejectReason::InvalidLotSize).unwrap();
        assert_eq!(json, "\"INVALID_LOT_SIZE\"");
        assert_eq!(RejectReason::InvalidLotSize.code(), "INVALID_LOT_SIZE");

        let json = serde_json::to_string(&RejectReason::NoLivePrice).unwrap();
        assert_eq!(json, "\"NO_LIVE_PRICE\"");
    }
}
