//! Order submission endpoint

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::errors::RejectReason;
use crate::gateway::state::AppState;
use crate::matching::{OrderRequest, PlaceOutcome};
use crate::models::{OrderType, Side};

/// Raw request body; every field optional so validation can answer with
/// the precise tagged code instead of a serde parse error
#[derive(Debug, Deserialize)]
pub struct PlaceOrderBody {
    pub user_id: Option<String>,
    pub account_id: Option<String>,
    pub symbol: Option<String>,
    pub side: Option<String>,
    pub quantity: Option<Decimal>,
    pub order_type: Option<String>,
    pub limit_price: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub idempotency_key: Option<String>,
}

fn validate(body: PlaceOrderBody) -> Result<OrderRequest, RejectReason> {
    let user_id = body.user_id.ok_or(RejectReason::MissingField)?;
    let account_id = body.account_id.ok_or(RejectReason::MissingField)?;
    let symbol = body.symbol.ok_or(RejectReason::MissingField)?;
    let quantity = body.quantity.ok_or(RejectReason::MissingField)?;

    let side = match body.side.as_deref() {
        Some("buy") => Side::Buy,
        Some("sell") => Side::Sell,
        Some(_) => return Err(RejectReason::InvalidSide),
        None => return Err(RejectReason::MissingField),
    };

    let order_type = match body.order_type.as_deref() {
        Some("market") => OrderType::Market,
        Some("limit") => OrderType::Limit,
        Some(_) => return Err(RejectReason::InvalidOrderType),
        None => return Err(RejectReason::MissingField),
    };

    if order_type == OrderType::Limit && body.limit_price.is_none() {
        return Err(RejectReason::LimitPriceRequired);
    }
    if quantity <= Decimal::ZERO {
        return Err(RejectReason::InvalidLotSize);
    }

    Ok(OrderRequest {
        account_id,
        user_id,
        symbol,
        side,
        quantity,
        order_type,
        limit_price: body.limit_price,
        stop_loss: body.stop_loss,
        take_profit: body.take_profit,
        idempotency_key: body.idempotency_key,
    })
}

/// Submit an order
///
/// Endpoint: `POST /place-order`. Business rejections are HTTP 400 with
/// `{status:"error", error:CODE}`; an idempotency-key replay is HTTP 200
/// with `{status:"duplicate", order_id}`.
pub async fn place_order(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PlaceOrderBody>,
) -> (StatusCode, Json<serde_json::Value>) {
    let request = match validate(body) {
        Ok(request) => request,
        Err(code) => return reject(code),
    };

    match state.engine.place_order(request).await {
        Ok(PlaceOutcome::Placed { order_id, trade }) => (
            StatusCode::OK,
            Json(json!({
                "status": "success",
                "order_id": order_id,
                "trade": trade,
            })),
        ),
        Ok(PlaceOutcome::Duplicate { order_id }) => (
            StatusCode::OK,
            Json(json!({
                "status": "duplicate",
                "order_id": order_id,
            })),
        ),
        Err(code) => reject(code),
    }
}

fn reject(code: RejectReason) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "status": "error", "error": code.code() })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body() -> PlaceOrderBody {
        PlaceOrderBody {
            user_id: Some("u1".into()),
            account_id: Some("a1".into()),
            symbol: Some("BTCUSD".into()),
            side: Some("buy".into()),
            quantity: Some(Decimal::ONE),
            order_type: Some("market".into()),
            limit_price: None,
            stop_loss: None,
            take_profit: None,
            idempotency_key: None,
        }
    }

    #[test]
    fn test_validate_happy_path() {
        assert!(validate(body()).is_ok());
    }

    #[test]
    fn test_validate_missing_and_invalid_fields() {
        let mut b = body();
        b.account_id = None;
        assert_eq!(validate(b).unwrap_err(), RejectReason::MissingField);

        let mut b = body();
        b.side = Some("hold".into());
        assert_eq!(validate(b).unwrap_err(), RejectReason::InvalidSide);

        let mut b = body();
        b.order_type = Some("stop".into());
        assert_eq!(validate(b).unwrap_err(), RejectReason::InvalidOrderType);
    }

    #[test]
    fn test_validate_limit_requires_price() {
        let mut b = body();
        b.order_type = Some("limit".into());
        assert_eq!(validate(b).unwrap_err(), RejectReason::LimitPriceRequired);
    }
}
