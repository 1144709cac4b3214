//! Market data queries

use axum::Json;
use axum::extract::{Query, State};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

use crate::gateway::state::AppState;
use crate::models::PricePoint;

#[derive(Debug, Deserialize)]
pub struct PricesQuery {
    /// Comma-separated symbol list; empty means all known marks
    pub symbols: Option<String>,
}

/// Latest marks, straight from the in-memory store
///
/// Endpoint: `GET /prices?symbols=BTCUSD,ETHUSD`
pub async fn prices(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PricesQuery>,
) -> Json<serde_json::Value> {
    let all = state.marks.snapshot();

    let selected: HashMap<String, PricePoint> = match query.symbols {
        Some(raw) if !raw.trim().is_empty() => raw
            .split(',')
            .map(|s| state.registry.normalize(s))
            .filter_map(|symbol| all.get(&symbol).map(|p| (symbol, *p)))
            .collect(),
        _ => all,
    };

    Json(json!({ "status": "success", "prices": selected }))
}
