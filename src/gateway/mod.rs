//! HTTP gateway
//!
//! Thin validation surface over the engine: `POST /place-order`,
//! `GET /prices`, `GET /health`, and the `/ws` upgrade. Business
//! rejections come back as HTTP 400 with the tagged error code; the
//! candle aggregator and metrics scraping live in other services.

pub mod handlers;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;

use crate::websocket::ws_handler;
pub use state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/place-order", post(handlers::order::place_order))
        .route("/prices", get(handlers::market::prices))
        .route("/health", get(handlers::health::health))
        .route("/ws", get(ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
