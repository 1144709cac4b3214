//! WebSocket handler for client connections
//!
//! Handles the authenticated upgrade, the welcome + sync_state snapshot,
//! subscribe/unsubscribe messages, heartbeat supervision and teardown.

use axum::extract::ws::{Message, WebSocket};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::{
    extract::{Query, State, WebSocketUpgrade},
    response::Response,
};
use futures::{sink::SinkExt, stream::StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

use super::messages::{ClientMessage, WsMessage};
use crate::gateway::state::AppState;

/// WebSocket upgrade handler
///
/// Endpoint: `GET /ws?key=...` (or the key in `sec-websocket-protocol`).
/// A bad key closes the connection before the upgrade happens.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    if let Some(expected) = &state.config.gateway.feed_api_key {
        let presented = params
            .get("key")
            .or_else(|| params.get("token"))
            .cloned()
            .or_else(|| {
                headers
                    .get("sec-websocket-protocol")
                    .and_then(|v| v.to_str().ok())
                    .map(|s| s.to_string())
            });
        if presented.as_deref() != Some(expected.as_str()) {
            tracing::warn!("WebSocket upgrade rejected: bad API key");
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle WebSocket connection lifecycle
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let buffered = Arc::new(AtomicUsize::new(0));

    let manager = state.ws_manager.clone();
    let conn_id = manager.add_connection(tx, buffered.clone());

    // Welcome snapshot: current marks plus whatever depth the KV holds
    let mut orderbooks = HashMap::new();
    let contracts = state.registry.snapshot();
    for symbol in contracts.keys() {
        if let Ok(Some(depth)) = state.kv.get_orderbook(symbol).await {
            orderbooks.insert(symbol.clone(), depth);
        }
    }
    let welcome = WsMessage::Welcome {
        prices: state.marks.snapshot(),
        orderbooks,
    };
    manager.send_to(conn_id, &welcome);

    // Followed by the state mirror, so reconnecting clients converge
    let sync = WsMessage::SyncState {
        accounts: state.trade_state.get_accounts(),
        pending_orders: state.trade_state.get_pending_orders(),
        open_trades: state.trade_state.get_open_trades(),
    };
    manager.send_to(conn_id, &sync);

    // Writer: drain the channel into the socket and run the heartbeat.
    // A client that missed a pong since the previous beat is terminated.
    let heartbeat = Duration::from_secs(state.config.hub.heartbeat_secs);
    let pong_seen = Arc::new(AtomicBool::new(true));
    let pong_writer = pong_seen.clone();
    let buffered_writer = buffered.clone();
    let mut send_task = tokio::spawn(async move {
        let mut beat = tokio::time::interval(heartbeat);
        beat.tick().await; // immediate first tick, skip the termination check
        loop {
            tokio::select! {
                frame = rx.recv() => {
                    let Some(json) = frame else { break };
                    let outstanding = buffered_writer.load(Ordering::Relaxed);
                    buffered_writer.store(outstanding.saturating_sub(json.len()), Ordering::Relaxed);
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                _ = beat.tick() => {
                    if !pong_writer.swap(false, Ordering::Relaxed) {
                        tracing::info!("Client missed heartbeat, terminating");
                        break;
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Reader: client subscriptions and pong bookkeeping
    let manager_recv = state.ws_manager.clone();
    let registry = state.registry.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(ClientMessage::Subscribe { symbol }) => {
                        manager_recv.subscribe(conn_id, registry.normalize(&symbol));
                    }
                    Ok(ClientMessage::Unsubscribe { symbol }) => {
                        manager_recv.unsubscribe(conn_id, &registry.normalize(&symbol));
                    }
                    Ok(ClientMessage::Ping) => {
                        manager_recv.send_to(conn_id, &WsMessage::Pong);
                    }
                    Err(_) => { /* ignore unknown client chatter */ }
                },
                Message::Pong(_) => {
                    pong_seen.store(true, Ordering::Relaxed);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Whichever half finishes first tears the other down
    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    manager.remove_connection(conn_id);
}
