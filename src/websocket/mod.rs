//! WebSocket module for real-time push to clients
//!
//! Serves the `/ws` endpoint: API-key authenticated upgrade, a welcome
//! snapshot, per-client symbol subscriptions, heartbeat supervision, and
//! the broadcaster that fans bus events out to clients under the
//! process-wide rate limit.

pub mod broadcast;
pub mod connection;
pub mod handler;
pub mod messages;

pub use broadcast::WsBroadcaster;
pub use connection::ConnectionManager;
pub use handler::ws_handler;
pub use messages::{ClientMessage, WsMessage};
