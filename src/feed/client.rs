//! Single upstream WebSocket connection with auto-reconnect
//!
//! Each connection runs as a tokio task that:
//! 1. Connects to the exchange endpoint (TLS).
//! 2. Reads messages and forwards parsed events to the hub channel.
//! 3. Answers protocol pings.
//! 4. Force-reconnects when nothing arrives inside the idle window.
//! 5. Reconnects on disconnection with exponential backoff, capped.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use super::FeedEvent;

/// Parser for one stream's text frames
pub type FrameParser = fn(&str, &str) -> Option<FeedEvent>;

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

pub struct FeedConnection;

impl FeedConnection {
    /// Spawn the supervised connection loop
    pub fn spawn(
        url: String,
        price_key: String,
        idle_secs: u64,
        parser: FrameParser,
        events: mpsc::Sender<FeedEvent>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            connection_loop(url, price_key, idle_secs, parser, events).await;
        })
    }
}

async fn connection_loop(
    url: String,
    price_key: String,
    idle_secs: u64,
    parser: FrameParser,
    events: mpsc::Sender<FeedEvent>,
) {
    let mut backoff = INITIAL_BACKOFF;
    let idle = Duration::from_secs(idle_secs);

    loop {
        tracing::info!(%price_key, "[feed] connecting to {url}");

        let ws_stream = match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((stream, _response)) => {
                backoff = INITIAL_BACKOFF; // reset backoff on success
                tracing::info!(%price_key, "[feed] connected, feed up");
                stream
            }
            Err(e) => {
                tracing::error!(%price_key, "[feed] connect failed: {e}, retrying in {backoff:?}");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
                continue;
            }
        };

        let (mut ws_write, mut ws_read) = ws_stream.split();

        loop {
            // Watchdog: a silent exchange connection is a dead connection
            let frame = match tokio::time::timeout(idle, ws_read.next()).await {
                Ok(frame) => frame,
                Err(_) => {
                    tracing::warn!(%price_key, "[feed] no message in {idle:?}, force-reconnecting");
                    break;
                }
            };

            match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Some(event) = parser(&price_key, &text) {
                        // The hub channel is the lossless tick path; block
                        // rather than drop when it backs up
                        if events.send(event).await.is_err() {
                            tracing::info!(%price_key, "[feed] hub gone, stopping");
                            return;
                        }
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = ws_write.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) => {
                    tracing::warn!(%price_key, "[feed] received close frame");
                    break;
                }
                Some(Err(e)) => {
                    tracing::error!(%price_key, "[feed] read error: {e}");
                    break;
                }
                None => {
                    tracing::warn!(%price_key, "[feed] stream ended");
                    break;
                }
                _ => {} // Pong, Binary, Frame - ignore
            }
        }

        tracing::warn!(%price_key, "[feed] disconnected, reconnecting in {backoff:?}");
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}
