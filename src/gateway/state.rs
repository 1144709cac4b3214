use std::sync::Arc;

use crate::config::AppConfig;
use crate::instruments::InstrumentRegistry;
use crate::kv::KvStore;
use crate::marks::MarkStore;
use crate::matching::MatchingEngine;
use crate::state::SharedTradeState;
use crate::websocket::ConnectionManager;

/// Gateway application state (shared)
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub engine: Arc<MatchingEngine>,
    pub trade_state: Arc<SharedTradeState>,
    pub registry: Arc<InstrumentRegistry>,
    pub marks: Arc<MarkStore>,
    pub kv: Arc<dyn KvStore>,
    pub ws_manager: Arc<ConnectionManager>,
}
