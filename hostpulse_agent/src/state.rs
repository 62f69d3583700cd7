//! Shared agent state handed to every route.

use std::sync::Arc;
use std::time::Instant;

use crate::config::AgentConfig;
use crate::driver::SharedHistory;
use crate::history::HistoryStore;
use crate::hub::Hub;
use crate::logbook::LogBook;

#[derive(Clone)]
pub struct AppState {
    pub hub: Hub,
    // written by the tick driver only
    pub history: SharedHistory,
    pub logbook: LogBook,
    pub config: Arc<AgentConfig>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: AgentConfig, logbook: LogBook) -> Self {
        let history = HistoryStore::new(config.retention);
        Self {
            hub: Hub::new(),
            history: Arc::new(tokio::sync::RwLock::new(history)),
            logbook,
            config: Arc::new(config),
            started_at: Instant::now(),
        }
    }
}
