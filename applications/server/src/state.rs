/// Shared application state
use crate::config::ServerConfig;
use playlog_core::{Flusher, KeyedStore, PlayHistory, PlayLogStore, WriteBackBuffer};
use std::sync::Arc;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub buffer: Arc<WriteBackBuffer>,
    pub flusher: Arc<Flusher>,
    pub history: Arc<PlayHistory>,
}

impl AppState {
    /// Wire the buffer, flusher and history query over the given stores
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn KeyedStore>,
        durable: Arc<dyn PlayLogStore>,
    ) -> Self {
        let buffer_config = config.buffer_config();
        let policy = config.policy();

        let buffer = WriteBackBuffer::new(Arc::clone(&store), buffer_config.clone());
        let flusher = Flusher::new(store, Arc::clone(&durable), policy.clone(), buffer_config.clone());
        let history = PlayHistory::new(durable, policy, buffer_config.op_timeout);

        Self {
            config: Arc::new(config),
            buffer: Arc::new(buffer),
            flusher: Arc::new(flusher),
            history: Arc::new(history),
        }
    }
}
