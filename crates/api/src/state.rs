use std::sync::Arc;

use mayagen_db::QueueStore;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// The job queue.
    pub store: Arc<dyn QueueStore>,
    pub config: Arc<ServerConfig>,
}
