use std::sync::Arc;

use crate::config::ServerConfig;
use crate::lifecycle::jobs::JobTracker;
use crate::mount::ModuleRegistry;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: modhost_db::DbPool,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Mounted module routers, keyed by module path.
    pub registry: Arc<ModuleRegistry>,
    /// In-memory install job tracker.
    pub jobs: Arc<JobTracker>,
}

impl AppState {
    pub fn new(pool: modhost_db::DbPool, config: ServerConfig) -> Self {
        let registry = ModuleRegistry::new(
            config.server_modules_dir.clone(),
            config.script_timeout(),
        );
        Self {
            pool,
            config: Arc::new(config),
            registry: Arc::new(registry),
            jobs: Arc::new(JobTracker::new()),
        }
    }
}
