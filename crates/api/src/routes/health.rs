use axum::extract::State;
use axum::{routing::get, Json, Router};
use modhost_db::repositories::ModuleRepo;
use serde::Serialize;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// Whether the database is reachable.
    pub db_healthy: bool,
    /// Installed modules, `None` when the database is unreachable.
    pub registered_modules: Option<i64>,
    /// Modules currently in the mount table.
    pub mounted_modules: usize,
}

/// GET /health -- returns service, database, registry and mount health.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let db_healthy = modhost_db::health_check(&state.pool).await.is_ok();
    let registered_modules = if db_healthy {
        ModuleRepo::count(&state.pool).await.ok()
    } else {
        None
    };
    let mounted_modules = state.registry.len().await;

    let status = if db_healthy { "ok" } else { "degraded" };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        db_healthy,
        registered_modules,
        mounted_modules,
    })
}

/// Mount health check routes (intended for root-level, NOT under `/api/v1`).
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
