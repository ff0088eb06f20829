//! Route definitions for module management.
//!
//! Mounted at `/modules`. Paths not listed here fall through to the module
//! dispatcher.

use axum::routing::{get, post, put};
use axum::Router;

use crate::handlers::modules;
use crate::state::AppState;

/// Routes mounted at `/modules`.
///
/// ```text
/// GET    /                  -> list_modules
/// POST   /upload            -> upload_module   (multipart)
/// GET    /latest            -> latest_module
/// GET    /jobs              -> list_jobs
/// GET    /jobs/{job_id}     -> get_job
/// GET    /mounts            -> list_mounts
/// GET    /{id}              -> get_module
/// DELETE /{id}              -> delete_module
/// POST   /{id}/execute      -> execute_module
/// PUT    /{id}/toggle       -> toggle_module
/// POST   /{id}/reload       -> reload_modules
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(modules::list_modules))
        .route("/upload", post(modules::upload_module))
        .route("/latest", get(modules::latest_module))
        .route("/jobs", get(modules::list_jobs))
        .route("/jobs/{job_id}", get(modules::get_job))
        .route("/mounts", get(modules::list_mounts))
        .route(
            "/{id}",
            get(modules::get_module).delete(modules::delete_module),
        )
        .route("/{id}/execute", post(modules::execute_module))
        .route("/{id}/toggle", put(modules::toggle_module))
        .route("/{id}/reload", post(modules::reload_modules))
}
