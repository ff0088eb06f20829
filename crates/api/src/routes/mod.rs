pub mod health;
pub mod modules;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /modules                                         list
/// /modules/upload                                  upload archive (POST, multipart)
/// /modules/latest                                  newest active module
/// /modules/jobs                                    install jobs
/// /modules/jobs/{job_id}                           one install job
/// /modules/mounts                                  mount table
/// /modules/{id}                                    get, delete
/// /modules/{id}/execute                            run entry (POST)
/// /modules/{id}/toggle                             flip active (PUT)
/// /modules/{id}/reload                             re-mount all (POST)
///
/// /modules/{module_path}/...                       module-defined routes (router fallback)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new().nest("/modules", modules::router())
}
