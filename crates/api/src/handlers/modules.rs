//! Handlers for module management: upload, listing, execution, toggling,
//! removal and re-mounting, plus install job and mount table inspection.

use axum::extract::{Multipart, Path, State};
use axum::Json;
use modhost_core::error::CoreError;
use modhost_core::naming::is_zip_upload;
use modhost_core::types::DbId;
use modhost_db::models::module::Module;
use modhost_db::repositories::ModuleRepo;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::lifecycle::executor::{self, ExecutionResult};
use crate::lifecycle::installer::{accept_upload, spawn_install};
use crate::lifecycle::jobs::InstallJob;
use crate::lifecycle::uninstall_module;
use crate::mount::{MountInfo, MountReport};
use crate::response::{DataResponse, MessageResponse};
use crate::state::AppState;

/// Multipart field carrying the archive.
const UPLOAD_FIELD: &str = "module";

fn module_not_found(id: DbId) -> AppError {
    AppError::Core(CoreError::NotFound {
        entity: "Module",
        id,
    })
}

// ── Records ──────────────────────────────────────────────────────────

/// GET /api/v1/modules
pub async fn list_modules(State(state): State<AppState>) -> AppResult<Json<DataResponse<Vec<Module>>>> {
    let modules = ModuleRepo::list_all(&state.pool).await?;
    Ok(Json(DataResponse { data: modules }))
}

/// GET /api/v1/modules/{id}
pub async fn get_module(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<Json<DataResponse<Module>>> {
    let module = ModuleRepo::find_by_id(&state.pool, id)
        .await?
        .ok_or_else(|| module_not_found(id))?;
    Ok(Json(DataResponse { data: module }))
}

/// GET /api/v1/modules/latest
///
/// The most recently installed module that is still active.
pub async fn latest_module(State(state): State<AppState>) -> AppResult<Json<DataResponse<Module>>> {
    let module = ModuleRepo::find_latest_active(&state.pool)
        .await?
        .ok_or_else(|| AppError::NotFound("No active module".to_string()))?;
    Ok(Json(DataResponse { data: module }))
}

// ── Upload ───────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct UploadAccepted {
    pub message: &'static str,
    pub success: bool,
    /// File name as sent by the client.
    pub file: String,
    pub job_id: Uuid,
    pub module_path: String,
}

/// POST /api/v1/modules/upload
///
/// Accept a zip archive in the `module` field and install it in the
/// background. Poll `/modules/jobs/{job_id}` for progress.
pub async fn upload_module(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<Json<DataResponse<UploadAccepted>>> {
    let mut upload: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let Some(file_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        if !is_zip_upload(&file_name, field.content_type()) {
            return Err(AppError::BadRequest("Only zip files are allowed!".to_string()));
        }
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(e.to_string()))?;
        upload = Some((file_name, data.to_vec()));
        break;
    }

    let Some((file_name, data)) = upload else {
        return Err(AppError::BadRequest("No file uploaded".to_string()));
    };

    let staged = accept_upload(&state, &file_name, &data)
        .await
        .map_err(|e| AppError::InternalError(e.to_string()))?;

    let accepted = UploadAccepted {
        message: "Upload started - processing in background",
        success: true,
        file: staged.file_name.clone(),
        job_id: staged.job_id,
        module_path: staged.module_path.clone(),
    };
    spawn_install(state, staged);

    Ok(Json(DataResponse { data: accepted }))
}

// ── Lifecycle ────────────────────────────────────────────────────────

/// DELETE /api/v1/modules/{id}
pub async fn delete_module(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<Json<DataResponse<MessageResponse>>> {
    uninstall_module(&state, id).await?;
    Ok(Json(DataResponse {
        data: MessageResponse::new("Module removed successfully"),
    }))
}

/// POST /api/v1/modules/{id}/execute
pub async fn execute_module(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<Json<DataResponse<ExecutionResult>>> {
    let result = executor::execute_module(&state, id).await?;
    Ok(Json(DataResponse { data: result }))
}

/// PUT /api/v1/modules/{id}/toggle
///
/// Flip the `active` flag. Mounted routes are left alone.
pub async fn toggle_module(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<Json<DataResponse<Module>>> {
    let module = ModuleRepo::toggle_active(&state.pool, id)
        .await?
        .ok_or_else(|| module_not_found(id))?;
    tracing::info!(module_id = id, active = module.active, "Module toggled");
    Ok(Json(DataResponse { data: module }))
}

#[derive(Debug, Serialize)]
pub struct ReloadResult {
    pub message: &'static str,
    pub report: MountReport,
}

/// POST /api/v1/modules/{id}/reload
///
/// Re-mounts every module; the id only selects the URL.
pub async fn reload_modules(
    State(state): State<AppState>,
    Path(_id): Path<String>,
) -> AppResult<Json<DataResponse<ReloadResult>>> {
    let report = state
        .registry
        .mount_all(&state.pool)
        .await
        .map_err(|e| AppError::InternalError(e.to_string()))?;
    Ok(Json(DataResponse {
        data: ReloadResult {
            message: "Modules reloaded successfully",
            report,
        },
    }))
}

// ── Inspection ───────────────────────────────────────────────────────

/// GET /api/v1/modules/jobs
pub async fn list_jobs(State(state): State<AppState>) -> Json<DataResponse<Vec<InstallJob>>> {
    Json(DataResponse {
        data: state.jobs.list().await,
    })
}

/// GET /api/v1/modules/jobs/{job_id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> AppResult<Json<DataResponse<InstallJob>>> {
    let job = state
        .jobs
        .get(job_id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("Install job {job_id} not found")))?;
    Ok(Json(DataResponse { data: job }))
}

/// GET /api/v1/modules/mounts
pub async fn list_mounts(State(state): State<AppState>) -> Json<DataResponse<Vec<MountInfo>>> {
    Json(DataResponse {
        data: state.registry.snapshot().await,
    })
}
