//! Background module installation.
//!
//! [`accept_upload`] runs inside the request: it stores the archive, picks
//! the module path and registers a job. [`spawn_install`] then drives the
//! rest off the request path:
//!
//! 1. extract into `<staging>/<module_path>` and delete the archive
//! 2. resolve the manifest (defaults on failure)
//! 3. place files into the server and client trees
//! 4. insert the module record
//! 5. re-mount all modules
//! 6. activate the staged entry file, if any
//!
//! Steps 1, 3 and 4 abort the install. Manifest, mount and activation
//! problems only add warnings to the job. A failed extraction or placement
//! discards the archive and every file written for the module path; later
//! failures leave the files in place.

use std::io::ErrorKind;
use std::path::PathBuf;

use chrono::Utc;
use modhost_core::archive::{extract_archive, ArchiveError};
use modhost_core::entry::entry_in_dir;
use modhost_core::manifest::resolve_manifest;
use modhost_core::naming::{display_stem, module_path_for, new_nonce, stored_upload_name};
use modhost_core::placement::{place_module, PlacementError};
use modhost_db::models::module::{CreateModule, Module};
use modhost_db::repositories::ModuleRepo;
use uuid::Uuid;

use super::executor::run_entry;
use super::jobs::InstallStage;
use super::remove_module_files;
use crate::state::AppState;

#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    #[error("Failed to store upload: {0}")]
    Store(#[source] std::io::Error),

    #[error("Extraction failed: {0}")]
    Extract(#[from] ArchiveError),

    #[error("Placement failed: {0}")]
    Placement(#[from] PlacementError),

    #[error("Module path '{0}' is already taken")]
    PathTaken(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Install task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl InstallError {
    /// Failures before the module record exists, when nothing else can own
    /// the files written so far.
    fn leaves_partial_files(&self) -> bool {
        matches!(self, Self::Extract(_) | Self::Placement(_) | Self::Task(_))
    }
}

/// An upload written to disk and waiting to be installed.
#[derive(Debug, Clone)]
pub struct StagedUpload {
    pub job_id: Uuid,
    /// Name the client sent.
    pub file_name: String,
    pub archive_path: PathBuf,
    pub module_path: String,
}

/// Store the upload and register its install job.
pub async fn accept_upload(
    state: &AppState,
    file_name: &str,
    data: &[u8],
) -> Result<StagedUpload, InstallError> {
    let millis = Utc::now().timestamp_millis();
    let nonce = new_nonce();
    let upload_dir = &state.config.upload_dir;

    tokio::fs::create_dir_all(upload_dir)
        .await
        .map_err(InstallError::Store)?;
    let archive_path = upload_dir.join(stored_upload_name(file_name, millis, &nonce));
    tokio::fs::write(&archive_path, data)
        .await
        .map_err(InstallError::Store)?;

    let module_path = module_path_for(file_name, millis, &nonce);
    let job = state.jobs.create(file_name, &module_path).await;

    tracing::info!(
        job_id = %job.id,
        file = file_name,
        module_path = %module_path,
        bytes = data.len(),
        "Module upload staged",
    );

    Ok(StagedUpload {
        job_id: job.id,
        file_name: file_name.to_string(),
        archive_path,
        module_path,
    })
}

/// Run [`install`] in the background, recording failures on the job.
pub fn spawn_install(state: AppState, upload: StagedUpload) {
    tokio::spawn(async move {
        match install(&state, &upload).await {
            Ok(module) => tracing::info!(
                job_id = %upload.job_id,
                module_id = module.id,
                module_path = %module.path,
                name = %module.name,
                "Module installed",
            ),
            Err(err) => {
                tracing::error!(
                    job_id = %upload.job_id,
                    module_path = %upload.module_path,
                    error = %err,
                    "Module install failed",
                );
                if err.leaves_partial_files() {
                    discard_upload(&state, &upload).await;
                }
                state.jobs.fail(upload.job_id, err.to_string()).await;
            }
        }
    });
}

/// Remove the stored archive and any staged or placed files of a failed install.
async fn discard_upload(state: &AppState, upload: &StagedUpload) {
    match tokio::fs::remove_file(&upload.archive_path).await {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => tracing::warn!(
            job_id = %upload.job_id,
            archive = %upload.archive_path.display(),
            error = %err,
            "Could not remove uploaded archive",
        ),
    }
    remove_module_files(&state.config, &upload.module_path).await;
}

/// Install a staged upload end to end.
pub async fn install(state: &AppState, upload: &StagedUpload) -> Result<Module, InstallError> {
    let config = &state.config;
    let jobs = &state.jobs;
    let job_id = upload.job_id;
    let staging_dir = config.staging_dir.join(&upload.module_path);

    // --- Extract ---
    let summary = {
        let archive = upload.archive_path.clone();
        let dest = staging_dir.clone();
        let limits = config.extract_limits();
        tokio::task::spawn_blocking(move || extract_archive(&archive, &dest, &limits)).await??
    };
    tracing::debug!(
        %job_id,
        files = summary.files,
        bytes = summary.total_bytes,
        "Archive extracted",
    );
    if let Err(err) = tokio::fs::remove_file(&upload.archive_path).await {
        jobs.warn(job_id, format!("Could not remove uploaded archive: {err}"))
            .await;
    }
    jobs.advance(job_id, InstallStage::Extracted).await;

    // --- Manifest ---
    let (manifest, manifest_err) =
        resolve_manifest(&staging_dir, &display_stem(&upload.file_name)).await;
    if let Some(err) = manifest_err {
        jobs.warn(job_id, format!("Manifest ignored, using defaults: {err}"))
            .await;
    }

    // --- Placement ---
    let report = {
        let staging = staging_dir.clone();
        let module_path = upload.module_path.clone();
        let roots = config.placement_roots();
        tokio::task::spawn_blocking(move || place_module(&staging, &module_path, &roots)).await??
    };
    for warning in report.warnings {
        jobs.warn(job_id, warning).await;
    }
    tracing::debug!(
        %job_id,
        steps = ?report.steps,
        files = report.files_copied,
        rewritten = report.rewritten_files.len(),
        "Module files placed",
    );
    jobs.advance(job_id, InstallStage::Placed).await;

    // --- Persist ---
    if ModuleRepo::find_by_path(&state.pool, &upload.module_path)
        .await?
        .is_some()
    {
        return Err(InstallError::PathTaken(upload.module_path.clone()));
    }
    let module = ModuleRepo::insert(
        &state.pool,
        &CreateModule {
            name: manifest.name,
            path: upload.module_path.clone(),
            version: manifest.version,
            description: manifest.description,
            author: manifest.author,
        },
    )
    .await?;
    jobs.set_module(job_id, module.id).await;

    // --- Mount ---
    match state.registry.mount_all(&state.pool).await {
        Ok(mount) => {
            for skipped in mount.skipped.iter().filter(|s| s.path == module.path) {
                jobs.warn(job_id, format!("Routes not mounted: {}", skipped.reason))
                    .await;
            }
        }
        Err(err) => jobs.warn(job_id, format!("Re-mount failed: {err}")).await,
    }

    // --- Activate ---
    if let Some(entry_path) = entry_in_dir(&staging_dir).await {
        if let Err(err) = run_entry(&entry_path, &module.path, config.script_timeout()).await {
            jobs.warn(job_id, format!("Entry activation failed: {err}"))
                .await;
        }
    }

    jobs.advance(job_id, InstallStage::Mounted).await;
    schedule_remount(state);

    Ok(module)
}

/// Re-mount once more after the configured delay.
fn schedule_remount(state: &AppState) {
    let Some(delay) = state.config.remount_delay() else {
        return;
    };
    let state = state.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if let Err(err) = state.registry.mount_all(&state.pool).await {
            tracing::warn!(error = %err, "Deferred re-mount failed");
        }
    });
}
