//! Module lifecycle: install, execute, uninstall.

pub mod executor;
pub mod installer;
pub mod jobs;

use std::io::ErrorKind;

use modhost_core::error::CoreError;
use modhost_core::naming::is_valid_module_path;
use modhost_core::types::DbId;
use modhost_db::models::module::Module;
use modhost_db::repositories::{DocumentRepo, ModuleRepo};

use crate::config::ServerConfig;
use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Remove a module's files, routes, documents and record.
///
/// File removal is best-effort: a directory that is already gone or cannot
/// be removed is logged and the record is deleted anyway.
pub async fn uninstall_module(state: &AppState, id: DbId) -> AppResult<Module> {
    let not_found = || {
        AppError::Core(CoreError::NotFound {
            entity: "Module",
            id,
        })
    };

    let module = ModuleRepo::find_by_id(&state.pool, id)
        .await?
        .ok_or_else(not_found)?;

    remove_module_files(&state.config, &module.path).await;
    state.registry.unmount(&module.path).await;
    let documents = DocumentRepo::delete_for_module(&state.pool, &module.path).await?;

    if !ModuleRepo::delete(&state.pool, id).await? {
        return Err(not_found());
    }

    tracing::info!(
        module_id = id,
        module_path = %module.path,
        documents,
        "Module removed",
    );
    Ok(module)
}

pub(crate) async fn remove_module_files(config: &ServerConfig, module_path: &str) {
    if !is_valid_module_path(module_path) {
        tracing::warn!(module_path, "Not removing files for an unusual module path");
        return;
    }

    for root in [
        &config.server_modules_dir,
        &config.client_modules_dir,
        &config.staging_dir,
    ] {
        let dir = root.join(module_path);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => tracing::debug!(dir = %dir.display(), "Removed module directory"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                tracing::warn!(dir = %dir.display(), error = %err, "Failed to remove module directory")
            }
        }
    }
}
