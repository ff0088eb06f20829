//! On-demand execution of a module's entry file.

use std::path::Path;
use std::time::Duration;

use modhost_core::entry::{
    activate, entry_candidates, load_entry, resolve_entry, EntryError, EntryOutcome,
};
use modhost_core::error::CoreError;
use modhost_core::runtime::ScriptContext;
use modhost_core::types::DbId;
use modhost_db::repositories::ModuleRepo;
use serde::Serialize;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, thiserror::Error)]
pub enum ExecuteError {
    #[error("Module {0} not found")]
    NotFound(DbId),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Entry(#[from] EntryError),
}

impl From<ExecuteError> for AppError {
    fn from(err: ExecuteError) -> Self {
        match err {
            ExecuteError::NotFound(id) => AppError::Core(CoreError::NotFound {
                entity: "Module",
                id,
            }),
            ExecuteError::Database(e) => AppError::Database(e),
            ExecuteError::Entry(e) => AppError::ExecutionFailed(e.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ExecutionResult {
    pub message: &'static str,
    /// Module name.
    pub module: String,
    pub outcome: EntryOutcome,
    /// Entry file that ran, if any.
    pub entry: Option<String>,
}

/// Run the entry of module `id`.
///
/// Without an entry file anywhere the module is treated as frontend-only:
/// the mount table is rebuilt and the call succeeds even if that fails.
pub async fn execute_module(state: &AppState, id: DbId) -> Result<ExecutionResult, ExecuteError> {
    let module = ModuleRepo::find_by_id(&state.pool, id)
        .await?
        .ok_or(ExecuteError::NotFound(id))?;

    let candidates = entry_candidates(&module.path, &state.config.entry_roots());
    let Some(entry_path) = resolve_entry(&candidates).await else {
        tracing::info!(
            module_id = id,
            module_path = %module.path,
            "No entry file, re-mounting modules",
        );
        if let Err(err) = state.registry.mount_all(&state.pool).await {
            tracing::warn!(module_id = id, error = %err, "Re-mount after execute failed");
        }
        return Ok(ExecutionResult {
            message: "Module is loaded and integrated successfully",
            module: module.name,
            outcome: EntryOutcome::Remounted,
            entry: None,
        });
    };

    let outcome = run_entry(&entry_path, &module.path, state.config.script_timeout()).await?;
    tracing::info!(
        module_id = id,
        entry = %entry_path.display(),
        ?outcome,
        "Module executed",
    );

    Ok(ExecutionResult {
        message: "Module executed successfully",
        module: module.name,
        outcome,
        entry: Some(entry_path.display().to_string()),
    })
}

/// Load and activate one entry file, running it from its own directory.
pub async fn run_entry(
    entry_path: &Path,
    module_path: &str,
    timeout: Duration,
) -> Result<EntryOutcome, EntryError> {
    let entry = load_entry(entry_path).await?;
    let working_dir = entry_path.parent().unwrap_or(Path::new("."));
    activate(&entry, &ScriptContext::new(module_path, working_dir, timeout)).await
}
