//! Script runtimes for module code.
//!
//! Module scripts (route handlers and entry files) run as child processes.
//! The runtime is picked from the file extension: `.sh` through `bash`,
//! `.py` through `python3`, anything else is executed directly.
//!
//! Every script gets its JSON payload on stdin, runs from its module
//! directory and sees the module path in `MODULE_PATH`.

pub mod process;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::process::Command;

pub use process::{ProcessError, ScriptOutput};

/// Environment variable carrying the module path into scripts.
pub const MODULE_PATH_ENV: &str = "MODULE_PATH";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptRuntime {
    Shell,
    Python,
    Binary,
}

impl ScriptRuntime {
    pub fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("sh") => Self::Shell,
            Some("py") => Self::Python,
            _ => Self::Binary,
        }
    }

    fn command(self, path: &Path) -> Command {
        match self {
            Self::Shell => {
                let mut cmd = Command::new("bash");
                cmd.arg(path);
                cmd
            }
            Self::Python => {
                let mut cmd = Command::new("python3");
                cmd.arg(path);
                cmd
            }
            Self::Binary => Command::new(path),
        }
    }
}

/// The module a script runs on behalf of.
#[derive(Debug, Clone)]
pub struct ScriptContext {
    pub module_path: String,
    pub working_dir: PathBuf,
    pub timeout: Duration,
}

impl ScriptContext {
    pub fn new(module_path: impl Into<String>, working_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            module_path: module_path.into(),
            working_dir: working_dir.into(),
            timeout,
        }
    }
}

/// Run the script at `path` for the module in `ctx`, feeding it `payload`.
///
/// A non-zero exit is [`ProcessError::Failed`].
pub async fn run_script(
    path: &Path,
    ctx: &ScriptContext,
    payload: &Value,
) -> Result<ScriptOutput, ProcessError> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|_| ProcessError::NotFound(path.display().to_string()))?;
    if !metadata.is_file() {
        return Err(ProcessError::NotFound(path.display().to_string()));
    }

    let runtime = ScriptRuntime::for_path(path);

    #[cfg(unix)]
    if runtime == ScriptRuntime::Binary {
        use std::os::unix::fs::PermissionsExt;
        let mode = metadata.permissions().mode();
        if mode & 0o111 == 0 {
            return Err(ProcessError::PermissionDenied(format!(
                "{} is not executable (mode {mode:#o})",
                path.display()
            )));
        }
    }

    let stdin = serde_json::to_vec(payload)?;
    let mut cmd = runtime.command(path);
    cmd.current_dir(&ctx.working_dir)
        .env(MODULE_PATH_ENV, &ctx.module_path);

    tracing::debug!(
        path = %path.display(),
        module_path = %ctx.module_path,
        ?runtime,
        "Running module script",
    );
    let output = process::run_child(cmd, stdin, ctx.timeout).await;
    if let Err(err) = &output {
        tracing::debug!(path = %path.display(), error = %err, "Module script failed");
    }
    output
}
