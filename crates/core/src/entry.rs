//! Module entry files and activation.
//!
//! A module may ship an entry file that is run on demand ("execute") and
//! once after installation. Entry files are looked up across several roots
//! because a module's files can live on the server side, in the staging
//! tree, or only on the client side.
//!
//! Entry kinds:
//! - `index.sh` / `index.py`: directly invocable, run with no arguments.
//! - `index.json` with `{"init": "<script>"}`: exposes an init script.
//! - `index.json` without `init`, or an empty script: loaded, nothing to run.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::naming::is_contained_relative;
use crate::runtime::{run_script, ProcessError, ScriptContext};

/// Entry file names looked up in each root, in order.
pub const ENTRY_FILE_NAMES: &[&str] = &["index.sh", "index.py", "index.json"];

#[derive(Debug, thiserror::Error)]
pub enum EntryError {
    #[error("Failed to read entry {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid entry descriptor: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Init script '{0}' must be a relative path inside the module")]
    InvalidInit(String),

    #[error(transparent)]
    Process(#[from] ProcessError),
}

/// Directories an entry file may live under.
#[derive(Debug, Clone)]
pub struct EntryRoots {
    pub server_modules: PathBuf,
    pub staging: PathBuf,
    pub client_modules: PathBuf,
}

/// A loaded entry file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryPoint {
    Invocable(PathBuf),
    Init(PathBuf),
    Inert,
}

/// What activating an entry did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryOutcome {
    Invoked,
    Initialized,
    NoEntryBehavior,
    /// No entry file anywhere; the module's routes were re-mounted instead.
    Remounted,
}

#[derive(Debug, Deserialize)]
struct EntryDescriptor {
    #[serde(default)]
    init: Option<String>,
}

/// Candidate entry paths for a stored module path, in priority order.
///
/// Absolute paths (legacy records) are searched as-is; relative ones under
/// the server, staging and client roots.
pub fn entry_candidates(module_path: &str, roots: &EntryRoots) -> Vec<PathBuf> {
    let bases = if Path::new(module_path).is_absolute() {
        vec![PathBuf::from(module_path)]
    } else {
        vec![
            roots.server_modules.join(module_path),
            roots.staging.join(module_path),
            roots.client_modules.join(module_path),
        ]
    };

    bases
        .iter()
        .flat_map(|base| ENTRY_FILE_NAMES.iter().map(move |name| base.join(name)))
        .collect()
}

/// First candidate that exists as a file.
pub async fn resolve_entry(candidates: &[PathBuf]) -> Option<PathBuf> {
    for candidate in candidates {
        if tokio::fs::metadata(candidate)
            .await
            .is_ok_and(|m| m.is_file())
        {
            return Some(candidate.clone());
        }
    }
    None
}

/// Entry file at the root of `dir`, if any.
pub async fn entry_in_dir(dir: &Path) -> Option<PathBuf> {
    let candidates: Vec<PathBuf> = ENTRY_FILE_NAMES.iter().map(|n| dir.join(n)).collect();
    resolve_entry(&candidates).await
}

/// Load an entry file and classify what it offers.
pub async fn load_entry(path: &Path) -> Result<EntryPoint, EntryError> {
    let read_err = |source| EntryError::Read {
        path: path.display().to_string(),
        source,
    };

    if path.extension().and_then(|e| e.to_str()) == Some("json") {
        let raw = tokio::fs::read_to_string(path).await.map_err(read_err)?;
        let descriptor: EntryDescriptor = serde_json::from_str(&raw)?;
        return match descriptor.init.filter(|s| !s.trim().is_empty()) {
            Some(init) if is_contained_relative(&init) => {
                let base = path.parent().unwrap_or(Path::new("."));
                Ok(EntryPoint::Init(base.join(init)))
            }
            Some(init) => Err(EntryError::InvalidInit(init)),
            None => Ok(EntryPoint::Inert),
        };
    }

    let metadata = tokio::fs::metadata(path).await.map_err(read_err)?;
    if metadata.len() == 0 {
        Ok(EntryPoint::Inert)
    } else {
        Ok(EntryPoint::Invocable(path.to_path_buf()))
    }
}

/// Run whatever the entry offers.
///
/// Scripts receive `{"module": <module path>}` on stdin.
pub async fn activate(entry: &EntryPoint, ctx: &ScriptContext) -> Result<EntryOutcome, EntryError> {
    let payload = json!({ "module": ctx.module_path });
    match entry {
        EntryPoint::Invocable(path) => {
            run_script(path, ctx, &payload).await?;
            Ok(EntryOutcome::Invoked)
        }
        EntryPoint::Init(path) => {
            run_script(path, ctx, &payload).await?;
            Ok(EntryOutcome::Initialized)
        }
        EntryPoint::Inert => Ok(EntryOutcome::NoEntryBehavior),
    }
}
