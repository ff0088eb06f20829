//! File placement: copying an extracted module into the live module trees.
//!
//! Which subtrees get copied is an exhaustive decision over the staging
//! layout (see [`PlacementPlan::decide`]); every recognised subtree is copied
//! exactly once. Copies are not transactional.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use walkdir::WalkDir;

use crate::manifest::MANIFEST_FILE;

/// Backend subtree inside an archive.
pub const BACKEND_DIR: &str = "backend";
/// Frontend subtree inside an archive.
pub const FRONTEND_DIR: &str = "frontend";
/// Root-level source directory.
pub const SRC_DIR: &str = "src";
/// Component directory whose sources get their API paths rewritten.
pub const COMPONENTS_DIR: &str = "components";
/// Root-level frontend entry file that marks a bare frontend archive.
pub const APP_ENTRY_FILE: &str = "App.js";

/// Placeholder module authors use for their own mount path.
pub const MODULE_PATH_PLACEHOLDER: &str = "/api/modules/MODULE_PATH/";

/// Source extensions considered by the rewrite pass.
const REWRITE_EXTENSIONS: &[&str] = &["js", "jsx", "ts", "tsx"];

/// Hardcoded URLs shipped by the legacy sample modules.
static LEGACY_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"http://localhost:3001/api/modules/(todo-manager|user-manager)/")
        .expect("valid regex")
});

#[derive(Debug, thiserror::Error)]
pub enum PlacementError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to walk {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

/// Destination roots for placed files.
#[derive(Debug, Clone)]
pub struct PlacementRoots {
    /// Live server module root; each module's backend lands in `<root>/<path>`.
    pub server_modules: PathBuf,
    /// Live client module root; frontend files land in `<root>/<path>`.
    pub client_modules: PathBuf,
    /// URL prefix under which modules are mounted, e.g. `/api/v1/modules`.
    pub mount_prefix: String,
}

/// What the staging directory contains at its root.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StagingLayout {
    pub has_backend: bool,
    pub has_frontend: bool,
    pub has_root_src: bool,
    pub has_root_components: bool,
    pub has_app_entry: bool,
}

impl StagingLayout {
    pub fn inspect(staging_dir: &Path) -> Self {
        Self {
            has_backend: staging_dir.join(BACKEND_DIR).is_dir(),
            has_frontend: staging_dir.join(FRONTEND_DIR).is_dir(),
            has_root_src: staging_dir.join(SRC_DIR).is_dir(),
            has_root_components: staging_dir.join(COMPONENTS_DIR).is_dir(),
            has_app_entry: staging_dir.join(APP_ENTRY_FILE).is_file(),
        }
    }

    fn looks_like_bare_frontend(&self) -> bool {
        self.has_root_src || self.has_root_components || self.has_app_entry
    }
}

/// A single copy operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CopyStep {
    /// `backend/` -> `<server>/<path>`
    Backend,
    /// `frontend/` -> `<client>/<path>`
    Frontend,
    /// `src/` -> `<client>/<path>/src`
    RootSrc,
    /// everything except `backend/` and the manifest -> `<client>/<path>`
    WholeTree,
}

/// Ordered list of copy steps for one module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacementPlan {
    pub steps: Vec<CopyStep>,
}

impl PlacementPlan {
    /// Decide which subtrees to copy.
    ///
    /// | backend | frontend | bare frontend markers | client steps          |
    /// |---------|----------|-----------------------|-----------------------|
    /// | any     | yes      | any                   | Frontend (+ RootSrc)  |
    /// | any     | no       | yes                   | WholeTree             |
    /// | any     | no       | no                    | none                  |
    ///
    /// `Backend` is added whenever `backend/` exists. `WholeTree` already
    /// contains `src/`, so `RootSrc` never accompanies it.
    pub fn decide(layout: &StagingLayout) -> Self {
        let mut steps = Vec::new();
        if layout.has_backend {
            steps.push(CopyStep::Backend);
        }
        if layout.has_frontend {
            steps.push(CopyStep::Frontend);
            if layout.has_root_src {
                steps.push(CopyStep::RootSrc);
            }
        } else if layout.looks_like_bare_frontend() {
            steps.push(CopyStep::WholeTree);
        }
        Self { steps }
    }

    pub fn copies_client_files(&self) -> bool {
        self.steps.iter().any(|s| *s != CopyStep::Backend)
    }
}

/// Outcome of [`place_module`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct PlacementReport {
    pub steps: Vec<CopyStep>,
    pub files_copied: usize,
    pub rewritten_files: Vec<String>,
    pub warnings: Vec<String>,
}

/// Copy the staged module into the live trees and rewrite component API
/// paths. Blocking; run on `spawn_blocking` from async code.
pub fn place_module(
    staging_dir: &Path,
    module_path: &str,
    roots: &PlacementRoots,
) -> Result<PlacementReport, PlacementError> {
    let layout = StagingLayout::inspect(staging_dir);
    let plan = PlacementPlan::decide(&layout);
    let client_dest = roots.client_modules.join(module_path);

    let mut report = PlacementReport {
        steps: plan.steps.clone(),
        ..PlacementReport::default()
    };

    for step in &plan.steps {
        let copied = match step {
            CopyStep::Backend => copy_tree(
                &staging_dir.join(BACKEND_DIR),
                &roots.server_modules.join(module_path),
                &[],
            )?,
            CopyStep::Frontend => copy_tree(&staging_dir.join(FRONTEND_DIR), &client_dest, &[])?,
            CopyStep::RootSrc => {
                copy_tree(&staging_dir.join(SRC_DIR), &client_dest.join(SRC_DIR), &[])?
            }
            CopyStep::WholeTree => {
                copy_tree(staging_dir, &client_dest, &[BACKEND_DIR, MANIFEST_FILE])?
            }
        };
        tracing::debug!(?step, module_path, files = copied, "Placement step done");
        report.files_copied += copied;
    }

    if plan.copies_client_files() {
        let mount_path = format!("{}/{module_path}/", roots.mount_prefix.trim_end_matches('/'));
        rewrite_components(&client_dest.join(COMPONENTS_DIR), &mount_path, &mut report);
    }

    Ok(report)
}

/// Replace the module path placeholder and legacy hardcoded URLs.
///
/// Returns `None` when nothing changed.
///
/// ```
/// use modhost_core::placement::rewrite_api_paths;
///
/// let src = "fetch('/api/modules/MODULE_PATH/todos')";
/// assert_eq!(
///     rewrite_api_paths(src, "/api/v1/modules/17-ab-todo/").as_deref(),
///     Some("fetch('/api/v1/modules/17-ab-todo/todos')"),
/// );
/// assert_eq!(rewrite_api_paths("no paths here", "/x/"), None);
/// ```
pub fn rewrite_api_paths(content: &str, mount_path: &str) -> Option<String> {
    let replaced = content.replace(MODULE_PATH_PLACEHOLDER, mount_path);
    let replaced = LEGACY_URL_RE
        .replace_all(&replaced, regex::NoExpand(mount_path))
        .into_owned();
    (replaced != content).then_some(replaced)
}

fn rewrite_components(components_dir: &Path, mount_path: &str, report: &mut PlacementReport) {
    let entries = match fs::read_dir(components_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return,
        Err(e) => {
            report
                .warnings
                .push(format!("Cannot read {}: {e}", components_dir.display()));
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let is_source = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| REWRITE_EXTENSIONS.contains(&e));
        if !is_source || !path.is_file() {
            continue;
        }

        let result = fs::read_to_string(&path).and_then(|content| {
            match rewrite_api_paths(&content, mount_path) {
                Some(updated) => fs::write(&path, updated).map(|()| true),
                None => Ok(false),
            }
        });

        match result {
            Ok(true) => {
                let name = entry.file_name().to_string_lossy().into_owned();
                tracing::info!(file = %name, mount_path, "Rewrote component API paths");
                report.rewritten_files.push(name);
            }
            Ok(false) => {}
            Err(e) => report
                .warnings
                .push(format!("Failed to rewrite {}: {e}", path.display())),
        }
    }
}

/// Recursively copy `src` into `dest`, skipping top-level names in
/// `exclude` and symlinks. Returns the number of files copied.
fn copy_tree(src: &Path, dest: &Path, exclude: &[&str]) -> Result<usize, PlacementError> {
    fs::create_dir_all(dest).map_err(|source| PlacementError::Io {
        path: dest.to_path_buf(),
        source,
    })?;

    let mut copied = 0;
    let walker = WalkDir::new(src).min_depth(1).into_iter().filter_entry(|e| {
        let top_level_excluded = e.depth() == 1
            && e.file_name()
                .to_str()
                .is_some_and(|name| exclude.contains(&name));
        !top_level_excluded
    });

    for entry in walker {
        let entry = entry.map_err(|source| PlacementError::Walk {
            path: src.to_path_buf(),
            source,
        })?;
        let Ok(relative) = entry.path().strip_prefix(src) else {
            continue;
        };
        let target = dest.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target).map_err(|source| PlacementError::Io {
                path: target.clone(),
                source,
            })?;
        } else if file_type.is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|source| PlacementError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            fs::copy(entry.path(), &target).map_err(|source| PlacementError::Io {
                path: target.clone(),
                source,
            })?;
            copied += 1;
        }
    }

    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(backend: bool, frontend: bool, src: bool, components: bool, app: bool) -> StagingLayout {
        StagingLayout {
            has_backend: backend,
            has_frontend: frontend,
            has_root_src: src,
            has_root_components: components,
            has_app_entry: app,
        }
    }

    fn roots(base: &Path) -> PlacementRoots {
        PlacementRoots {
            server_modules: base.join("server"),
            client_modules: base.join("client"),
            mount_prefix: "/api/v1/modules".to_string(),
        }
    }

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn decision_table() {
        use CopyStep::*;
        let cases = [
            (layout(true, false, false, false, false), vec![Backend]),
            (layout(true, true, false, false, false), vec![Backend, Frontend]),
            (layout(false, true, true, false, false), vec![Frontend, RootSrc]),
            (layout(false, false, true, false, false), vec![WholeTree]),
            (layout(true, false, false, true, false), vec![Backend, WholeTree]),
            (layout(false, false, false, false, true), vec![WholeTree]),
            (layout(false, false, false, false, false), vec![]),
        ];
        for (input, expected) in cases {
            assert_eq!(PlacementPlan::decide(&input).steps, expected, "{input:?}");
        }
    }

    #[test]
    fn src_is_never_copied_twice() {
        let plan = PlacementPlan::decide(&layout(false, false, true, true, true));
        assert_eq!(plan.steps, vec![CopyStep::WholeTree]);
    }

    #[test]
    fn legacy_urls_rewritten() {
        let src = "a http://localhost:3001/api/modules/todo-manager/x b http://localhost:3001/api/modules/user-manager/y";
        let out = rewrite_api_paths(src, "/api/v1/modules/p/").unwrap();
        assert_eq!(out, "a /api/v1/modules/p/x b /api/v1/modules/p/y");
    }

    #[test]
    fn places_backend_and_frontend() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("staging/17-ab-todo");
        write(&staging.join("module.json"), "{}");
        write(&staging.join("backend/routes.json"), r#"{"routes":[]}"#);
        write(
            &staging.join("frontend/components/TodoManager.js"),
            "fetch('/api/modules/MODULE_PATH/todos')",
        );
        write(&staging.join("frontend/components/readme.md"), "/api/modules/MODULE_PATH/");

        let roots = roots(dir.path());
        let report = place_module(&staging, "17-ab-todo", &roots).unwrap();

        assert_eq!(report.steps, vec![CopyStep::Backend, CopyStep::Frontend]);
        assert_eq!(report.files_copied, 3);
        assert_eq!(report.rewritten_files, vec!["TodoManager.js".to_string()]);
        assert!(roots.server_modules.join("17-ab-todo/routes.json").is_file());
        let component = fs::read_to_string(
            roots.client_modules.join("17-ab-todo/components/TodoManager.js"),
        )
        .unwrap();
        assert_eq!(component, "fetch('/api/v1/modules/17-ab-todo/todos')");
        let untouched =
            fs::read_to_string(roots.client_modules.join("17-ab-todo/components/readme.md"))
                .unwrap();
        assert_eq!(untouched, "/api/modules/MODULE_PATH/");
    }

    #[test]
    fn bare_frontend_copies_whole_tree_once() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("staging/m");
        write(&staging.join("module.json"), "{}");
        write(&staging.join("App.js"), "app");
        write(&staging.join("src/index.js"), "index");
        write(&staging.join("backend/routes.json"), "{}");

        let roots = roots(dir.path());
        let report = place_module(&staging, "m", &roots).unwrap();

        assert_eq!(report.steps, vec![CopyStep::Backend, CopyStep::WholeTree]);
        let client = roots.client_modules.join("m");
        assert!(client.join("App.js").is_file());
        assert!(client.join("src/index.js").is_file());
        assert!(!client.join("src/src").exists());
        assert!(!client.join("backend").exists());
        assert!(!client.join("module.json").exists());
    }

    #[test]
    fn empty_archive_places_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("staging/e");
        fs::create_dir_all(&staging).unwrap();

        let roots = roots(dir.path());
        let report = place_module(&staging, "e", &roots).unwrap();

        assert!(report.steps.is_empty());
        assert_eq!(report.files_copied, 0);
        assert!(!roots.client_modules.join("e").exists());
    }
}
