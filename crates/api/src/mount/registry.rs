//! The mount table.
//!
//! [`ModuleRegistry::mount_all`] reconciles the table with what is on disk.
//! A module whose `routes.json` fingerprint is unchanged keeps its router
//! and generation, so repeated scans without filesystem changes leave the
//! table untouched. Scans are serialised; lookups only take a read lock.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use modhost_core::naming::is_valid_module_path;
use modhost_core::route_definition::{
    load_route_definition, BoundRoute, RouteDefinition, RouteDefinitionError, ROUTE_FILE,
};
use modhost_core::types::Timestamp;
use modhost_db::DbPool;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};

use super::handlers::{build_module_router, ModuleContext};

#[derive(Debug, thiserror::Error)]
pub enum MountError {
    #[error("Failed to scan module root {path}: {source}")]
    Scan {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot build router for {module}: {reason}")]
    Build { module: String, reason: String },
}

/// A module currently answering requests.
#[derive(Clone)]
pub struct MountedModule {
    /// Increases every time this path gets a freshly built router.
    pub generation: u64,
    /// SHA-256 of the `routes.json` the router was built from.
    pub fingerprint: String,
    pub definition: RouteDefinition,
    pub router: Router,
    pub mounted_at: Timestamp,
}

/// Serializable view of one mount table entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MountInfo {
    pub path: String,
    pub generation: u64,
    pub fingerprint: String,
    pub routes: Vec<BoundRoute>,
    pub mounted_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedMount {
    pub path: String,
    pub reason: String,
}

/// Outcome of one [`ModuleRegistry::mount_all`] pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MountReport {
    /// Newly mounted or rebuilt because the definition changed.
    pub mounted: Vec<String>,
    /// Kept as-is.
    pub unchanged: Vec<String>,
    pub skipped: Vec<SkippedMount>,
    /// Dropped because the directory or its definition went away.
    pub removed: Vec<String>,
}

pub struct ModuleRegistry {
    server_modules_dir: PathBuf,
    script_timeout: Duration,
    mounts: RwLock<HashMap<String, MountedModule>>,
    scan_lock: Mutex<()>,
    generation: AtomicU64,
}

impl ModuleRegistry {
    pub fn new(server_modules_dir: PathBuf, script_timeout: Duration) -> Self {
        Self {
            server_modules_dir,
            script_timeout,
            mounts: RwLock::new(HashMap::new()),
            scan_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    /// Router serving `module_path`, if mounted.
    pub async fn router_for(&self, module_path: &str) -> Option<Router> {
        self.mounts
            .read()
            .await
            .get(module_path)
            .map(|m| m.router.clone())
    }

    pub async fn is_mounted(&self, module_path: &str) -> bool {
        self.mounts.read().await.contains_key(module_path)
    }

    pub async fn len(&self) -> usize {
        self.mounts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.mounts.read().await.is_empty()
    }

    /// Current mount table, sorted by path.
    pub async fn snapshot(&self) -> Vec<MountInfo> {
        let mounts = self.mounts.read().await;
        let mut infos: Vec<MountInfo> = mounts
            .iter()
            .map(|(path, m)| MountInfo {
                path: path.clone(),
                generation: m.generation,
                fingerprint: m.fingerprint.clone(),
                routes: m.definition.bound_routes(),
                mounted_at: m.mounted_at,
            })
            .collect();
        infos.sort_by(|a, b| a.path.cmp(&b.path));
        infos
    }

    /// Drop a module from the table. Returns `true` if it was mounted.
    ///
    /// Waits for a running scan, which could otherwise write the module back.
    pub async fn unmount(&self, module_path: &str) -> bool {
        let _scan = self.scan_lock.lock().await;
        let removed = self.mounts.write().await.remove(module_path).is_some();
        if removed {
            tracing::info!(module_path, "Module unmounted");
        }
        removed
    }

    /// Rescan the server module root and reconcile the mount table.
    ///
    /// Directories without a usable definition are skipped with a warning
    /// and the scan continues. Only failing to list the root is an error.
    pub async fn mount_all(&self, pool: &DbPool) -> Result<MountReport, MountError> {
        let _scan = self.scan_lock.lock().await;

        let current = self.mounts.read().await.clone();
        let mut next = HashMap::with_capacity(current.len());
        let mut report = MountReport::default();

        for (module_path, dir) in self.module_dirs().await? {
            let (definition, fingerprint) = match load_route_definition(&dir).await {
                Ok(loaded) => loaded,
                Err(err) => {
                    let reason = match &err {
                        RouteDefinitionError::Read { source, .. }
                            if source.kind() == std::io::ErrorKind::NotFound =>
                        {
                            format!("no {ROUTE_FILE}")
                        }
                        _ => err.to_string(),
                    };
                    tracing::warn!(module_path, %reason, "Skipping module");
                    report.skipped.push(SkippedMount {
                        path: module_path,
                        reason,
                    });
                    continue;
                }
            };

            if let Some(existing) = current
                .get(&module_path)
                .filter(|m| m.fingerprint == fingerprint)
            {
                next.insert(module_path.clone(), existing.clone());
                report.unchanged.push(module_path);
                continue;
            }

            let ctx = Arc::new(ModuleContext {
                module_path: module_path.clone(),
                module_dir: dir,
                pool: pool.clone(),
                script_timeout: self.script_timeout,
            });
            let router = match build_module_router(&definition, ctx) {
                Ok(router) => router,
                Err(err) => {
                    tracing::warn!(module_path, error = %err, "Skipping module");
                    report.skipped.push(SkippedMount {
                        path: module_path,
                        reason: err.to_string(),
                    });
                    continue;
                }
            };

            let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::info!(
                module_path,
                generation,
                routes = definition.bound_routes().len(),
                "Module mounted",
            );
            next.insert(
                module_path.clone(),
                MountedModule {
                    generation,
                    fingerprint,
                    definition,
                    router,
                    mounted_at: chrono::Utc::now(),
                },
            );
            report.mounted.push(module_path);
        }

        report.removed = current
            .keys()
            .filter(|path| !next.contains_key(*path))
            .cloned()
            .collect();
        report.removed.sort();
        for path in &report.removed {
            tracing::info!(module_path = %path, "Module unmounted");
        }

        *self.mounts.write().await = next;

        tracing::debug!(
            mounted = report.mounted.len(),
            unchanged = report.unchanged.len(),
            skipped = report.skipped.len(),
            removed = report.removed.len(),
            "Module scan complete",
        );
        Ok(report)
    }

    /// Immediate subdirectories of the server module root, sorted by name.
    async fn module_dirs(&self) -> Result<Vec<(String, PathBuf)>, MountError> {
        let scan_err = |source| MountError::Scan {
            path: self.server_modules_dir.display().to_string(),
            source,
        };

        let mut entries = tokio::fs::read_dir(&self.server_modules_dir)
            .await
            .map_err(scan_err)?;

        let mut dirs = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(scan_err)? {
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            if !is_dir {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !is_valid_module_path(&name) {
                tracing::debug!(name, "Ignoring directory with an unusable module path");
                continue;
            }
            dirs.push((name, entry.path()));
        }
        dirs.sort();
        Ok(dirs)
    }
}
