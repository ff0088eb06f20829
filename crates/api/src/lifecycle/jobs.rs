//! In-memory tracking of background installs.
//!
//! The upload endpoint answers before the archive is even extracted; the
//! job records how far the install got and everything that went wrong.

use std::collections::HashMap;

use modhost_core::types::{DbId, Timestamp};
use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Install progress. Moves forward only; `Failed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallStage {
    Staged,
    Extracted,
    Placed,
    Mounted,
    Failed,
}

impl InstallStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Mounted | Self::Failed)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InstallJob {
    pub id: Uuid,
    /// Original upload file name.
    pub file: String,
    pub module_path: String,
    pub stage: InstallStage,
    /// Set once the module record exists.
    pub module_id: Option<DbId>,
    pub warnings: Vec<String>,
    pub error: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Finished jobs kept for status queries before the oldest are dropped.
pub const DEFAULT_FINISHED_JOBS_KEPT: usize = 200;

/// Thread-safe job table; wrap in `Arc` and share.
///
/// Running jobs are always kept. Finished ones beyond the retention limit
/// are evicted oldest first whenever a new job is registered.
pub struct JobTracker {
    jobs: RwLock<HashMap<Uuid, InstallJob>>,
    finished_kept: usize,
}

impl Default for JobTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl JobTracker {
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_FINISHED_JOBS_KEPT)
    }

    pub fn with_retention(finished_kept: usize) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            finished_kept,
        }
    }

    /// Register a freshly staged upload.
    pub async fn create(&self, file: &str, module_path: &str) -> InstallJob {
        let now = chrono::Utc::now();
        let job = InstallJob {
            id: Uuid::new_v4(),
            file: file.to_string(),
            module_path: module_path.to_string(),
            stage: InstallStage::Staged,
            module_id: None,
            warnings: Vec::new(),
            error: None,
            created_at: now,
            updated_at: now,
        };
        let mut jobs = self.jobs.write().await;
        self.evict_finished(&mut jobs);
        jobs.insert(job.id, job.clone());
        job
    }

    pub async fn get(&self, id: Uuid) -> Option<InstallJob> {
        self.jobs.read().await.get(&id).cloned()
    }

    /// All jobs, newest first.
    pub async fn list(&self) -> Vec<InstallJob> {
        let mut jobs: Vec<InstallJob> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    pub async fn advance(&self, id: Uuid, stage: InstallStage) {
        self.update(id, |job| job.stage = stage).await;
    }

    pub async fn warn(&self, id: Uuid, warning: impl Into<String>) {
        let warning = warning.into();
        tracing::warn!(job_id = %id, %warning, "Install warning");
        self.update(id, |job| job.warnings.push(warning)).await;
    }

    pub async fn set_module(&self, id: Uuid, module_id: DbId) {
        self.update(id, |job| job.module_id = Some(module_id)).await;
    }

    pub async fn fail(&self, id: Uuid, reason: impl Into<String>) {
        let reason = reason.into();
        self.update(id, |job| {
            job.stage = InstallStage::Failed;
            job.error = Some(reason);
        })
        .await;
    }

    fn evict_finished(&self, jobs: &mut HashMap<Uuid, InstallJob>) {
        let mut finished: Vec<(Timestamp, Uuid)> = jobs
            .values()
            .filter(|job| job.stage.is_terminal())
            .map(|job| (job.updated_at, job.id))
            .collect();
        if finished.len() <= self.finished_kept {
            return;
        }
        finished.sort();
        let excess = finished.len() - self.finished_kept;
        for (_, id) in finished.into_iter().take(excess) {
            jobs.remove(&id);
        }
        tracing::debug!(evicted = excess, "Dropped finished install jobs");
    }

    /// Apply `f` unless the job is unknown or already finished.
    async fn update(&self, id: Uuid, f: impl FnOnce(&mut InstallJob)) {
        let mut jobs = self.jobs.write().await;
        let Some(job) = jobs.get_mut(&id) else {
            tracing::debug!(job_id = %id, "Update for unknown install job");
            return;
        };
        if job.stage.is_terminal() {
            return;
        }
        f(job);
        job.updated_at = chrono::Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn job_moves_through_stages() {
        let tracker = JobTracker::new();
        let job = tracker.create("demo.zip", "1-ab-demo").await;
        assert_eq!(job.stage, InstallStage::Staged);

        tracker.advance(job.id, InstallStage::Extracted).await;
        tracker.warn(job.id, "manifest unreadable").await;
        tracker.set_module(job.id, 7).await;
        tracker.advance(job.id, InstallStage::Mounted).await;

        let job = tracker.get(job.id).await.unwrap();
        assert_eq!(job.stage, InstallStage::Mounted);
        assert_eq!(job.module_id, Some(7));
        assert_eq!(job.warnings, vec!["manifest unreadable".to_string()]);
    }

    #[tokio::test]
    async fn finished_jobs_are_frozen() {
        let tracker = JobTracker::new();
        let job = tracker.create("demo.zip", "1-ab-demo").await;

        tracker.fail(job.id, "bad archive").await;
        tracker.advance(job.id, InstallStage::Mounted).await;

        let job = tracker.get(job.id).await.unwrap();
        assert_eq!(job.stage, InstallStage::Failed);
        assert_eq!(job.error.as_deref(), Some("bad archive"));
    }

    #[tokio::test]
    async fn unknown_job() {
        let tracker = JobTracker::new();
        tracker.advance(Uuid::new_v4(), InstallStage::Placed).await;
        assert!(tracker.get(Uuid::new_v4()).await.is_none());
        assert!(tracker.list().await.is_empty());
    }

    #[tokio::test]
    async fn oldest_finished_jobs_are_evicted() {
        let tracker = JobTracker::with_retention(2);
        let running = tracker.create("running.zip", "1-aa-running").await;

        let mut finished = Vec::new();
        for n in 0..3 {
            let job = tracker.create("done.zip", &format!("{n}-bb-done")).await;
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
            tracker.advance(job.id, InstallStage::Mounted).await;
            finished.push(job.id);
        }
        let newest = tracker.create("new.zip", "9-cc-new").await;

        assert!(tracker.get(finished[0]).await.is_none());
        assert!(tracker.get(finished[1]).await.is_some());
        assert!(tracker.get(finished[2]).await.is_some());
        assert!(tracker.get(running.id).await.is_some());
        assert!(tracker.get(newest.id).await.is_some());
        assert_eq!(tracker.list().await.len(), 4);
    }
}
