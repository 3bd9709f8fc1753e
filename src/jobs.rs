//! Completed-job registry and output retention.
//!
//! Each successful separation leaves a directory `OUTPUT_DIR/<job_id>` holding
//! its stems. The [`JobStore`] remembers what each job produced and when, and
//! the [`JobSweeper`] deletes job directories and orphaned uploads once they
//! outlive the retention window.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::stems::{OutputFormat, StemType};

/// One finished separation.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub job_id: String,
    pub stems: StemType,
    pub format: OutputFormat,
    pub output_dir: PathBuf,
    pub output_files: Vec<String>,
    pub processing_time: f64,
    pub created_at: DateTime<Utc>,
}

/// In-memory index of finished jobs. Lost on restart; downloads are served
/// from the filesystem, and leftover job directories age out by mtime.
///
/// Jobs still being uploaded or separated are tracked separately so the
/// sweeper never touches their files.
#[derive(Debug, Default)]
pub struct JobStore {
    jobs: RwLock<HashMap<String, JobRecord>>,
    in_flight: RwLock<HashSet<String>>,
}

/// Marks a job as running until dropped.
#[must_use = "the job stops being tracked as running when the guard is dropped"]
pub struct InFlight<'a> {
    store: &'a JobStore,
    job_id: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Ok(mut running) = self.store.in_flight.write() {
            running.remove(&self.job_id);
        }
    }
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: JobRecord) {
        if let Ok(mut jobs) = self.jobs.write() {
            jobs.insert(record.job_id.clone(), record);
        }
    }

    pub fn get(&self, job_id: &str) -> Option<JobRecord> {
        self.jobs.read().ok()?.get(job_id).cloned()
    }

    pub fn remove(&self, job_id: &str) -> Option<JobRecord> {
        self.jobs.write().ok()?.remove(job_id)
    }

    pub fn len(&self) -> usize {
        self.jobs.read().map(|jobs| jobs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Jobs created at or before `cutoff`.
    pub fn expired(&self, cutoff: DateTime<Utc>) -> Vec<String> {
        self.jobs
            .read()
            .map(|jobs| {
                jobs.values()
                    .filter(|job| job.created_at <= cutoff)
                    .map(|job| job.job_id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Track `job_id` as running until the guard is dropped.
    pub fn begin(&self, job_id: &str) -> InFlight<'_> {
        if let Ok(mut running) = self.in_flight.write() {
            running.insert(job_id.to_string());
        }
        InFlight {
            store: self,
            job_id: job_id.to_string(),
        }
    }

    pub fn is_in_flight(&self, job_id: &str) -> bool {
        self.in_flight
            .read()
            .map(|running| running.contains(job_id))
            .unwrap_or(false)
    }

    /// Whether a staged upload (`{job_id}_{name}`) belongs to a running job.
    fn owns_running_upload(&self, filename: &str) -> bool {
        filename
            .split_once('_')
            .is_some_and(|(job_id, _)| self.is_in_flight(job_id))
    }

    fn job_ids(&self) -> Vec<String> {
        self.jobs
            .read()
            .map(|jobs| jobs.keys().cloned().collect())
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Sweeping
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub jobs_removed: usize,
    pub uploads_removed: usize,
}

/// Delete job directories and staged uploads older than `retention`, as of `now`.
///
/// Job age comes from the store when the job is known, otherwise from the
/// directory's modification time (jobs left over from a previous run).
/// Running jobs and their staged uploads are skipped whatever their age.
pub fn sweep(
    store: &JobStore,
    output_dir: &Path,
    upload_dir: &Path,
    retention: Duration,
    now: DateTime<Utc>,
) -> SweepReport {
    let Ok(retention) = chrono::Duration::from_std(retention) else {
        return SweepReport::default();
    };
    let cutoff = now - retention;
    let mut report = SweepReport::default();

    let expired: HashSet<String> = store.expired(cutoff).into_iter().collect();

    for (path, name) in entries(output_dir) {
        if store.is_in_flight(&name) {
            continue;
        }
        let is_expired = if store.get(&name).is_some() {
            expired.contains(&name)
        } else {
            modified_at(&path).is_some_and(|modified| modified <= cutoff)
        };
        if !is_expired {
            continue;
        }

        let result = if path.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        match result {
            Ok(()) => {
                store.remove(&name);
                report.jobs_removed += 1;
                tracing::info!(job_id = %name, "Expired job output removed");
            }
            Err(e) => {
                tracing::warn!(job_id = %name, error = %e, "Failed to remove expired job output");
            }
        }
    }

    // Records whose directory vanished underneath us.
    for job_id in store.job_ids() {
        if !output_dir.join(&job_id).exists() {
            store.remove(&job_id);
        }
    }

    for (path, name) in entries(upload_dir) {
        if !path.is_file() || store.owns_running_upload(&name) {
            continue;
        }
        if modified_at(&path).is_some_and(|modified| modified <= cutoff) {
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    report.uploads_removed += 1;
                    tracing::info!(file = %name, "Orphaned upload removed");
                }
                Err(e) => tracing::warn!(file = %name, error = %e, "Failed to remove upload"),
            }
        }
    }

    report
}

/// Remove every staged upload. Run once at startup: nothing can still be
/// processing a file staged by a previous run.
pub fn purge_stale_uploads(upload_dir: &Path) -> usize {
    let mut removed = 0;
    for (path, name) in entries(upload_dir) {
        if !path.is_file() {
            continue;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) => tracing::warn!(file = %name, error = %e, "Failed to remove stale upload"),
        }
    }
    if removed > 0 {
        tracing::info!(removed, "Stale uploads purged");
    }
    removed
}

fn entries(dir: &Path) -> Vec<(PathBuf, String)> {
    let Ok(read) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    read.flatten()
        .filter_map(|entry| {
            let name = entry.file_name().to_str()?.to_string();
            Some((entry.path(), name))
        })
        .collect()
}

fn modified_at(path: &Path) -> Option<DateTime<Utc>> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    Some(DateTime::<Utc>::from(modified))
}

// ---------------------------------------------------------------------------
// Background sweeper
// ---------------------------------------------------------------------------

/// Periodic [`sweep`] on a background task.
pub struct JobSweeper {
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl JobSweeper {
    pub fn start(
        store: Arc<JobStore>,
        output_dir: PathBuf,
        upload_dir: PathBuf,
        retention: Duration,
        interval: Duration,
    ) -> Self {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        let store = store.clone();
                        let output_dir = output_dir.clone();
                        let upload_dir = upload_dir.clone();
                        let result = tokio::task::spawn_blocking(move || {
                            sweep(&store, &output_dir, &upload_dir, retention, Utc::now())
                        })
                        .await;
                        match result {
                            Ok(report) if report != SweepReport::default() => {
                                tracing::info!(
                                    jobs_removed = report.jobs_removed,
                                    uploads_removed = report.uploads_removed,
                                    "Cleanup sweep finished"
                                );
                            }
                            Ok(_) => {}
                            Err(e) => tracing::error!(error = %e, "Cleanup sweep panicked"),
                        }
                    }
                }
            }
            tracing::debug!("Job sweeper stopped");
        });

        tracing::info!(
            retention_secs = retention.as_secs(),
            interval_secs = interval.as_secs(),
            "Job sweeper started"
        );

        Self {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Stop the sweeper and wait for an in-flight sweep. Idempotent.
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}
