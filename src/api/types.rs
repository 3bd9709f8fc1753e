//! Shared types for the HTTP layer.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;

use crate::config::Settings;
use crate::jobs::JobStore;
use crate::separator::StemSeparator;
use crate::stems::StemType;

/// Seconds a client is told to wait when every separation slot is taken.
pub const BUSY_RETRY_AFTER_SECS: u64 = 5;

// ═══════════════════════════════════════════════════════════
// API context: shared state for the router
// ═══════════════════════════════════════════════════════════

/// Shared context for all routes and middleware.
#[derive(Clone)]
pub struct ApiContext {
    pub settings: Arc<Settings>,
    pub separator: Arc<dyn StemSeparator>,
    pub jobs: Arc<JobStore>,
    /// One permit per separation allowed to run concurrently.
    pub permits: Arc<Semaphore>,
}

impl ApiContext {
    pub fn new(settings: Settings, separator: Arc<dyn StemSeparator>) -> Self {
        let permits = Arc::new(Semaphore::new(settings.max_concurrent_requests.max(1)));
        Self {
            settings: Arc::new(settings),
            separator,
            jobs: Arc::new(JobStore::new()),
            permits,
        }
    }

    /// Directory holding the stems of `job_id`.
    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        self.settings.output_dir.join(job_id)
    }
}

// ═══════════════════════════════════════════════════════════
// Response bodies
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Serialize)]
pub struct SeparationResponse {
    pub success: bool,
    pub message: String,
    pub job_id: String,
    pub stems: StemType,
    pub output_files: Vec<String>,
    pub processing_time: f64,
}

#[derive(Debug, Serialize)]
pub struct ServiceInfo {
    pub service: String,
    pub version: String,
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: String,
    pub service: String,
}

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    pub models_loaded: bool,
    /// Models that have completed at least one separation.
    pub models: Vec<StemType>,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
