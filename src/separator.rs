//! Stem separation backend.
//!
//! The HTTP layer talks to a [`StemSeparator`] trait object. The production
//! implementation, [`SpleeterCli`], runs the Spleeter command line tool as a
//! child process per job:
//!
//! ```text
//! spleeter separate -p spleeter:4stems -o <out> -c wav -b 320k -f {instrument}.{codec} <input>
//! ```
//!
//! The child is killed when its future is dropped, so a timeout or a client
//! disconnect never leaves a separation running in the background.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use tokio::process::Command;

use crate::config::Settings;
use crate::stems::{Bitrate, OutputFormat, StemType};

/// Lines of separator stderr kept in error messages.
const STDERR_TAIL_LINES: usize = 20;

/// Output naming handed to Spleeter so stems land directly in the job directory.
const FILENAME_FORMAT: &str = "{instrument}.{codec}";

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

#[derive(Debug, thiserror::Error)]
pub enum SeparationError {
    #[error("Separator is unavailable: {0}")]
    Unavailable(String),
    #[error("Separation timed out after {0}s")]
    Timeout(u64),
    #[error("Separator exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
    #[error("Separator finished but produced no stem files")]
    NoOutput,
    #[error("I/O error during separation: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything the separator needs for one job.
#[derive(Debug, Clone)]
pub struct SeparationRequest {
    pub job_id: String,
    pub input_file: PathBuf,
    pub output_dir: PathBuf,
    pub stems: StemType,
    pub bitrate: Bitrate,
    pub format: OutputFormat,
}

#[derive(Debug, Clone, Serialize)]
pub struct SeparationOutcome {
    /// Stem filenames relative to the job directory, sorted.
    pub output_files: Vec<String>,
    /// Wall-clock seconds spent in the separator.
    pub processing_time: f64,
}

/// A backend able to split one audio file into stems.
#[async_trait]
pub trait StemSeparator: Send + Sync {
    /// Separate `request.input_file` into `request.output_dir`.
    async fn separate(
        &self,
        request: &SeparationRequest,
    ) -> Result<SeparationOutcome, SeparationError>;

    /// Models that completed at least one separation since startup.
    fn loaded_models(&self) -> Vec<StemType>;

    /// Why the backend could not be launched last time, if it failed.
    fn last_error(&self) -> Option<String>;

    fn name(&self) -> &'static str;
}

// ═══════════════════════════════════════════════════════════
// SpleeterCli
// ═══════════════════════════════════════════════════════════

/// Runs the Spleeter CLI as a subprocess.
pub struct SpleeterCli {
    program: String,
    prefix_args: Vec<String>,
    model_dir: PathBuf,
    timeout: Duration,
    loaded: Mutex<HashSet<StemType>>,
    last_error: Mutex<Option<String>>,
}

impl SpleeterCli {
    /// `command_line` is split on whitespace: `python -m spleeter` runs
    /// `python` with `-m spleeter` before the separation arguments.
    pub fn new(
        command_line: &str,
        model_dir: PathBuf,
        timeout: Duration,
    ) -> Result<Self, SeparationError> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| SeparationError::Unavailable("separator command is empty".into()))?;

        Ok(Self {
            program,
            prefix_args: parts.collect(),
            model_dir,
            timeout,
            loaded: Mutex::new(HashSet::new()),
            last_error: Mutex::new(None),
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, SeparationError> {
        Self::new(
            &settings.spleeter_command,
            settings.model_dir.clone(),
            settings.process_timeout(),
        )
    }

    fn build_command(&self, request: &SeparationRequest) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.prefix_args)
            .arg("separate")
            .arg("-p")
            .arg(request.stems.model_name())
            .arg("-o")
            .arg(&request.output_dir)
            .arg("-c")
            .arg(request.format.as_str())
            .arg("-b")
            .arg(request.bitrate.as_str())
            .arg("-f")
            .arg(FILENAME_FORMAT)
            .arg(&request.input_file)
            .env("MODEL_PATH", &self.model_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    fn set_last_error(&self, error: Option<String>) {
        if let Ok(mut slot) = self.last_error.lock() {
            *slot = error;
        }
    }
}

#[async_trait]
impl StemSeparator for SpleeterCli {
    async fn separate(
        &self,
        request: &SeparationRequest,
    ) -> Result<SeparationOutcome, SeparationError> {
        let started = Instant::now();
        tokio::fs::create_dir_all(&request.output_dir).await?;

        tracing::info!(
            job_id = %request.job_id,
            stems = %request.stems,
            format = %request.format,
            bitrate = %request.bitrate,
            "Performing separation"
        );

        let child = match self.build_command(request).spawn() {
            Ok(child) => child,
            Err(e) => {
                let reason = format!("cannot launch '{}': {e}", self.program);
                tracing::error!(job_id = %request.job_id, %reason, "Separator launch failed");
                self.set_last_error(Some(reason.clone()));
                return Err(SeparationError::Unavailable(reason));
            }
        };
        self.set_last_error(None);

        // Dropping the future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                tracing::warn!(
                    job_id = %request.job_id,
                    timeout_secs = self.timeout.as_secs(),
                    "Separation timed out, process killed"
                );
                return Err(SeparationError::Timeout(self.timeout.as_secs()));
            }
        };

        if !output.status.success() {
            let stderr = stderr_tail(&output.stderr);
            tracing::error!(
                job_id = %request.job_id,
                status = %output.status,
                %stderr,
                "Separator exited with failure"
            );
            return Err(SeparationError::Failed {
                status: output.status.to_string(),
                stderr,
            });
        }

        let output_dir = request.output_dir.clone();
        let stems = request.stems;
        let output_files =
            tokio::task::spawn_blocking(move || collect_output_files(&output_dir, stems))
                .await
                .map_err(|e| std::io::Error::other(format!("output collection task failed: {e}")))??;
        if output_files.is_empty() {
            return Err(SeparationError::NoOutput);
        }

        if let Ok(mut loaded) = self.loaded.lock() {
            loaded.insert(request.stems);
        }

        let processing_time = started.elapsed().as_secs_f64();
        tracing::info!(
            job_id = %request.job_id,
            processing_time,
            files = output_files.len(),
            "Audio separation completed"
        );

        Ok(SeparationOutcome {
            output_files,
            processing_time,
        })
    }

    fn loaded_models(&self) -> Vec<StemType> {
        let loaded = match self.loaded.lock() {
            Ok(guard) => guard.clone(),
            Err(_) => return Vec::new(),
        };
        StemType::ALL
            .into_iter()
            .filter(|stems| loaded.contains(stems))
            .collect()
    }

    fn last_error(&self) -> Option<String> {
        self.last_error.lock().ok().and_then(|e| e.clone())
    }

    fn name(&self) -> &'static str {
        "spleeter-cli"
    }
}

/// Last lines of the child's stderr, lossily decoded.
fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

// ═══════════════════════════════════════════════════════════
// Output discovery and cleanup
// ═══════════════════════════════════════════════════════════

/// Find the stem files the separator wrote for `stems`.
///
/// Older Spleeter releases ignore the filename format and write into a
/// sub-directory named after the input; when one exists it is searched
/// instead and its stems are moved up into `output_dir`, so the returned
/// names always resolve directly under the job directory.
pub fn collect_output_files(output_dir: &Path, stems: StemType) -> std::io::Result<Vec<String>> {
    let search_dir = first_subdir(output_dir)?.unwrap_or_else(|| output_dir.to_path_buf());
    let nested = search_dir != output_dir;

    let mut candidates: Vec<(String, PathBuf)> = Vec::new();
    for entry in std::fs::read_dir(&search_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            candidates.push((name.to_string(), entry.path()));
        }
    }

    let mut output_files = Vec::new();
    for stem in stems.stem_names() {
        let matches: Vec<&(String, PathBuf)> = candidates
            .iter()
            .filter(|(name, _)| {
                name.strip_prefix(stem)
                    .is_some_and(|rest| rest.starts_with('.'))
            })
            .collect();

        if matches.is_empty() {
            tracing::warn!(
                stem,
                output_dir = %output_dir.display(),
                search_dir = %search_dir.display(),
                stems = %stems,
                "Expected output file not found"
            );
            continue;
        }

        for (name, path) in matches {
            if nested {
                std::fs::rename(path, output_dir.join(name))?;
            }
            output_files.push(name.clone());
        }
    }

    if nested {
        // Only succeeds when nothing else is left inside.
        let _ = std::fs::remove_dir(&search_dir);
    }

    output_files.sort();
    output_files.dedup();
    Ok(output_files)
}

/// Alphabetically first sub-directory, if any.
fn first_subdir(dir: &Path) -> std::io::Result<Option<PathBuf>> {
    let mut subdirs = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            subdirs.push(entry.path());
        }
    }
    subdirs.sort();
    Ok(subdirs.into_iter().next())
}

/// Remove files and directory trees, logging failures instead of returning them.
pub fn cleanup_paths<'a>(paths: impl IntoIterator<Item = &'a Path>) {
    for path in paths {
        let result = if path.is_file() {
            std::fs::remove_file(path)
        } else if path.is_dir() {
            std::fs::remove_dir_all(path)
        } else {
            continue;
        };

        match result {
            Ok(()) => tracing::debug!(path = %path.display(), "Deleted"),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to clean up"),
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Test double
// ═══════════════════════════════════════════════════════════

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) enum Behavior {
        Succeed,
        Fail,
        Unavailable,
        Timeout,
    }

    /// In-process separator that writes placeholder stems.
    pub(crate) struct ScriptedSeparator {
        behavior: Behavior,
        delay: Option<Duration>,
        loaded: Mutex<HashSet<StemType>>,
        pub(crate) calls: AtomicUsize,
    }

    impl ScriptedSeparator {
        pub(crate) fn new(behavior: Behavior) -> Self {
            Self {
                behavior,
                delay: None,
                loaded: Mutex::new(HashSet::new()),
                calls: AtomicUsize::new(0),
            }
        }

        pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub(crate) fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StemSeparator for ScriptedSeparator {
        async fn separate(
            &self,
            request: &SeparationRequest,
        ) -> Result<SeparationOutcome, SeparationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            match self.behavior {
                Behavior::Succeed => {
                    std::fs::create_dir_all(&request.output_dir)?;
                    for stem in request.stems.stem_names() {
                        let name = format!("{stem}.{}", request.format);
                        std::fs::write(request.output_dir.join(name), stem.as_bytes())?;
                    }
                    self.loaded.lock().unwrap().insert(request.stems);
                    Ok(SeparationOutcome {
                        output_files: collect_output_files(&request.output_dir, request.stems)?,
                        processing_time: 0.01,
                    })
                }
                Behavior::Fail => {
                    std::fs::create_dir_all(&request.output_dir)?;
                    Err(SeparationError::Failed {
                        status: "exit status: 1".into(),
                        stderr: "model exploded".into(),
                    })
                }
                Behavior::Unavailable => {
                    Err(SeparationError::Unavailable("spleeter not installed".into()))
                }
                Behavior::Timeout => Err(SeparationError::Timeout(600)),
            }
        }

        fn loaded_models(&self) -> Vec<StemType> {
            self.loaded.lock().unwrap().iter().copied().collect()
        }

        fn last_error(&self) -> Option<String> {
            (self.behavior == Behavior::Unavailable).then(|| "spleeter not installed".into())
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════
