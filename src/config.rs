//! Service configuration.
//!
//! Every setting can be given as a long CLI flag or as the upper-case
//! environment variable of the same name (`PORT=9000`, `--port 9000`).
//! Defaults match a single-container deployment writing into `./temp`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{ArgAction, Parser};

use crate::stems::{Bitrate, OutputFormat, ParamError, StemType};

/// Application-level constants
pub const APP_NAME: &str = "stem-separator-api";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Upload extensions accepted by `POST /api/v1/separate` (lower-case, with dot).
pub const ALLOWED_EXTENSIONS: &[&str] = &[".aac", ".flac", ".m4a", ".mp3", ".ogg", ".wav"];

pub const DEFAULT_API_TITLE: &str = "Stem Separator API";
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_MAX_UPLOAD_SIZE: u64 = 100 * 1024 * 1024; // 100 MB
pub const DEFAULT_BITRATE: &str = "320k";
pub const DEFAULT_FORMAT: &str = "wav";
pub const DEFAULT_PROCESS_TIMEOUT_SECS: u64 = 600; // 10 minutes
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 5;
pub const DEFAULT_OUTPUT_RETENTION_SECS: u64 = 3600;
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_LOG_FILE: &str = "stem-separator.log";
pub const DEFAULT_LOG_MAX_BYTES: usize = 10 * 1024 * 1024; // 10 MB
pub const DEFAULT_LOG_BACKUP_COUNT: usize = 5;

/// Runtime settings for the API server.
#[derive(Parser, Debug, Clone)]
#[command(name = "stem-separator-api")]
#[command(author, version, about, long_about = None)]
pub struct Settings {
    /// Service name reported by `/` and `/health`
    #[arg(long, env = "API_TITLE", default_value = DEFAULT_API_TITLE)]
    pub api_title: String,

    /// Version reported by `/`, `/health` and `/ready`
    #[arg(long, env = "API_VERSION", default_value = APP_VERSION)]
    pub api_version: String,

    /// Include internal error details in error responses
    #[arg(long, env = "DEBUG", default_value_t = false, action = ArgAction::Set)]
    pub debug: bool,

    /// Address to bind
    #[arg(long, env = "HOST", default_value = DEFAULT_HOST)]
    pub host: String,

    /// Port to bind
    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Number of tokio worker threads
    #[arg(long, env = "WORKERS", default_value_t = 1)]
    pub workers: usize,

    /// Maximum accepted upload size in bytes
    #[arg(long, env = "MAX_UPLOAD_SIZE", default_value_t = DEFAULT_MAX_UPLOAD_SIZE)]
    pub max_upload_size: u64,

    /// Directory for staged uploads
    #[arg(long, env = "UPLOAD_DIR", default_value = "temp/uploads")]
    pub upload_dir: PathBuf,

    /// Directory holding one sub-directory of stems per job
    #[arg(long, env = "OUTPUT_DIR", default_value = "temp/output")]
    pub output_dir: PathBuf,

    /// Directory where the separator keeps its pretrained models
    #[arg(long, env = "MODEL_DIR", default_value = "pretrained_models")]
    pub model_dir: PathBuf,

    /// Stem layout used when the request does not name one
    #[arg(long, env = "DEFAULT_STEMS", default_value = "2stems")]
    pub default_stems: StemType,

    /// Output bitrate used when the request does not name one
    #[arg(long, env = "AUDIO_BITRATE", default_value = DEFAULT_BITRATE)]
    pub audio_bitrate: String,

    /// Output format used when the request does not name one
    #[arg(long, env = "AUDIO_FORMAT", default_value = DEFAULT_FORMAT)]
    pub audio_format: String,

    /// Command line that launches the separator, e.g. `python -m spleeter`
    #[arg(long, env = "SPLEETER_COMMAND", default_value = "spleeter")]
    pub spleeter_command: String,

    /// Log level used when `RUST_LOG` is not set
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// `json` for JSON lines, anything else for human-readable logs
    #[arg(long, env = "LOG_FORMAT", default_value = "json")]
    pub log_format: String,

    /// Directory for the rotating log file
    #[arg(long, env = "LOG_DIR", default_value = "logs")]
    pub log_dir: PathBuf,

    /// Log file name inside `LOG_DIR` (empty disables file logging)
    #[arg(long, env = "LOG_FILE", default_value = DEFAULT_LOG_FILE)]
    pub log_file: String,

    /// Size in bytes at which the log file is rotated
    #[arg(long, env = "LOG_MAX_BYTES", default_value_t = DEFAULT_LOG_MAX_BYTES)]
    pub log_max_bytes: usize,

    /// Rotated log files kept next to the active one
    #[arg(long, env = "LOG_BACKUP_COUNT", default_value_t = DEFAULT_LOG_BACKUP_COUNT)]
    pub log_backup_count: usize,

    /// Seconds a single separation may run before it is killed
    #[arg(long, env = "PROCESS_TIMEOUT", default_value_t = DEFAULT_PROCESS_TIMEOUT_SECS)]
    pub process_timeout: u64,

    /// Delete the staged upload once separation finishes
    #[arg(long, env = "CLEANUP_AFTER_PROCESSING", default_value_t = true, action = ArgAction::Set)]
    pub cleanup_after_processing: bool,

    /// Separations allowed to run at the same time
    #[arg(long, env = "MAX_CONCURRENT_REQUESTS", default_value_t = DEFAULT_MAX_CONCURRENT_REQUESTS)]
    pub max_concurrent_requests: usize,

    /// Seconds job outputs stay downloadable (0 keeps them forever)
    #[arg(long, env = "OUTPUT_RETENTION_SECS", default_value_t = DEFAULT_OUTPUT_RETENTION_SECS)]
    pub output_retention_secs: u64,

    /// Seconds between cleanup sweeps
    #[arg(long, env = "CLEANUP_INTERVAL_SECS", default_value_t = DEFAULT_CLEANUP_INTERVAL_SECS)]
    pub cleanup_interval_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_title: DEFAULT_API_TITLE.into(),
            api_version: APP_VERSION.into(),
            debug: false,
            host: DEFAULT_HOST.into(),
            port: DEFAULT_PORT,
            workers: 1,
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
            upload_dir: PathBuf::from("temp/uploads"),
            output_dir: PathBuf::from("temp/output"),
            model_dir: PathBuf::from("pretrained_models"),
            default_stems: StemType::TwoStems,
            audio_bitrate: DEFAULT_BITRATE.into(),
            audio_format: DEFAULT_FORMAT.into(),
            spleeter_command: "spleeter".into(),
            log_level: "info".into(),
            log_format: "json".into(),
            log_dir: PathBuf::from("logs"),
            log_file: DEFAULT_LOG_FILE.into(),
            log_max_bytes: DEFAULT_LOG_MAX_BYTES,
            log_backup_count: DEFAULT_LOG_BACKUP_COUNT,
            process_timeout: DEFAULT_PROCESS_TIMEOUT_SECS,
            cleanup_after_processing: true,
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
            output_retention_secs: DEFAULT_OUTPUT_RETENTION_SECS,
            cleanup_interval_secs: DEFAULT_CLEANUP_INTERVAL_SECS,
        }
    }
}

impl Settings {
    /// Settings rooted in `base`, for tests and embedded use.
    pub fn with_base_dir(base: &Path) -> Self {
        Self {
            upload_dir: base.join("uploads"),
            output_dir: base.join("output"),
            model_dir: base.join("models"),
            log_dir: base.join("logs"),
            ..Self::default()
        }
    }

    /// Reject default separation parameters no request could succeed with.
    pub fn validate(&self) -> Result<(), ParamError> {
        self.audio_format.parse::<OutputFormat>()?;
        Bitrate::parse(&self.audio_bitrate)?;
        Ok(())
    }

    /// Create upload, output, model and log directories if they are missing.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        for dir in [&self.upload_dir, &self.output_dir, &self.model_dir, &self.log_dir] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn process_timeout(&self) -> Duration {
        Duration::from_secs(self.process_timeout)
    }

    /// `None` when retention is disabled.
    pub fn output_retention(&self) -> Option<Duration> {
        (self.output_retention_secs > 0).then(|| Duration::from_secs(self.output_retention_secs))
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }

    /// Request body cap: the upload limit plus multipart framing overhead.
    pub fn body_limit(&self) -> usize {
        usize::try_from(self.max_upload_size)
            .unwrap_or(usize::MAX)
            .saturating_add(1024 * 1024)
    }

    pub fn max_upload_size_mb(&self) -> f64 {
        self.max_upload_size as f64 / (1024.0 * 1024.0)
    }

    /// Path of the active log file, `None` when file logging is off.
    pub fn log_path(&self) -> Option<PathBuf> {
        (!self.log_file.is_empty()).then(|| self.log_dir.join(&self.log_file))
    }
}

/// Default `tracing` filter when `RUST_LOG` is unset.
pub fn default_log_filter(level: &str) -> String {
    format!("{},hyper=warn,tower_http=warn", level.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_cli_defaults() {
        let parsed = Settings::try_parse_from(["stem-separator-api"]).unwrap();
        let default = Settings::default();
        assert_eq!(parsed.port, default.port);
        assert_eq!(parsed.api_version, APP_VERSION);
        assert_eq!(parsed.max_upload_size, default.max_upload_size);
        assert_eq!(parsed.default_stems, default.default_stems);
        assert_eq!(parsed.upload_dir, default.upload_dir);
        assert_eq!(parsed.cleanup_after_processing, default.cleanup_after_processing);
        assert_eq!(parsed.output_retention_secs, default.output_retention_secs);
    }

    #[test]
    fn flags_override_defaults() {
        let parsed = Settings::try_parse_from([
            "stem-separator-api",
            "--port",
            "9100",
            "--default-stems",
            "4stems",
            "--cleanup-after-processing",
            "false",
        ])
        .unwrap();
        assert_eq!(parsed.port, 9100);
        assert_eq!(parsed.default_stems, StemType::FourStems);
        assert!(!parsed.cleanup_after_processing);
    }

    #[test]
    fn invalid_default_stems_rejected() {
        let result =
            Settings::try_parse_from(["stem-separator-api", "--default-stems", "3stems"]);
        assert!(result.is_err());
    }

    #[test]
    fn ensure_directories_creates_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = Settings::with_base_dir(tmp.path());
        settings.ensure_directories().unwrap();
        assert!(settings.upload_dir.is_dir());
        assert!(settings.output_dir.is_dir());
        assert!(settings.model_dir.is_dir());
        assert!(settings.log_dir.is_dir());
    }

    #[test]
    fn log_file_settings_parse() {
        let parsed = Settings::try_parse_from([
            "stem-separator-api",
            "--log-dir",
            "/var/log/stems",
            "--log-max-bytes",
            "2048",
            "--log-backup-count",
            "2",
        ])
        .unwrap();
        assert_eq!(
            parsed.log_path(),
            Some(PathBuf::from("/var/log/stems/stem-separator.log"))
        );
        assert_eq!(parsed.log_max_bytes, 2048);
        assert_eq!(parsed.log_backup_count, 2);

        let disabled = Settings {
            log_file: String::new(),
            ..Settings::default()
        };
        assert!(disabled.log_path().is_none());
    }

    #[test]
    fn validate_accepts_defaults() {
        assert!(Settings::default().validate().is_ok());
        let settings = Settings {
            audio_format: "MP3".into(),
            audio_bitrate: "128000".into(),
            ..Settings::default()
        };
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_format_and_bitrate() {
        let bad_format = Settings {
            audio_format: "wave".into(),
            ..Settings::default()
        };
        assert!(matches!(bad_format.validate(), Err(ParamError::Format { .. })));

        let bad_bitrate = Settings {
            audio_bitrate: "320kbps".into(),
            ..Settings::default()
        };
        assert!(matches!(bad_bitrate.validate(), Err(ParamError::Bitrate(_))));
    }

    #[test]
    fn upload_limit_in_megabytes() {
        assert_eq!(Settings::default().max_upload_size_mb(), 100.0);
    }

    #[test]
    fn zero_retention_disables_sweeping() {
        let settings = Settings {
            output_retention_secs: 0,
            ..Settings::default()
        };
        assert!(settings.output_retention().is_none());
    }

    #[test]
    fn body_limit_includes_multipart_overhead() {
        let settings = Settings {
            max_upload_size: 10,
            ..Settings::default()
        };
        assert_eq!(settings.body_limit(), 10 + 1024 * 1024);
    }

    #[test]
    fn allowed_extensions_are_lowercase_with_dot() {
        assert_eq!(ALLOWED_EXTENSIONS.len(), 6);
        assert!(ALLOWED_EXTENSIONS
            .iter()
            .all(|e| e.starts_with('.') && *e == e.to_lowercase()));
    }

    #[test]
    fn default_log_filter_quiets_http_stack() {
        assert_eq!(default_log_filter("DEBUG"), "debug,hyper=warn,tower_http=warn");
    }
}
