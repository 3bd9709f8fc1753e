//! Tracing subscriber setup.
//!
//! `RUST_LOG` wins when set; otherwise the filter is built from `LOG_LEVEL`.
//! `LOG_FORMAT=json` emits one JSON object per line for log shippers, any
//! other value gives human-readable output.
//!
//! Events go to stdout and, unless `LOG_FILE` is empty, to
//! `LOG_DIR/LOG_FILE` through a non-blocking writer. The file is rotated once
//! it reaches `LOG_MAX_BYTES`, keeping `LOG_BACKUP_COUNT` old files
//! (`stem-separator.log.1` is the most recent).

use std::io;

use file_rotate::compression::Compression;
use file_rotate::suffix::AppendCount;
use file_rotate::{ContentLimit, FileRotate};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::config::{self, Settings};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    pub fn from_setting(value: &str) -> Self {
        if value.eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Pretty
        }
    }
}

fn env_filter(settings: &Settings) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter(&settings.log_level)))
}

fn format_layer<S, W>(format: LogFormat, writer: W, ansi: bool) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer().with_writer(writer).with_ansi(ansi);
    match format {
        LogFormat::Json => layer
            .json()
            .with_current_span(false)
            .with_target(true)
            .boxed(),
        LogFormat::Pretty => layer.with_target(false).boxed(),
    }
}

/// Size-rotated log file, `None` when file logging is disabled.
fn open_log_file(settings: &Settings) -> Option<io::Result<FileRotate<AppendCount>>> {
    let path = settings.log_path()?;
    if let Err(e) = std::fs::create_dir_all(&settings.log_dir) {
        return Some(Err(e));
    }
    Some(Ok(FileRotate::new(
        path,
        AppendCount::new(settings.log_backup_count),
        ContentLimit::Bytes(settings.log_max_bytes.max(1)),
        Compression::None,
        #[cfg(unix)]
        None,
    )))
}

/// Install the global subscriber. A second call is a no-op, which keeps
/// tests and embedders that install their own subscriber working.
///
/// The returned guard flushes the file log when dropped; hold it for the
/// lifetime of the process.
pub fn init_tracing(settings: &Settings) -> Option<WorkerGuard> {
    let format = LogFormat::from_setting(&settings.log_format);

    let mut file_error = None;
    let (file_writer, guard) = match open_log_file(settings) {
        Some(Ok(file)) => {
            let (writer, guard) = tracing_appender::non_blocking(file);
            (Some(writer), Some(guard))
        }
        Some(Err(e)) => {
            file_error = Some(e);
            (None, None)
        }
        None => (None, None),
    };

    let installed = tracing_subscriber::registry()
        .with(env_filter(settings))
        .with(format_layer(format, io::stdout, true))
        .with(file_writer.map(|writer| format_layer(format, writer, false)))
        .try_init();

    if installed.is_err() {
        return None;
    }

    tracing::info!(
        level = %settings.log_level,
        format = %settings.log_format,
        file = ?settings.log_path(),
        "Logging configured"
    );
    if let Some(e) = file_error {
        tracing::warn!(
            log_dir = %settings.log_dir.display(),
            error = %e,
            "File logging disabled"
        );
    }
    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_settings(base: &std::path::Path) -> Settings {
        Settings {
            log_dir: base.join("logs"),
            ..Settings::with_base_dir(base)
        }
    }

    #[test]
    fn json_is_case_insensitive() {
        assert_eq!(LogFormat::from_setting("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::from_setting("json"), LogFormat::Json);
    }

    #[test]
    fn anything_else_is_pretty() {
        assert_eq!(LogFormat::from_setting("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::from_setting(""), LogFormat::Pretty);
    }

    #[test]
    fn init_twice_does_not_panic() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = file_settings(tmp.path());
        let _guard = init_tracing(&settings);
        assert!(init_tracing(&settings).is_none());
    }

    #[test]
    fn empty_log_file_disables_file_logging() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = Settings {
            log_file: String::new(),
            ..file_settings(tmp.path())
        };
        assert!(open_log_file(&settings).is_none());
        assert!(!settings.log_dir.exists());
    }

    #[test]
    fn file_layer_writes_plain_json_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = file_settings(tmp.path());
        let file = open_log_file(&settings).unwrap().unwrap();
        let (writer, guard) = tracing_appender::non_blocking(file);

        let subscriber =
            tracing_subscriber::registry().with(format_layer(LogFormat::Json, writer, false));
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(job_id = "abc", "Separation finished");
        });
        drop(guard);

        let contents = std::fs::read_to_string(settings.log_path().unwrap()).unwrap();
        assert!(contents.contains("Separation finished"), "got {contents}");
        assert!(contents.contains("\"job_id\":\"abc\""), "got {contents}");
        assert!(!contents.contains('\u{1b}'));
    }

    #[test]
    fn log_file_rotates_by_size() {
        use std::io::Write;

        let tmp = tempfile::tempdir().unwrap();
        let settings = Settings {
            log_max_bytes: 64,
            log_backup_count: 2,
            ..file_settings(tmp.path())
        };
        let mut file = open_log_file(&settings).unwrap().unwrap();
        for _ in 0..10 {
            file.write_all(&[b'x'; 40]).unwrap();
            file.write_all(b"\n").unwrap();
        }
        file.flush().unwrap();

        let log_dir = &settings.log_dir;
        assert!(log_dir.join("stem-separator.log").is_file());
        assert!(log_dir.join("stem-separator.log.1").is_file());
        assert!(log_dir.join("stem-separator.log.2").is_file());
        assert!(!log_dir.join("stem-separator.log.3").exists());
    }
}
