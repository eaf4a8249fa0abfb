//! Logging setup for the trajsync binary
//!
//! Logs always go to stderr. `--log-file` adds an append-only copy in
//! `trajsync.log` under the log directory, without ANSI colours.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::{paths, Result, TrajsyncError};

/// Environment variable holding the log filter
pub const LOG_ENV_VAR: &str = "TRAJSYNC_LOG";

/// Name of the log file inside the log directory
pub const LOG_FILE_NAME: &str = "trajsync.log";

/// Where log lines are written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    Stderr,
    /// Stderr plus the log file
    Both,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub output: LogOutput,
    /// `EnvFilter` directives, e.g. "info" or "trajsync_client=debug"
    pub filter: String,
    /// Log span enter/exit
    pub span_events: bool,
    /// Include source file and line
    pub file_line: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::client()
    }
}

impl LogConfig {
    /// Stderr only, filtered by `TRAJSYNC_LOG` (`info` when unset)
    pub fn client() -> Self {
        Self {
            output: LogOutput::Stderr,
            filter: std::env::var(LOG_ENV_VAR).unwrap_or_else(|_| "info".into()),
            span_events: false,
            file_line: false,
        }
    }

    /// Debug level with span events and source locations
    pub fn verbose() -> Self {
        Self {
            output: LogOutput::Stderr,
            filter: "debug".into(),
            span_events: true,
            file_line: true,
        }
    }

    /// Also write to the log file
    pub fn with_log_file(self) -> Self {
        Self {
            output: LogOutput::Both,
            file_line: true,
            ..self
        }
    }
}

/// Install the global subscriber
pub fn init_logging(config: LogConfig) -> Result<()> {
    let filter = EnvFilter::try_new(&config.filter)
        .map_err(|e| TrajsyncError::config(format!("Invalid log filter: {}", e)))?;

    let span_events = if config.span_events {
        FmtSpan::ENTER | FmtSpan::EXIT
    } else {
        FmtSpan::NONE
    };

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_span_events(span_events)
        .with_file(config.file_line)
        .with_line_number(config.file_line);

    let file_layer = match config.output {
        LogOutput::Stderr => None,
        LogOutput::Both => {
            let file = open_log_file(&paths::log_dir())?;
            Some(
                fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false)
                    .with_target(true)
                    .with_file(config.file_line)
                    .with_line_number(config.file_line),
            )
        }
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| TrajsyncError::internal(format!("Failed to init logging: {}", e)))
}

/// Path of the log file written with `--log-file`
pub fn log_file_path() -> PathBuf {
    paths::log_dir().join(LOG_FILE_NAME)
}

/// Open `trajsync.log` in `dir` for appending, creating both as needed
fn open_log_file(dir: &Path) -> Result<File> {
    std::fs::create_dir_all(dir).map_err(|e| TrajsyncError::FileWrite {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let path = dir.join(LOG_FILE_NAME);
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| TrajsyncError::FileWrite { path, source: e })
}
