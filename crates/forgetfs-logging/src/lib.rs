//! Logging setup shared by the forgetfs binaries.
//!
//! Console output and an optional rolling file are layered on one
//! `tracing_subscriber` registry. `RUST_LOG` overrides the configured level.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// How often the log file is rotated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    #[default]
    Hourly,
    Daily,
    Never,
}

impl From<LogRotation> for rolling::Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Hourly => rolling::Rotation::HOURLY,
            LogRotation::Daily => rolling::Rotation::DAILY,
            LogRotation::Never => rolling::Rotation::NEVER,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level filter (trace, debug, info, warn, error).
    #[serde(default = "default_level")]
    pub level: String,

    /// Directory for log files. If None, no file logging.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Prefix for log file names.
    #[serde(default = "default_prefix")]
    pub file_prefix: String,

    #[serde(default)]
    pub rotation: LogRotation,

    /// Whether to output JSON format.
    #[serde(default)]
    pub json_format: bool,

    /// Whether to also output to console (stderr).
    #[serde(default = "default_true")]
    pub console_output: bool,
}

fn default_level() -> String {
    "info".into()
}

fn default_prefix() -> String {
    "forgetfs".into()
}

fn default_true() -> bool {
    true
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: default_level(),
            log_dir: None,
            file_prefix: default_prefix(),
            rotation: LogRotation::default(),
            json_format: false,
            console_output: true,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LogInitError {
    #[error("failed to create rolling file appender in {dir:?}: {source}")]
    Appender {
        dir: PathBuf,
        #[source]
        source: rolling::InitError,
    },

    #[error("a global tracing subscriber is already installed: {0}")]
    AlreadyInstalled(#[from] tracing_subscriber::util::TryInitError),
}

type BoxedLayer<S> = Box<dyn tracing_subscriber::Layer<S> + Send + Sync>;

/// Initialize the logging system. Should be called once at program startup.
///
/// Returns a guard that must be held alive for the duration of the program
/// when file logging is enabled (it owns the non-blocking writer thread).
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>, LogInitError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let registry = tracing_subscriber::registry().with(env_filter);

    let console_layer: Option<BoxedLayer<_>> = match (config.console_output, config.json_format) {
        (false, _) => None,
        (true, true) => Some(Box::new(fmt::layer().json().with_writer(std::io::stderr))),
        (true, false) => Some(Box::new(fmt::layer().with_writer(std::io::stderr))),
    };

    let (file_layer, guard): (Option<BoxedLayer<_>>, Option<WorkerGuard>) =
        match config.log_dir {
            Some(ref log_dir) => {
                let file_appender = rolling::RollingFileAppender::builder()
                    .rotation(config.rotation.into())
                    .filename_prefix(&config.file_prefix)
                    .filename_suffix("log")
                    .build(log_dir)
                    .map_err(|source| LogInitError::Appender {
                        dir: log_dir.clone(),
                        source,
                    })?;

                let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

                let layer: BoxedLayer<_> = if config.json_format {
                    Box::new(fmt::layer().json().with_writer(non_blocking))
                } else {
                    Box::new(fmt::layer().with_ansi(false).with_writer(non_blocking))
                };

                (Some(layer), Some(guard))
            }
            None => (None, None),
        };

    registry.with(console_layer).with(file_layer).try_init()?;

    Ok(guard)
}
