//! Console and file log sinks with independent thresholds.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::Subscriber;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::config::{ConfigError, LoggingConfig};

const FILE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Failed to open log file '{}': {source}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to install log subscriber: {0}")]
    Init(String),
}

/// Keeps the background file writer alive. Dropping it flushes pending lines.
#[must_use]
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

fn open_log_file(path: &Path) -> Result<std::fs::File, LoggingError> {
    let wrap = |source| LoggingError::File {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(wrap)?;
        }
    }
    OpenOptions::new().create(true).append(true).open(path).map_err(wrap)
}

/// Plain-text file sink: local timestamps, no colors, its own threshold.
fn file_layer<S, W>(writer: W, level: LevelFilter) -> impl Layer<S> + Send + Sync
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(false)
        .with_timer(ChronoLocal::new(FILE_TIME_FORMAT.to_string()))
        .with_filter(level)
}

/// Install the global subscriber. `RUST_LOG` overrides the console threshold.
pub fn init(config: &LoggingConfig) -> Result<LoggingGuard, LoggingError> {
    let console_level = config.console_filter()?;
    let file_level = config.file_filter()?;

    let console_filter = EnvFilter::builder()
        .with_default_directive(console_level.into())
        .from_env_lossy();
    let console_layer = fmt::layer().with_target(false).with_filter(console_filter);

    let (file_sink, file_guard) = if file_level == LevelFilter::OFF {
        (None, None)
    } else {
        let file = open_log_file(&config.file)?;
        let (writer, guard) = tracing_appender::non_blocking(file);
        (Some(file_layer(writer, file_level)), Some(guard))
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_sink)
        .try_init()
        .map_err(|e| LoggingError::Init(e.to_string()))?;

    Ok(LoggingGuard { _file: file_guard })
}
