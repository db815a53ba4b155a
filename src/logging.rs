//! Run logging.
//!
//! A [`RunLog`] installs a tracing subscriber for the current thread that
//! writes to stdout and to a log file truncated at the start of each run.
//! File lines read `target - LEVEL - message`.

use std::{
    fs::{self, File},
    path::{Path, PathBuf},
};

use tracing::subscriber::DefaultGuard;
use tracing::{Event, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    filter::LevelFilter,
    fmt::{self, format, FmtContext, FormatEvent, FormatFields},
    prelude::*,
    registry::LookupSpan,
    EnvFilter, Registry,
};

/// Errors that may occur while setting up the run log.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Failed to prepare log directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to create log file at {path}: {source}")]
    CreateLogFile {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Handle owning the log file writer and the scoped subscriber.
///
/// Logging stays active until the handle is dropped; dropping it flushes the file.
pub struct RunLog {
    path: PathBuf,
    _default: DefaultGuard,
    _file_guard: WorkerGuard,
}

impl RunLog {
    /// Truncate `log_file` and route this thread's tracing events to it and stdout.
    ///
    /// Stdout honours `RUST_LOG` (default `info`, `debug` when `verbose`);
    /// the file always records INFO and above.
    pub fn init(log_file: &Path, verbose: bool) -> Result<Self, LoggingError> {
        if let Some(parent) = log_file.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| LoggingError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let file = File::create(log_file).map_err(|source| LoggingError::CreateLogFile {
            path: log_file.to_path_buf(),
            source,
        })?;
        let (file_writer, file_guard) = tracing_appender::non_blocking(file);

        let file_layer = fmt::layer()
            .with_ansi(false)
            .event_format(TargetLevelMessage)
            .with_writer(file_writer)
            .with_filter(LevelFilter::INFO);
        let stdout_layer = fmt::layer()
            .with_target(false)
            .without_time()
            .with_writer(std::io::stdout)
            .with_filter(build_env_filter(verbose));

        let subscriber = Registry::default().with(file_layer).with(stdout_layer);
        let default = tracing::subscriber::set_default(subscriber);

        tracing::debug!("Logging to {}", log_file.display());
        Ok(Self {
            path: log_file.to_path_buf(),
            _default: default,
            _file_guard: file_guard,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Log the outcome of a pipeline stage and hand the result back unchanged
    pub fn record<T>(&self, stage: &str, result: crate::Result<T>) -> crate::Result<T> {
        match &result {
            Ok(_) => tracing::info!("SUCCESS: {}", stage),
            Err(err) => tracing::error!("ERROR: {}: {:#}", stage, err),
        }
        result
    }
}

fn build_env_filter(verbose: bool) -> EnvFilter {
    let fallback = if verbose { "debug" } else { "info" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
}

/// `target - LEVEL - message`, one event per line
struct TargetLevelMessage;

impl<S, N> FormatEvent<S, N> for TargetLevelMessage
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let meta = event.metadata();
        write!(writer, "{} - {} - ", meta.target(), meta.level())?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}
