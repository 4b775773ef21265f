use crate::infrastructure::error::InfraError;
use std::fs;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub const LOG_FILE_NAME: &str = "todo-sync.log";
pub const LOG_FILTER_ENV: &str = "TODO_SYNC_LOG";

/// Installs the global subscriber: JSON lines in `logs/todo-sync.log` and a compact
/// stderr layer. Keep the returned guard alive until exit so buffered lines flush.
pub fn init_logging(logs_dir: &Path, default_level: &str) -> Result<WorkerGuard, InfraError> {
    fs::create_dir_all(logs_dir)?;

    let file_appender = tracing_appender::rolling::never(logs_dir, LOG_FILE_NAME);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_env(LOG_FILTER_ENV)
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|error| InfraError::InvalidConfig(format!("invalid log filter: {error}")))?;

    let file_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_current_span(false)
        .with_writer(file_writer);
    let console_layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|error| InfraError::InvalidConfig(format!("logging already initialized: {error}")))?;

    Ok(guard)
}
