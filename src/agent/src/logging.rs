use anyhow::{Context, Result};
use autoinst_common::constants::LOG_FILE_NAME;
use std::path::{Path, PathBuf};
use tracing_appender::rolling;
use tracing_subscriber::fmt::time::SystemTime;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global subscriber: everything at `log_level` and up goes to
/// `<log_dir>/agent.log`, warnings and errors are also echoed to stderr.
pub fn setup_logging(log_level: &str, log_dir: &Path) -> Result<PathBuf> {
    let filter = EnvFilter::try_new(log_level)
        .with_context(|| format!("invalid log filter {log_level:?}"))?;

    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("failed to create log directory {log_dir:?}"))?;
    let file_appender = rolling::never(log_dir, LOG_FILE_NAME);

    let file_layer = fmt::layer()
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_target(true)
        .with_level(true)
        .with_timer(SystemTime)
        .with_ansi(false)
        .with_writer(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr.with_max_level(tracing::Level::WARN));

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer);

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    let log_file = log_dir.join(LOG_FILE_NAME);
    tracing::info!("Logging system initialized. Writing to {:?}", log_file);

    Ok(log_file)
}
