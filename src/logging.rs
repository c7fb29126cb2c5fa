use anyhow::{Context, Result};
use std::{fs, path::Path};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

pub const LOG_ENV: &str = "LEXIFORGE_LOG";

/// Installs the global subscriber: everything allowed by `LEXIFORGE_LOG`
/// (default `info`) goes to the log file, warnings and errors also go to
/// stderr. Keep the returned guard alive so buffered lines get flushed.
pub fn init(log_path: &Path) -> Result<WorkerGuard> {
    let dir = log_path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).context("create log dir")?;
    let file_name = log_path
        .file_name()
        .context("log path has no file name")?;

    let appender = tracing_appender::rolling::never(dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_target(true)
        .with_writer(writer)
        .with_filter(filter);
    let stderr_layer = fmt::layer()
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .with_filter(LevelFilter::WARN);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .context("install log subscriber")?;
    Ok(guard)
}
