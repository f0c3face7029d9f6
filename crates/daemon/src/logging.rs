// Tracing setup: stdout in json or pretty format, plus an optional daily log file

use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const LOG_FORMAT_ENV: &str = "KILN_LOG_FORMAT";
const DEFAULT_FILTER: &str = "kiln=info";
const LOG_FILE_PREFIX: &str = "kiln-daemon.log";

/// Install the global subscriber
///
/// The returned guard flushes the file writer on drop; keep it alive for the
/// lifetime of the process.
pub fn init(log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let log_format = std::env::var(LOG_FORMAT_ENV).unwrap_or_else(|_| "pretty".to_string());

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))
        .context("Failed to create env filter")?;

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log dir {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry().with(env_filter).with(file_layer);
    match log_format.as_str() {
        // Production: JSON structured logging
        "json" => registry.with(fmt::layer().json()).try_init(),
        // Development: Pretty formatting with colors
        _ => registry.with(fmt::layer().pretty()).try_init(),
    }
    .context("Failed to install tracing subscriber")?;

    Ok(guard)
}
