use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;

const LOG_FILE_PREFIX: &str = "adaptive-tutor.log";
const DEFAULT_LOG_DIR: &str = "./logs";

/// Keeps the non-blocking file writer flushing; hold it for the life of the process.
pub struct FileLogGuard {
    _guard: WorkerGuard,
}

/// Directory for rolling log files, from `ENABLE_FILE_LOGS` and `LOG_DIR`
/// values. `None` means stdout only.
pub fn file_log_dir(enabled: Option<&str>, dir: Option<&str>) -> Option<PathBuf> {
    let enabled = enabled.is_some_and(|v| matches!(v.trim(), "true" | "1"));
    if !enabled {
        return None;
    }
    let dir = dir.map(str::trim).filter(|d| !d.is_empty()).unwrap_or(DEFAULT_LOG_DIR);
    Some(PathBuf::from(dir))
}

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
}

fn init_with_file(level: &str, dir: &Path) -> Result<Option<FileLogGuard>, std::io::Error> {
    std::fs::create_dir_all(dir)?;

    let appender = RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let file_layer = fmt::layer().with_writer(writer).with_ansi(false).with_target(true);

    let installed = tracing_subscriber::registry()
        .with(env_filter(level))
        .with(fmt::layer().with_target(true))
        .with(file_layer)
        .try_init()
        .is_ok();

    Ok(installed.then(|| FileLogGuard { _guard: guard }))
}

/// Installs the global subscriber for `config`. Returns a guard only when
/// file logging is on and this call installed the subscriber; an already
/// installed subscriber (an embedding application's, or an earlier call)
/// is left in place.
pub fn init_tracing(config: &Config) -> Option<FileLogGuard> {
    if let Some(dir) = config.log_dir.as_deref() {
        match init_with_file(&config.log_level, dir) {
            Ok(guard) => return guard,
            Err(err) => eprintln!("failed to create log directory {}: {err}", dir.display()),
        }
    }

    let installed = tracing_subscriber::registry()
        .with(env_filter(&config.log_level))
        .with(fmt::layer().with_target(true))
        .try_init();
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }

    None
}
