use std::path::PathBuf;
use std::time::Duration;

use crate::engine::config::EngineConfig;
use crate::logging::file_log_dir;

const DEFAULT_GENERATION_TIMEOUT_SECS: u64 = 120;
const DEFAULT_BUNDLE_WORKERS: usize = 3;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    /// Rolling log file directory; `None` logs to stdout only.
    pub log_dir: Option<PathBuf>,
    pub state_dir: PathBuf,
    pub database_url: Option<String>,
    pub sqlite_path: Option<PathBuf>,
    pub generation_timeout: Duration,
    pub bundle_workers: usize,
    pub engine: EngineConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: None,
            state_dir: default_state_dir(),
            database_url: None,
            sqlite_path: None,
            generation_timeout: Duration::from_secs(DEFAULT_GENERATION_TIMEOUT_SECS),
            bundle_workers: DEFAULT_BUNDLE_WORKERS,
            engine: EngineConfig::default(),
        }
    }
}

impl Config {
    /// Loads `.env` when present, then reads the environment.
    pub fn load() -> Self {
        if let Err(err) = dotenvy::dotenv() {
            if !err.not_found() {
                eprintln!("failed to read .env: {err}");
            }
        }
        Self::from_env()
    }

    pub fn from_env() -> Self {
        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let state_dir = env_string("STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(default_state_dir);

        let generation_timeout = Duration::from_secs(
            env_parse::<u64>("GENERATION_TIMEOUT_SECS")
                .filter(|v| *v > 0)
                .unwrap_or(DEFAULT_GENERATION_TIMEOUT_SECS),
        );

        let bundle_workers = env_parse::<usize>("BUNDLE_WORKERS")
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_BUNDLE_WORKERS);

        let log_dir = file_log_dir(
            std::env::var("ENABLE_FILE_LOGS").ok().as_deref(),
            std::env::var("LOG_DIR").ok().as_deref(),
        );

        Self {
            log_level,
            log_dir,
            state_dir,
            database_url: env_string("DATABASE_URL"),
            sqlite_path: env_string("SQLITE_PATH").map(PathBuf::from),
            generation_timeout,
            bundle_workers,
            engine: EngineConfig::from_env(),
        }
    }
}

pub fn default_state_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("adaptive-tutor")
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string(key)?.trim().parse().ok()
}
