//! Configuration types.
//!
//! Service settings come from the environment via `from_env`; the
//! worker directory comes from a YAML file read once
//! at startup and handed to the registry and dispatcher as explicit
//! values — no ambient lookup after boot.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::registry::WorkerDescriptor;

/// Dispatcher tuning.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Maximum worker endpoints tried per dispatch call.
    pub max_attempts: u32,
    /// Timeout for one dispatch request to a worker.
    pub request_timeout: Duration,
    /// Base backoff between attempts within one dispatch call
    /// (jittered).
    pub retry_backoff: Duration,
    /// How often the queue sweeper re-attempts dispatch for jobs still
    /// queued.
    pub sweep_interval: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            request_timeout: Duration::from_secs(10),
            retry_backoff: Duration::from_millis(250),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address the HTTP server binds to.
    pub bind_addr: String,
    /// Port the HTTP server binds to.
    pub port: u16,
    /// Path to the worker directory YAML file, if any.
    pub worker_directory: Option<PathBuf>,
    /// Data directory for the disk artifact store. Unset means the
    /// in-memory store.
    pub data_dir: Option<PathBuf>,
    /// Maximum accepted upload size in bytes.
    pub max_upload_bytes: usize,
    /// Dispatcher tuning.
    pub dispatch: DispatchConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: 8000,
            worker_directory: None,
            data_dir: None,
            max_upload_bytes: 64 * 1024 * 1024, // 64 MiB
            dispatch: DispatchConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Build configuration from `STEM_SPLIT_*` environment variables,
    /// falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let port = env_parse("STEM_SPLIT_PORT", defaults.port)?;
        let max_upload_bytes =
            env_parse("STEM_SPLIT_MAX_UPLOAD_BYTES", defaults.max_upload_bytes)?;

        let dispatch = DispatchConfig {
            max_attempts: env_parse(
                "STEM_SPLIT_DISPATCH_ATTEMPTS",
                defaults.dispatch.max_attempts,
            )?,
            request_timeout: env_secs(
                "STEM_SPLIT_DISPATCH_TIMEOUT_SECS",
                defaults.dispatch.request_timeout,
            )?,
            retry_backoff: defaults.dispatch.retry_backoff,
            sweep_interval: env_secs(
                "STEM_SPLIT_SWEEP_INTERVAL_SECS",
                defaults.dispatch.sweep_interval,
            )?,
        };

        Ok(Self {
            bind_addr: std::env::var("STEM_SPLIT_BIND_ADDR")
                .unwrap_or_else(|_| defaults.bind_addr),
            port,
            worker_directory: std::env::var("STEM_SPLIT_WORKER_DIRECTORY")
                .ok()
                .map(PathBuf::from),
            data_dir: std::env::var("STEM_SPLIT_DATA_DIR").ok().map(PathBuf::from),
            max_upload_bytes,
            dispatch,
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("cannot parse {raw:?}"),
        }),
        Err(_) => Ok(default),
    }
}

fn env_secs(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    Ok(Duration::from_secs(env_parse(
        key,
        default.as_secs(),
    )?))
}

/// On-disk worker directory document.
#[derive(Debug, Deserialize)]
struct WorkerDirectoryFile {
    workers: Vec<WorkerDescriptor>,
}

/// Load the static worker directory from a YAML file.
pub fn load_worker_directory(path: &Path) -> Result<Vec<WorkerDescriptor>, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::WorkerDirectoryMissing(
            path.display().to_string(),
        ));
    }
    let raw = std::fs::read_to_string(path)?;
    parse_worker_directory(&raw)
}

fn parse_worker_directory(raw: &str) -> Result<Vec<WorkerDescriptor>, ConfigError> {
    let file: WorkerDirectoryFile =
        serde_yaml::from_str(raw).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    Ok(file.workers)
}
