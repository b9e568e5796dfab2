//! Runtime configuration loading from environment variables.
//!
//! All configuration values are loaded from `FLEET_CORE_*` environment
//! variables with sensible defaults. Invalid values fall back to defaults
//! without crashing.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `FLEET_CORE_JOB_ID` | random uuid | This instance's job id |
//! | `FLEET_CORE_KEY_TIMEOUT` | 600 | Channel key idle timeout (secs) |
//! | `FLEET_CORE_MAX_MESSAGE_SIZE` | 65536 | Max wire message size (bytes) |
//! | `FLEET_CORE_HUB_CAPACITY` | 1024 | In-process hub buffer (messages) |
//! | `FLEET_CORE_LOG_FORMAT` | json | `json` or `pretty` |
//! | `FLEET_CORE_LOG_LEVEL` | info | `EnvFilter` directive |
//! | `FLEET_CORE_LOG_FILE` | unset (stderr) | Write logs to this file instead |

use std::path::PathBuf;
use std::time::Duration;

use crate::cross_server::protocol::DEFAULT_MAX_MESSAGE_SIZE;
use crate::cross_server::JobId;
use crate::remote::RemoteChannelConfig;
use crate::telemetry::{LogConfig, LogFormat};

pub const DEFAULT_KEY_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_HUB_CAPACITY: usize = 1024;

const MIN_MESSAGE_SIZE: usize = 1024;
const MIN_HUB_CAPACITY: usize = 16;

/// Effective runtime configuration summary.
#[derive(Debug, Clone)]
pub struct EffectiveConfig {
    pub job_id: String,
    /// False when the job id was generated for this process.
    pub job_id_configured: bool,
    pub key_timeout_secs: u64,
    pub max_message_size: usize,
    pub hub_capacity: usize,
    pub log_format: LogFormat,
    pub log_level: String,
    pub log_file: Option<String>,
}

/// All runtime configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub job_id: JobId,
    pub job_id_configured: bool,
    pub key_timeout: Duration,
    pub max_message_size: usize,
    pub hub_capacity: usize,
    pub log: LogConfig,
}

/// Parse a `usize` env var, returning `default` on missing or invalid.
fn parse_usize(key: &str, default: usize) -> usize {
    match std::env::var(key) {
        Ok(val) => val.parse::<usize>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a `u64` env var, returning `default` on missing or invalid.
fn parse_u64(key: &str, default: u64) -> u64 {
    match std::env::var(key) {
        Ok(val) => val.parse::<u64>().unwrap_or(default),
        Err(_) => default,
    }
}

fn load_job_id() -> (JobId, bool) {
    match std::env::var("FLEET_CORE_JOB_ID") {
        Ok(val) if !val.trim().is_empty() => (JobId::new(val.trim()), true),
        _ => (JobId::generate(), false),
    }
}

fn load_log_config() -> LogConfig {
    let format = std::env::var("FLEET_CORE_LOG_FORMAT")
        .ok()
        .and_then(|val| val.parse::<LogFormat>().ok())
        .unwrap_or_default();
    let level = std::env::var("FLEET_CORE_LOG_LEVEL")
        .ok()
        .filter(|val| !val.trim().is_empty())
        .unwrap_or_else(|| "info".to_string());
    let output_path = std::env::var("FLEET_CORE_LOG_FILE")
        .ok()
        .filter(|val| !val.trim().is_empty())
        .map(PathBuf::from);
    LogConfig {
        format,
        level,
        output_path,
    }
}

/// Load all configuration from environment variables.
///
/// Missing or invalid values fall back to safe defaults without panicking.
pub fn load() -> EnvConfig {
    let (job_id, job_id_configured) = load_job_id();
    let key_timeout_secs = parse_u64("FLEET_CORE_KEY_TIMEOUT", DEFAULT_KEY_TIMEOUT_SECS).max(1);
    let max_message_size =
        parse_usize("FLEET_CORE_MAX_MESSAGE_SIZE", DEFAULT_MAX_MESSAGE_SIZE).max(MIN_MESSAGE_SIZE);
    let hub_capacity =
        parse_usize("FLEET_CORE_HUB_CAPACITY", DEFAULT_HUB_CAPACITY).max(MIN_HUB_CAPACITY);

    EnvConfig {
        job_id,
        job_id_configured,
        key_timeout: Duration::from_secs(key_timeout_secs),
        max_message_size,
        hub_capacity,
        log: load_log_config(),
    }
}

impl EnvConfig {
    /// Settings for this process's remote channel.
    pub fn remote_channel(&self) -> RemoteChannelConfig {
        RemoteChannelConfig {
            key_timeout: self.key_timeout,
            max_message_size: self.max_message_size,
        }
    }

    /// Return a summary of all effective values.
    pub fn effective_config(&self) -> EffectiveConfig {
        EffectiveConfig {
            job_id: self.job_id.to_string(),
            job_id_configured: self.job_id_configured,
            key_timeout_secs: self.key_timeout.as_secs(),
            max_message_size: self.max_message_size,
            hub_capacity: self.hub_capacity,
            log_format: self.log.format,
            log_level: self.log.level.clone(),
            log_file: self
                .log
                .output_path
                .as_ref()
                .map(|path| path.display().to_string()),
        }
    }
}
