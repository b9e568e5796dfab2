//! Config CLI subcommands: show, defaults, validate.
//!
//! These commands read configuration directly from environment variables.

use tracing_subscriber::EnvFilter;

use crate::config::{self, EffectiveConfig, DEFAULT_HUB_CAPACITY, DEFAULT_KEY_TIMEOUT_SECS};
use crate::cross_server::protocol::DEFAULT_MAX_MESSAGE_SIZE;
use crate::telemetry::LogFormat;

/// Print effective config as key-value pairs to stdout.
pub fn run_show() {
    let cfg = config::load().effective_config();
    for line in config_lines(&cfg) {
        println!("{}", line);
    }
}

/// Print default config values (no env overrides) to stdout.
pub fn run_defaults() {
    println!("FLEET_CORE_JOB_ID=<random uuid>");
    println!("FLEET_CORE_KEY_TIMEOUT={}", DEFAULT_KEY_TIMEOUT_SECS);
    println!("FLEET_CORE_MAX_MESSAGE_SIZE={}", DEFAULT_MAX_MESSAGE_SIZE);
    println!("FLEET_CORE_HUB_CAPACITY={}", DEFAULT_HUB_CAPACITY);
    println!("FLEET_CORE_LOG_FORMAT=json");
    println!("FLEET_CORE_LOG_LEVEL=info");
    println!("FLEET_CORE_LOG_FILE=<stderr>");
}

/// Validate configuration for obvious misconfigurations.
///
/// Returns 0 if valid, 1 if any warnings are found.
pub fn run_validate() -> i32 {
    let warnings = validation_warnings();
    for warning in &warnings {
        eprintln!("WARNING: {}", warning);
    }
    if warnings.is_empty() {
        println!("Configuration is valid.");
        0
    } else {
        1
    }
}

/// Problems `load()` would silently paper over with a default or floor.
fn validation_warnings() -> Vec<String> {
    let mut warnings = Vec::new();

    if let Ok(raw) = std::env::var("FLEET_CORE_LOG_FORMAT") {
        if raw.parse::<LogFormat>().is_err() {
            warnings.push(format!("FLEET_CORE_LOG_FORMAT={} is not json or pretty", raw));
        }
    }

    if let Ok(raw) = std::env::var("FLEET_CORE_LOG_LEVEL") {
        if let Err(e) = EnvFilter::try_new(&raw) {
            warnings.push(format!("FLEET_CORE_LOG_LEVEL={} is not a valid filter: {}", raw, e));
        }
    }

    let numeric = [
        ("FLEET_CORE_KEY_TIMEOUT", 1u64),
        ("FLEET_CORE_MAX_MESSAGE_SIZE", 1024),
        ("FLEET_CORE_HUB_CAPACITY", 16),
    ];
    for (key, floor) in numeric {
        let Ok(raw) = std::env::var(key) else {
            continue;
        };
        match raw.parse::<u64>() {
            Ok(value) if value < floor => {
                warnings.push(format!("{}={} is below the floor of {}", key, value, floor));
            }
            Ok(_) => {}
            Err(_) => warnings.push(format!("{}={} is not a number; default used", key, raw)),
        }
    }

    if let Ok(raw) = std::env::var("FLEET_CORE_LOG_FILE") {
        let parent = std::path::Path::new(raw.trim()).parent();
        if parent.is_some_and(|dir| !dir.as_os_str().is_empty() && !dir.is_dir()) {
            warnings.push(format!("FLEET_CORE_LOG_FILE={} is in a missing directory", raw));
        }
    }

    if std::env::var("FLEET_CORE_JOB_ID").is_ok_and(|raw| raw.trim().is_empty()) {
        warnings.push("FLEET_CORE_JOB_ID is set but empty; a random id will be used".to_string());
    }

    warnings
}

fn config_lines(cfg: &EffectiveConfig) -> Vec<String> {
    let job_id_note = if cfg.job_id_configured { "" } else { " (generated)" };
    let log_format = match cfg.log_format {
        LogFormat::Json => "json",
        LogFormat::Pretty => "pretty",
    };
    vec![
        format!("FLEET_CORE_JOB_ID={}{}", cfg.job_id, job_id_note),
        format!("FLEET_CORE_KEY_TIMEOUT={}", cfg.key_timeout_secs),
        format!("FLEET_CORE_MAX_MESSAGE_SIZE={}", cfg.max_message_size),
        format!("FLEET_CORE_HUB_CAPACITY={}", cfg.hub_capacity),
        format!("FLEET_CORE_LOG_FORMAT={}", log_format),
        format!("FLEET_CORE_LOG_LEVEL={}", cfg.log_level),
        format!(
            "FLEET_CORE_LOG_FILE={}",
            cfg.log_file.as_deref().unwrap_or("<stderr>")
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_env::{clear_env_vars, ENV_LOCK};

    #[test]
    fn test_validate_passes_with_defaults() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        assert_eq!(run_validate(), 0, "default config should pass validation");
    }

    #[test]
    fn test_validate_flags_values_below_floor() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("FLEET_CORE_KEY_TIMEOUT", "0");
        std::env::set_var("FLEET_CORE_HUB_CAPACITY", "4");
        let warnings = validation_warnings();
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("FLEET_CORE_KEY_TIMEOUT"));
        assert_eq!(run_validate(), 1);
        clear_env_vars();
    }

    #[test]
    fn test_validate_flags_bad_log_settings() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("FLEET_CORE_LOG_FORMAT", "xml");
        std::env::set_var("FLEET_CORE_LOG_LEVEL", "fleet_core=loud");
        let warnings = validation_warnings();
        assert_eq!(warnings.len(), 2);
        clear_env_vars();
    }

    #[test]
    fn test_validate_flags_non_numeric() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("FLEET_CORE_MAX_MESSAGE_SIZE", "big");
        let warnings = validation_warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("not a number"));
        clear_env_vars();
    }

    #[test]
    fn test_validate_flags_log_file_in_missing_directory() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        let dir = tempfile::tempdir().unwrap();

        let ok = dir.path().join("fleet.log");
        std::env::set_var("FLEET_CORE_LOG_FILE", &ok);
        assert!(validation_warnings().is_empty());

        let missing = dir.path().join("nope").join("fleet.log");
        std::env::set_var("FLEET_CORE_LOG_FILE", &missing);
        let warnings = validation_warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("missing directory"));
        clear_env_vars();
    }

    #[test]
    fn test_config_lines_cover_every_variable() {
        let cfg = EffectiveConfig {
            job_id: "job-1".to_string(),
            job_id_configured: false,
            key_timeout_secs: 600,
            max_message_size: 65536,
            hub_capacity: 1024,
            log_format: LogFormat::Pretty,
            log_level: "info".to_string(),
            log_file: None,
        };
        let lines = config_lines(&cfg);
        assert_eq!(lines.len(), 7);
        assert_eq!(lines[6], "FLEET_CORE_LOG_FILE=<stderr>");
        assert_eq!(lines[0], "FLEET_CORE_JOB_ID=job-1 (generated)");
        assert_eq!(lines[4], "FLEET_CORE_LOG_FORMAT=pretty");
    }
}
