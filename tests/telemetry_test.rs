//! Telemetry tests: subscriber setup and security audit output.

use std::sync::Arc;

use serde_json::json;

use fleet_core::remote::{ClientId, InMemorySessions, InMemorySettings, RemoteChannel};
use fleet_core::telemetry::{
    init_logging, LogConfig, LogError, LogFormat, SecurityEvent, SecuritySeverity,
};

// =============================================================================
// LogConfig Tests
// =============================================================================

#[test]
fn log_config_default_is_json_info() {
    let config = LogConfig::default();
    assert_eq!(config.format, LogFormat::Json);
    assert_eq!(config.level, "info");
    assert!(config.output_path.is_none());
}

#[test]
fn log_format_accepts_text_alias() {
    assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
    assert!(matches!("yaml".parse::<LogFormat>(), Err(LogError::UnknownFormat(_))));
}

// =============================================================================
// Security Event Tests
// =============================================================================

#[test]
fn rejections_are_louder_than_bookkeeping() {
    assert!(SecurityEvent::VerificationFailure.severity() > SecurityEvent::KeysIssued.severity());
    assert!(SecurityEvent::UnauthenticatedCommand.severity() >= SecuritySeverity::Warning);
    assert_eq!(SecurityEvent::MalformedMessage.severity(), SecuritySeverity::Error);
    assert_eq!(SecurityEvent::ClientDisconnected.as_str(), "client_disconnected");
}

// =============================================================================
// Subscriber Output Tests
// =============================================================================

// The only test in this binary that installs the global subscriber.
#[test]
fn json_log_file_records_security_events() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fleet.log");
    let config = LogConfig {
        format: LogFormat::Json,
        level: "info".to_string(),
        output_path: Some(path.clone()),
    };
    init_logging(&config).unwrap();
    assert!(matches!(init_logging(&config), Err(LogError::AlreadyInitialized)));

    let settings = Arc::new(InMemorySettings::new());
    settings.declare("MaxSpeed", json!(32), true);
    let channel = RemoteChannel::new(
        settings,
        Arc::new(InMemorySessions::new()),
        Default::default(),
    );
    let client = ClientId::from("audit-me");
    let keys = channel.get_keys(&client).unwrap().unwrap();
    let _ = channel.verify_remote(&client, "wrong");
    channel.verify_remote(&client, &keys.verification_value()).unwrap();

    let contents = std::fs::read_to_string(&path).unwrap();
    let events: Vec<serde_json::Value> = contents
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .filter(|line: &serde_json::Value| line["target"] == "security")
        .collect();

    let types: Vec<_> = events
        .iter()
        .filter_map(|event| event["fields"]["event_type"].as_str())
        .collect();
    assert!(types.contains(&"keys_issued"), "got {:?}", types);
    assert!(types.contains(&"verification_success"), "got {:?}", types);
    assert!(contents.contains("audit-me"));
    assert!(!contents.contains(&keys.key), "key material must never be logged");
}
