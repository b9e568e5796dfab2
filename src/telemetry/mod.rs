//! Telemetry module for fleet-core.
//!
//! Structured logging, security audit events, command spans and counters.

mod logging;
mod metrics;
pub mod security_log;
mod spans;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use metrics::{
    record_cache_evictions, record_ping_received, record_pong_accepted, record_pong_dropped,
    record_remote_command,
};
pub use security_log::{log_security_event, SecurityEvent, SecuritySeverity};
pub use spans::{CommandSpan, SpanExt};
