//! Security audit logging for the remote command channel.
//!
//! SECURITY: every key issuance, verification attempt and rejected command
//! is logged here so spoofing or replay attempts can be traced per client.

use std::time::{SystemTime, UNIX_EPOCH};

/// Security event types for audit logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityEvent {
    /// Channel keys issued to a client.
    KeysIssued,
    /// Issued keys timed out before use or after idling.
    KeysExpired,
    /// Client passed the verification challenge.
    VerificationSuccess,
    /// Client failed the verification challenge.
    VerificationFailure,
    /// Command arrived from a client that is not verified.
    UnauthenticatedCommand,
    /// Client asked for a setting it may not read.
    AccessDenied,
    /// Command arrived in the wrong handshake state.
    InvalidState,
    /// Malformed or oversized message from a client.
    MalformedMessage,
    /// Client record destroyed.
    ClientDisconnected,
}

impl SecurityEvent {
    pub fn severity(&self) -> SecuritySeverity {
        match self {
            Self::KeysIssued => SecuritySeverity::Info,
            Self::KeysExpired => SecuritySeverity::Info,
            Self::VerificationSuccess => SecuritySeverity::Info,
            Self::VerificationFailure => SecuritySeverity::Warning,
            Self::UnauthenticatedCommand => SecuritySeverity::Warning,
            Self::AccessDenied => SecuritySeverity::Warning,
            Self::InvalidState => SecuritySeverity::Debug,
            Self::MalformedMessage => SecuritySeverity::Error,
            Self::ClientDisconnected => SecuritySeverity::Debug,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KeysIssued => "keys_issued",
            Self::KeysExpired => "keys_expired",
            Self::VerificationSuccess => "verification_success",
            Self::VerificationFailure => "verification_failure",
            Self::UnauthenticatedCommand => "unauthenticated_command",
            Self::AccessDenied => "access_denied",
            Self::InvalidState => "invalid_state",
            Self::MalformedMessage => "malformed_message",
            Self::ClientDisconnected => "client_disconnected",
        }
    }
}

/// Severity levels for security events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SecuritySeverity {
    Debug,
    Info,
    Warning,
    Error,
}

impl SecuritySeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        }
    }
}

/// Log a security event with structured details.
///
/// # Example
/// ```
/// use fleet_core::telemetry::{log_security_event, SecurityEvent};
///
/// log_security_event(
///     SecurityEvent::VerificationFailure,
///     "Challenge mismatch",
///     &[("client_id", "1042")]
/// );
/// ```
pub fn log_security_event(event: SecurityEvent, message: &str, details: &[(&str, &str)]) {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let details_str = details
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(" ");

    let event_type = event.as_str();
    let severity = event.severity().as_str();

    match event.severity() {
        SecuritySeverity::Debug => {
            tracing::debug!(
                target: "security",
                timestamp,
                severity,
                event_type,
                details = %details_str,
                "{}",
                message
            )
        }
        SecuritySeverity::Info => {
            tracing::info!(
                target: "security",
                timestamp,
                severity,
                event_type,
                details = %details_str,
                "{}",
                message
            )
        }
        SecuritySeverity::Warning => {
            tracing::warn!(
                target: "security",
                timestamp,
                severity,
                event_type,
                details = %details_str,
                "{}",
                message
            )
        }
        SecuritySeverity::Error => {
            tracing::error!(
                target: "security",
                timestamp,
                severity,
                event_type,
                details = %details_str,
                "{}",
                message
            )
        }
    }
}

/// Convenience macro for logging security events.
#[macro_export]
macro_rules! security_log {
    ($event:expr, $message:expr) => {
        $crate::telemetry::security_log::log_security_event($event, $message, &[])
    };
    ($event:expr, $message:expr, $($key:expr => $value:expr),+) => {
        $crate::telemetry::security_log::log_security_event(
            $event,
            $message,
            &[$(($key, $value)),+]
        )
    };
}
