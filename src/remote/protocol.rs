//! Wire format for client commands and their responses.
//!
//! # Security
//! - Size limit checked before parsing untrusted client bytes
//! - Oversized responses are replaced by an error response, never truncated

use std::fmt;

use serde::{Deserialize, Serialize};

use super::channel::SettingsReport;
use super::keys::ChannelKeys;
use crate::cross_server::protocol::{Payload, ProtocolError};

/// Host-assigned identifier of one connected client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<u64> for ClientId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

/// Commands a client may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RemoteCommand {
    GetKeys,
    VerifyRemote {
        test_value: String,
    },
    ClientReady,
    SessionData {
        session_key: String,
        #[serde(default)]
        data: Vec<Payload>,
    },
    Setting {
        setting: String,
    },
    SetUserSettings {
        settings: serde_json::Map<String, Payload>,
    },
}

impl RemoteCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::GetKeys => "get_keys",
            Self::VerifyRemote { .. } => "verify_remote",
            Self::ClientReady => "client_ready",
            Self::SessionData { .. } => "session_data",
            Self::Setting { .. } => "setting",
            Self::SetUserSettings { .. } => "set_user_settings",
        }
    }
}

/// Caller-visible error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Unauthenticated,
    AccessDenied,
    VerificationFailed,
    InvalidState,
    /// The message itself could not be decoded.
    BadRequest,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Unauthenticated => "unauthenticated",
            Self::AccessDenied => "access_denied",
            Self::VerificationFailed => "verification_failed",
            Self::InvalidState => "invalid_state",
            Self::BadRequest => "bad_request",
        }
    }
}

/// Responses sent back to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RemoteResponse {
    Keys(ChannelKeys),
    KeysAlreadyIssued,
    Verified,
    Ack,
    Setting { setting: String, value: Payload },
    SettingsReport(SettingsReport),
    Error { kind: ErrorKind, message: String },
}

impl RemoteResponse {
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Error {
            kind,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

pub fn decode_command(bytes: &[u8], max_size: usize) -> Result<RemoteCommand, ProtocolError> {
    // SECURITY: Check size BEFORE parsing
    if bytes.len() > max_size {
        return Err(ProtocolError::MessageTooLarge {
            size: bytes.len(),
            max: max_size,
        });
    }
    Ok(serde_json::from_slice(bytes)?)
}

/// Encode a response, substituting an error response if it is too large.
pub fn encode_response(
    response: &RemoteResponse,
    max_size: usize,
) -> Result<Vec<u8>, ProtocolError> {
    let bytes = serde_json::to_vec(response)?;
    if bytes.len() <= max_size {
        return Ok(bytes);
    }
    let fallback = RemoteResponse::error(
        ErrorKind::BadRequest,
        format!("Response too large: {} bytes (max {})", bytes.len(), max_size),
    );
    Ok(serde_json::to_vec(&fallback)?)
}
