//! Wire format for presence messages between instances.
//!
//! # Security
//! - Size is checked before parsing so a peer cannot force large allocations
//! - Payloads are carried as opaque JSON values and never interpreted here

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default maximum encoded message size.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Opaque application data carried by presence and session messages.
pub type Payload = serde_json::Value;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },
}

/// Globally unique identifier of one running instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random id for a process that was not assigned one.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// All messages exchanged over the fan-out transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CrossServerMessage {
    /// Presence announcement. `target` is set for a direct ping to one peer;
    /// every other instance ignores it.
    #[serde(rename = "ping")]
    Ping {
        origin: JobId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<JobId>,
        data: Payload,
    },

    /// Reply to a ping, addressed back to the pinging instance.
    #[serde(rename = "pong")]
    Pong {
        origin: JobId,
        target: JobId,
        data: Payload,
    },
}

impl CrossServerMessage {
    pub fn origin(&self) -> &JobId {
        match self {
            Self::Ping { origin, .. } | Self::Pong { origin, .. } => origin,
        }
    }
}

pub fn encode_message(
    message: &CrossServerMessage,
    max_size: usize,
) -> Result<Vec<u8>, ProtocolError> {
    let bytes = serde_json::to_vec(message)?;
    if bytes.len() > max_size {
        return Err(ProtocolError::MessageTooLarge {
            size: bytes.len(),
            max: max_size,
        });
    }
    Ok(bytes)
}

pub fn decode_message(bytes: &[u8], max_size: usize) -> Result<CrossServerMessage, ProtocolError> {
    // SECURITY: Check size BEFORE parsing
    if bytes.len() > max_size {
        return Err(ProtocolError::MessageTooLarge {
            size: bytes.len(),
            max: max_size,
        });
    }
    Ok(serde_json::from_slice(bytes)?)
}
