//! Per-client authenticated command channel.
//!
//! SECURITY: a client moves `Unkeyed -> Keyed -> Verified` and nothing but
//! `get_keys`/`verify_remote` reaches a host collaborator before `Verified`.
//! Each client's state lives behind its own map entry, so concurrent
//! commands from one client cannot both win a transition.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::host::{SessionError, SessionRouter, SettingsProvider};
use super::keys::ChannelKeys;
use super::protocol::{
    decode_command, encode_response, ClientId, ErrorKind, RemoteCommand, RemoteResponse,
};
use crate::cross_server::protocol::{Payload, ProtocolError, DEFAULT_MAX_MESSAGE_SIZE};
use crate::memory::{CacheEntryOptions, MemoryCache};
use crate::telemetry::{self, CommandSpan, SecurityEvent, SpanExt};

/// Handshake state of one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientState {
    Unkeyed,
    Keyed,
    Verified,
}

impl ClientState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unkeyed => "unkeyed",
            Self::Keyed => "keyed",
            Self::Verified => "verified",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RemoteError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Client is not verified")]
    Unauthenticated,

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Verification failed")]
    VerificationFailed,

    #[error("{command} not valid while {}", .state.as_str())]
    InvalidState {
        state: ClientState,
        command: &'static str,
    },

    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}

impl RemoteError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Unauthenticated => ErrorKind::Unauthenticated,
            Self::AccessDenied(_) => ErrorKind::AccessDenied,
            Self::VerificationFailed => ErrorKind::VerificationFailed,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
            Self::Session(SessionError::UnknownSession(_)) => ErrorKind::NotFound,
            Self::Session(SessionError::NotMember { .. }) => ErrorKind::AccessDenied,
        }
    }
}

/// Outcome of a best-effort `set_user_settings` pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsReport {
    pub applied: Vec<String>,
    pub failed: Vec<SettingFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingFailure {
    pub setting: String,
    pub reason: String,
}

/// Configuration for the remote channel.
#[derive(Debug, Clone)]
pub struct RemoteChannelConfig {
    /// Idle time after which issued keys lapse. Renewed by every command.
    pub key_timeout: Duration,
    pub max_message_size: usize,
}

impl Default for RemoteChannelConfig {
    fn default() -> Self {
        Self {
            key_timeout: Duration::from_secs(600),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

struct ClientRecord {
    state: ClientState,
    /// Last session this client sent data to.
    session_key: Option<String>,
}

impl ClientRecord {
    fn new() -> Self {
        Self {
            state: ClientState::Unkeyed,
            session_key: None,
        }
    }
}

/// Authenticated command channel for every client of one instance.
pub struct RemoteChannel {
    clients: DashMap<ClientId, ClientRecord>,
    keys: MemoryCache<ClientId, ChannelKeys>,
    settings: Arc<dyn SettingsProvider>,
    sessions: Arc<dyn SessionRouter>,
    config: RemoteChannelConfig,
}

impl RemoteChannel {
    pub fn new(
        settings: Arc<dyn SettingsProvider>,
        sessions: Arc<dyn SessionRouter>,
        config: RemoteChannelConfig,
    ) -> Self {
        Self {
            clients: DashMap::new(),
            keys: MemoryCache::new(),
            settings,
            sessions,
            config,
        }
    }

    /// Issue keys on first request. Returns `None` if keys are already out;
    /// re-issuing would break a handshake in progress.
    pub fn get_keys(&self, client: &ClientId) -> Result<Option<ChannelKeys>, RemoteError> {
        let mut record = self
            .clients
            .entry(client.clone())
            .or_insert_with(ClientRecord::new);

        if self.live_keys(client, &mut record).is_some() {
            return Ok(None);
        }

        let keys = ChannelKeys::generate();
        self.keys.set_data(
            client.clone(),
            keys.clone(),
            CacheEntryOptions::sliding(self.config.key_timeout),
        );
        record.state = ClientState::Keyed;

        crate::security_log!(
            SecurityEvent::KeysIssued,
            "Channel keys issued",
            "client_id" => client.as_str()
        );
        Ok(Some(keys))
    }

    /// Check the client's challenge answer against its issued keys.
    pub fn verify_remote(&self, client: &ClientId, test_value: &str) -> Result<(), RemoteError> {
        const COMMAND: &str = "verify_remote";

        let mut record = self.clients.get_mut(client).ok_or(RemoteError::InvalidState {
            state: ClientState::Unkeyed,
            command: COMMAND,
        })?;

        if record.state != ClientState::Keyed {
            return Err(RemoteError::InvalidState {
                state: record.state,
                command: COMMAND,
            });
        }

        let keys = self
            .live_keys(client, &mut record)
            .ok_or(RemoteError::InvalidState {
                state: ClientState::Unkeyed,
                command: COMMAND,
            })?;

        if !keys.verify(test_value) {
            return Err(RemoteError::VerificationFailed);
        }
        record.state = ClientState::Verified;

        crate::security_log!(
            SecurityEvent::VerificationSuccess,
            "Client verified",
            "client_id" => client.as_str()
        );
        Ok(())
    }

    /// Client finished its own setup; tell the host.
    pub fn client_ready(&self, client: &ClientId) -> Result<(), RemoteError> {
        self.require_verified(client)?;
        self.sessions.client_ready(client);
        Ok(())
    }

    /// Forward opaque data to a session the client belongs to.
    pub fn session_data(
        &self,
        client: &ClientId,
        session_key: &str,
        data: Vec<Payload>,
    ) -> Result<(), RemoteError> {
        self.require_verified(client)?;
        self.sessions.session_data(client, session_key, data)?;
        if let Some(mut record) = self.clients.get_mut(client) {
            record.session_key = Some(session_key.to_string());
        }
        Ok(())
    }

    /// Value of a declared setting, if clients may read it.
    pub fn setting(&self, client: &ClientId, name: &str) -> Result<Payload, RemoteError> {
        self.require_verified(client)?;
        let declaration = self
            .settings
            .setting(name)
            .ok_or_else(|| RemoteError::NotFound(name.to_string()))?;
        if !declaration.client_allowed {
            return Err(RemoteError::AccessDenied(name.to_string()));
        }
        Ok(declaration.value)
    }

    /// Apply each pair independently; a failed pair does not undo earlier ones.
    ///
    /// `client_allowed` is not consulted here: it governs reads only, and the
    /// settings provider decides which user settings are writable.
    pub fn set_user_settings<I>(
        &self,
        client: &ClientId,
        settings: I,
    ) -> Result<SettingsReport, RemoteError>
    where
        I: IntoIterator<Item = (String, Payload)>,
    {
        self.require_verified(client)?;

        let mut report = SettingsReport::default();
        for (name, value) in settings {
            match self.settings.set_user_setting(client, &name, value) {
                Ok(()) => report.applied.push(name),
                Err(e) => {
                    tracing::debug!(
                        client_id = %client,
                        setting = %name,
                        error = %e,
                        "user setting rejected"
                    );
                    report.failed.push(SettingFailure {
                        setting: name,
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(report)
    }

    /// Connection ended; drop the client record and its keys.
    pub fn disconnect(&self, client: &ClientId) -> bool {
        self.keys.remove(client);
        let existed = self.clients.remove(client).is_some();
        if existed {
            crate::security_log!(
                SecurityEvent::ClientDisconnected,
                "Client record destroyed",
                "client_id" => client.as_str()
            );
        }
        existed
    }

    /// Current handshake state. Unknown clients are `Unkeyed`.
    pub fn state(&self, client: &ClientId) -> ClientState {
        self.clients
            .get(client)
            .map(|record| record.state)
            .unwrap_or(ClientState::Unkeyed)
    }

    pub fn session_key(&self, client: &ClientId) -> Option<String> {
        self.clients
            .get(client)
            .and_then(|record| record.session_key.clone())
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Run one command and turn the outcome into a response.
    pub fn handle(&self, client: &ClientId, command: RemoteCommand) -> RemoteResponse {
        let name = command.name();
        let span = CommandSpan::new(client.as_str(), name);
        let _enter = span.enter();

        let result = match command {
            RemoteCommand::GetKeys => self.get_keys(client).map(|keys| match keys {
                Some(keys) => RemoteResponse::Keys(keys),
                None => RemoteResponse::KeysAlreadyIssued,
            }),
            RemoteCommand::VerifyRemote { test_value } => self
                .verify_remote(client, &test_value)
                .map(|()| RemoteResponse::Verified),
            RemoteCommand::ClientReady => self.client_ready(client).map(|()| RemoteResponse::Ack),
            RemoteCommand::SessionData { session_key, data } => self
                .session_data(client, &session_key, data)
                .map(|()| RemoteResponse::Ack),
            RemoteCommand::Setting { setting } => self
                .setting(client, &setting)
                .map(|value| RemoteResponse::Setting { setting, value }),
            RemoteCommand::SetUserSettings { settings } => self
                .set_user_settings(client, settings)
                .map(RemoteResponse::SettingsReport),
        };

        span.record_result(&result);
        match result {
            Ok(response) => {
                telemetry::record_remote_command(name, "ok");
                response
            }
            Err(e) => {
                let kind = e.kind();
                telemetry::record_remote_command(name, kind.as_str());
                audit_rejection(client, name, &e);
                RemoteResponse::error(kind, e.to_string())
            }
        }
    }

    /// Decode a raw client message, run it, and encode the response.
    pub fn process(&self, client: &ClientId, bytes: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        let response = match decode_command(bytes, self.config.max_message_size) {
            Ok(command) => self.handle(client, command),
            Err(e) => {
                crate::security_log!(
                    SecurityEvent::MalformedMessage,
                    "Undecodable client message",
                    "client_id" => client.as_str()
                );
                RemoteResponse::error(ErrorKind::BadRequest, e.to_string())
            }
        };
        encode_response(&response, self.config.max_message_size)
    }

    /// Keys for a keyed or verified client, renewing their timer.
    ///
    /// Lapsed keys reset the client to `Unkeyed`.
    fn live_keys(&self, client: &ClientId, record: &mut ClientRecord) -> Option<ChannelKeys> {
        if record.state == ClientState::Unkeyed {
            return None;
        }
        match self.keys.get_data(client) {
            Ok(keys) => Some(keys),
            Err(_) => {
                record.state = ClientState::Unkeyed;
                crate::security_log!(
                    SecurityEvent::KeysExpired,
                    "Channel keys lapsed",
                    "client_id" => client.as_str()
                );
                None
            }
        }
    }

    fn require_verified(&self, client: &ClientId) -> Result<(), RemoteError> {
        let mut record = self
            .clients
            .get_mut(client)
            .ok_or(RemoteError::Unauthenticated)?;
        if record.state != ClientState::Verified {
            return Err(RemoteError::Unauthenticated);
        }
        self.live_keys(client, &mut record)
            .map(|_| ())
            .ok_or(RemoteError::Unauthenticated)
    }
}

fn audit_rejection(client: &ClientId, command: &'static str, error: &RemoteError) {
    let event = match error {
        RemoteError::Unauthenticated => SecurityEvent::UnauthenticatedCommand,
        RemoteError::VerificationFailed => SecurityEvent::VerificationFailure,
        RemoteError::AccessDenied(_) => SecurityEvent::AccessDenied,
        RemoteError::InvalidState { .. } => SecurityEvent::InvalidState,
        RemoteError::NotFound(_) | RemoteError::Session(_) => return,
    };
    telemetry::log_security_event(
        event,
        "Remote command rejected",
        &[("client_id", client.as_str()), ("command", command)],
    );
}
