//! Host collaborators the remote channel forwards to.
//!
//! Settings storage and session bookkeeping belong to the embedding
//! application. The in-memory implementations here back tests and the
//! `simulate` command.

use std::collections::{HashMap, HashSet};

use dashmap::{DashMap, DashSet};
use thiserror::Error;

use super::protocol::ClientId;
use crate::cross_server::Payload;

/// A named setting and whether clients may read it.
#[derive(Debug, Clone, PartialEq)]
pub struct SettingDeclaration {
    pub value: Payload,
    pub client_allowed: bool,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SettingsError {
    #[error("Unknown setting: {0}")]
    UnknownSetting(String),

    #[error("Invalid value for {setting}: {reason}")]
    InvalidValue { setting: String, reason: String },

    #[error("Settings store unavailable: {0}")]
    Unavailable(String),
}

/// Read access to declared settings and write access to per-user settings.
pub trait SettingsProvider: Send + Sync {
    fn setting(&self, name: &str) -> Option<SettingDeclaration>;

    fn set_user_setting(
        &self,
        client: &ClientId,
        name: &str,
        value: Payload,
    ) -> Result<(), SettingsError>;
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("Unknown session: {0}")]
    UnknownSession(String),

    #[error("Client {client} is not a member of session {session}")]
    NotMember { client: ClientId, session: String },
}

/// Session bookkeeping owned by the host.
pub trait SessionRouter: Send + Sync {
    /// Client finished its setup handshake.
    fn client_ready(&self, client: &ClientId);

    /// Deliver client data to the session identified by `session_key`.
    fn session_data(
        &self,
        client: &ClientId,
        session_key: &str,
        data: Vec<Payload>,
    ) -> Result<(), SessionError>;
}

/// Settings held in memory.
///
/// User settings may only be written for declared setting names.
#[derive(Default)]
pub struct InMemorySettings {
    declarations: DashMap<String, SettingDeclaration>,
    user_settings: DashMap<ClientId, HashMap<String, Payload>>,
}

impl InMemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&self, name: impl Into<String>, value: Payload, client_allowed: bool) {
        self.declarations.insert(
            name.into(),
            SettingDeclaration {
                value,
                client_allowed,
            },
        );
    }

    pub fn user_setting(&self, client: &ClientId, name: &str) -> Option<Payload> {
        self.user_settings
            .get(client)
            .and_then(|settings| settings.get(name).cloned())
    }
}

impl SettingsProvider for InMemorySettings {
    fn setting(&self, name: &str) -> Option<SettingDeclaration> {
        self.declarations.get(name).map(|decl| decl.clone())
    }

    fn set_user_setting(
        &self,
        client: &ClientId,
        name: &str,
        value: Payload,
    ) -> Result<(), SettingsError> {
        if !self.declarations.contains_key(name) {
            return Err(SettingsError::UnknownSetting(name.to_string()));
        }
        self.user_settings
            .entry(client.clone())
            .or_default()
            .insert(name.to_string(), value);
        Ok(())
    }
}

/// One delivery recorded by [`InMemorySessions`].
#[derive(Debug, Clone, PartialEq)]
pub struct SessionDelivery {
    pub from: ClientId,
    pub data: Vec<Payload>,
}

#[derive(Default)]
struct SessionState {
    members: HashSet<ClientId>,
    inbox: Vec<SessionDelivery>,
}

/// Session table held in memory; deliveries queue up until drained.
#[derive(Default)]
pub struct InMemorySessions {
    sessions: DashMap<String, SessionState>,
    ready: DashSet<ClientId>,
}

impl InMemorySessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_session<I>(&self, session_key: impl Into<String>, members: I)
    where
        I: IntoIterator<Item = ClientId>,
    {
        self.sessions.insert(
            session_key.into(),
            SessionState {
                members: members.into_iter().collect(),
                inbox: Vec::new(),
            },
        );
    }

    pub fn is_ready(&self, client: &ClientId) -> bool {
        self.ready.contains(client)
    }

    /// Remove and return everything delivered to a session so far.
    pub fn drain(&self, session_key: &str) -> Vec<SessionDelivery> {
        self.sessions
            .get_mut(session_key)
            .map(|mut state| std::mem::take(&mut state.inbox))
            .unwrap_or_default()
    }
}

impl SessionRouter for InMemorySessions {
    fn client_ready(&self, client: &ClientId) {
        self.ready.insert(client.clone());
    }

    fn session_data(
        &self,
        client: &ClientId,
        session_key: &str,
        data: Vec<Payload>,
    ) -> Result<(), SessionError> {
        let mut state = self
            .sessions
            .get_mut(session_key)
            .ok_or_else(|| SessionError::UnknownSession(session_key.to_string()))?;
        if !state.members.contains(client) {
            return Err(SessionError::NotMember {
                client: client.clone(),
                session: session_key.to_string(),
            });
        }
        state.inbox.push(SessionDelivery {
            from: client.clone(),
            data,
        });
        Ok(())
    }
}
