//! Remote (client-to-instance) command channel.
//!
//! SECURITY: clients are untrusted. Every command other than the key
//! handshake is refused until the client proves it holds the keys issued
//! to it, and refusals are never forwarded to host collaborators.

mod channel;
mod endpoint;
pub mod host;
mod keys;
pub mod protocol;

pub use channel::{
    ClientState, RemoteChannel, RemoteChannelConfig, RemoteError, SettingFailure, SettingsReport,
};
pub use endpoint::{ClientTransport, EndpointError, RemoteEndpoint};
pub use host::{
    InMemorySessions, InMemorySettings, SessionError, SessionRouter, SettingDeclaration,
    SettingsError, SettingsProvider,
};
pub use keys::ChannelKeys;
pub use protocol::{ClientId, ErrorKind, RemoteCommand, RemoteResponse};
