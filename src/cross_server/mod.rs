//! Cross-server presence for fleet-core.
//!
//! Instances cannot address each other directly; every exchange goes through
//! a fan-out transport and is correlated by job id. A pong is a broadcast
//! carrying its target, and every other instance discards it.

mod bus;
mod listener;
pub mod protocol;
mod transport;

pub use bus::{BusError, CrossServerBus, Discovery, PeerAck, PeerSnapshot, PeerState};
pub use listener::spawn_listener;
pub use protocol::{CrossServerMessage, JobId, Payload, ProtocolError};
pub use transport::{FanoutTransport, HubSubscription, Inbound, LocalHub, TransportError};
