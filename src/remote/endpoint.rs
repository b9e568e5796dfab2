//! Point-to-point delivery of responses back to a client.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use super::channel::RemoteChannel;
use super::protocol::ClientId;
use crate::cross_server::{ProtocolError, TransportError};

#[derive(Error, Debug)]
pub enum EndpointError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Sends encoded bytes to exactly one client.
#[async_trait]
pub trait ClientTransport: Send + Sync {
    async fn send(&self, client: &ClientId, bytes: Vec<u8>) -> Result<(), TransportError>;
}

/// Glue between the host's client transport and a [`RemoteChannel`].
pub struct RemoteEndpoint<T> {
    channel: Arc<RemoteChannel>,
    transport: T,
}

impl<T: ClientTransport> RemoteEndpoint<T> {
    pub fn new(channel: Arc<RemoteChannel>, transport: T) -> Self {
        Self { channel, transport }
    }

    pub fn channel(&self) -> &Arc<RemoteChannel> {
        &self.channel
    }

    /// Handle one raw message from `client` and reply on the same channel.
    pub async fn receive(&self, client: &ClientId, bytes: &[u8]) -> Result<(), EndpointError> {
        let response = self.channel.process(client, bytes)?;
        self.transport.send(client, response).await?;
        Ok(())
    }

    /// Connection closed by the host.
    pub fn disconnect(&self, client: &ClientId) {
        self.channel.disconnect(client);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::host::{InMemorySessions, InMemorySettings};
    use crate::remote::{RemoteChannelConfig, RemoteResponse};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Outbox {
        sent: Mutex<Vec<(ClientId, Vec<u8>)>>,
    }

    #[async_trait]
    impl ClientTransport for Arc<Outbox> {
        async fn send(&self, client: &ClientId, bytes: Vec<u8>) -> Result<(), TransportError> {
            self.sent.lock().push((client.clone(), bytes));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_response_goes_back_to_sender() {
        let channel = Arc::new(RemoteChannel::new(
            Arc::new(InMemorySettings::new()),
            Arc::new(InMemorySessions::new()),
            RemoteChannelConfig::default(),
        ));
        let outbox = Arc::new(Outbox::default());
        let endpoint = RemoteEndpoint::new(channel, outbox.clone());

        let client = ClientId::from("7");
        endpoint
            .receive(&client, br#"{"type":"get_keys"}"#)
            .await
            .unwrap();

        let sent = outbox.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, client);
        let response: RemoteResponse = serde_json::from_slice(&sent[0].1).unwrap();
        assert!(matches!(response, RemoteResponse::Keys(_)));
    }
}
