//! Fan-out transport seam.
//!
//! The physical pub/sub system lives outside this crate. It only has to
//! deliver every published message to every subscribed instance, including
//! the publisher; ordering and exactly-once delivery are not assumed.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Transport closed")]
    Closed,

    #[error("Publish failed: {0}")]
    Publish(String),
}

/// Publishes encoded messages to every live instance.
#[async_trait]
pub trait FanoutTransport: Send + Sync {
    async fn publish(&self, bytes: Vec<u8>) -> Result<(), TransportError>;
}

/// Source of encoded messages arriving at this instance.
#[async_trait]
pub trait Inbound: Send {
    /// Next message, or `None` once the transport is closed.
    async fn recv(&mut self) -> Option<Vec<u8>>;
}

/// In-process fan-out hub on a tokio broadcast channel.
///
/// Stands in for the real pub/sub service when several instances share one
/// process (tests, `simulate`).
#[derive(Clone)]
pub struct LocalHub {
    sender: broadcast::Sender<Vec<u8>>,
}

impl LocalHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> HubSubscription {
        HubSubscription {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[async_trait]
impl FanoutTransport for LocalHub {
    async fn publish(&self, bytes: Vec<u8>) -> Result<(), TransportError> {
        // Zero subscribers is not an error for fan-out: nobody is alive to hear it.
        if self.sender.send(bytes).is_err() {
            tracing::debug!("local hub publish with no subscribers");
        }
        Ok(())
    }
}

/// One instance's subscription to a [`LocalHub`].
pub struct HubSubscription {
    receiver: broadcast::Receiver<Vec<u8>>,
}

#[async_trait]
impl Inbound for HubSubscription {
    async fn recv(&mut self) -> Option<Vec<u8>> {
        loop {
            match self.receiver.recv().await {
                Ok(bytes) => return Some(bytes),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "local hub subscriber lagged, messages dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
