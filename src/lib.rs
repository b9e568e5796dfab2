//! Fleet coordination core.
//!
//! Building blocks for one game-server instance that runs inside a fleet of
//! peers it cannot address directly.
//!
//! # Components
//!
//! - **memory**: time-bounded key/value cache with sliding or fixed expiry
//! - **cross_server**: presence discovery over a fan-out transport (ping/pong)
//! - **remote**: per-client command channel gated by a key handshake
//!
//! # Security Boundaries
//!
//! - Clients are untrusted. Only `get_keys` and `verify_remote` run before a
//!   client is verified; everything else is refused without side effects.
//! - Peers are semi-trusted. Their payloads are stored opaquely and never
//!   interpreted.
//! - Every wire message is size-checked before it is parsed.

pub mod cli;
pub mod config;
pub mod cross_server;
pub mod memory;
pub mod remote;
pub mod telemetry;

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use config::EnvConfig;
use cross_server::protocol::DEFAULT_MAX_MESSAGE_SIZE;
use cross_server::{spawn_listener, CrossServerBus, FanoutTransport, Inbound, JobId, Payload};
use memory::MemoryCache;
use remote::{RemoteChannel, RemoteChannelConfig, SessionRouter, SettingsProvider};

/// Instance configuration.
#[derive(Debug, Clone)]
pub struct InstanceConfig {
    pub job_id: JobId,
    pub max_message_size: usize,
    pub remote: RemoteChannelConfig,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            job_id: JobId::generate(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            remote: RemoteChannelConfig::default(),
        }
    }
}

impl From<&EnvConfig> for InstanceConfig {
    fn from(env: &EnvConfig) -> Self {
        Self {
            job_id: env.job_id.clone(),
            max_message_size: env.max_message_size,
            remote: env.remote_channel(),
        }
    }
}

/// One fleet member: a shared cache, a cross-server bus and a remote channel.
pub struct Instance {
    pub cache: Arc<MemoryCache<String, Payload>>,
    pub bus: Arc<CrossServerBus>,
    pub remote: Arc<RemoteChannel>,
    shutdown: CancellationToken,
    listeners: Mutex<Vec<JoinHandle<()>>>,
}

impl Instance {
    /// Create a new instance with the given configuration and host collaborators.
    pub fn new(
        config: InstanceConfig,
        transport: Arc<dyn FanoutTransport>,
        settings: Arc<dyn SettingsProvider>,
        sessions: Arc<dyn SessionRouter>,
    ) -> Self {
        let bus = Arc::new(CrossServerBus::with_max_message_size(
            config.job_id,
            transport,
            config.max_message_size,
        ));
        let remote = Arc::new(RemoteChannel::new(settings, sessions, config.remote));

        Self {
            cache: Arc::new(MemoryCache::new()),
            bus,
            remote,
            shutdown: CancellationToken::new(),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn job_id(&self) -> &JobId {
        self.bus.job_id()
    }

    /// Feed an inbound subscription into the bus until [`Instance::shutdown`].
    pub fn start_listener<I>(&self, inbound: I)
    where
        I: Inbound + 'static,
    {
        let handle = spawn_listener(self.bus.clone(), inbound, self.shutdown.child_token());
        self.listeners.lock().push(handle);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stop all listeners and wait for them to exit.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handles: Vec<_> = std::mem::take(&mut *self.listeners.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(job_id = %self.job_id(), error = %e, "listener task failed");
            }
        }
    }
}
