//! `simulate`: run a small fleet inside one process.
//!
//! Starts N instances on a shared [`LocalHub`], has the first one announce
//! itself and collect pongs, then walks one client through the remote
//! handshake on that instance.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::EnvConfig;
use crate::cross_server::{BusError, JobId, LocalHub, Payload, ProtocolError, TransportError};
use crate::memory::CacheEntryOptions;
use crate::remote::{
    ClientId, ClientState, ClientTransport, EndpointError, ErrorKind, InMemorySessions,
    InMemorySettings, RemoteCommand, RemoteEndpoint, RemoteResponse,
};
use crate::{Instance, InstanceConfig};

const DISCOVERY_WINDOW: Duration = Duration::from_millis(250);
const PEER_CACHE_TTL: Duration = Duration::from_secs(60);

#[derive(Error, Debug)]
pub enum SimulateError {
    #[error("At least one instance is required")]
    NoInstances,

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Endpoint error: {0}")]
    Endpoint(#[from] EndpointError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Handshake failed: {0}")]
    Handshake(String),
}

impl From<serde_json::Error> for SimulateError {
    fn from(e: serde_json::Error) -> Self {
        Self::Protocol(ProtocolError::Serialization(e))
    }
}

/// What the simulation observed.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub announcer: JobId,
    pub discovered: Vec<JobId>,
    /// Peer presence data as cached by the announcer.
    pub cached_presence: Vec<Payload>,
    pub client_state: ClientState,
    pub max_speed: Option<Payload>,
    pub hidden_setting_refused: bool,
}

/// Delivers channel replies into a queue the simulated client reads.
struct ReplyQueue(mpsc::UnboundedSender<Vec<u8>>);

#[async_trait]
impl ClientTransport for ReplyQueue {
    async fn send(&self, _client: &ClientId, bytes: Vec<u8>) -> Result<(), TransportError> {
        self.0.send(bytes).map_err(|_| TransportError::Closed)
    }
}

struct SimulatedClient {
    id: ClientId,
    endpoint: RemoteEndpoint<ReplyQueue>,
    replies: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl SimulatedClient {
    async fn send(&mut self, command: &RemoteCommand) -> Result<RemoteResponse, SimulateError> {
        let bytes = serde_json::to_vec(command)?;
        self.endpoint.receive(&self.id, &bytes).await?;
        let reply = self
            .replies
            .recv()
            .await
            .ok_or_else(|| SimulateError::Handshake("reply queue closed".to_string()))?;
        Ok(serde_json::from_slice(&reply)?)
    }
}

fn build_instance(hub: &LocalHub, env: &EnvConfig, index: usize) -> Instance {
    let mut config = InstanceConfig::from(env);
    if index > 0 {
        config.job_id = JobId::generate();
    }

    let settings = Arc::new(InMemorySettings::new());
    settings.declare("MaxSpeed", json!(32), true);
    settings.declare("AdminKey", json!("not-for-clients"), false);

    let instance = Instance::new(
        config,
        Arc::new(hub.clone()),
        settings,
        Arc::new(InMemorySessions::new()),
    );
    instance.bus.set_presence(json!({ "index": index }));
    instance.start_listener(hub.subscribe());
    instance
}

/// Run the simulation with `instances` fleet members.
pub async fn run_simulate(
    instances: usize,
    env: &EnvConfig,
) -> Result<SimulationReport, SimulateError> {
    if instances == 0 {
        return Err(SimulateError::NoInstances);
    }

    let hub = LocalHub::new(env.hub_capacity);
    let fleet: Vec<Instance> = (0..instances)
        .map(|index| build_instance(&hub, env, index))
        .collect();
    let announcer = &fleet[0];
    tracing::info!(instances, job_id = %announcer.job_id(), "simulated fleet started");

    let result = simulate_on(announcer).await;

    futures::future::join_all(fleet.iter().map(|instance| instance.shutdown())).await;
    tracing::info!("simulated fleet stopped");
    result
}

async fn simulate_on(announcer: &Instance) -> Result<SimulationReport, SimulateError> {
    let discovery = announcer.bus.announce(json!({ "hello": true })).await?;
    let acks = discovery.collect_for(DISCOVERY_WINDOW).await;

    for ack in &acks {
        announcer.cache.set_data(
            format!("peer:{}", ack.job_id),
            ack.data.clone(),
            CacheEntryOptions::expiring(PEER_CACHE_TTL),
        );
    }
    let cached_presence = acks
        .iter()
        .filter_map(|ack| announcer.cache.get_data(&format!("peer:{}", ack.job_id)).ok())
        .collect();

    let (tx, replies) = mpsc::unbounded_channel();
    let mut client = SimulatedClient {
        id: ClientId::from(1u64),
        endpoint: RemoteEndpoint::new(announcer.remote.clone(), ReplyQueue(tx)),
        replies,
    };

    let keys = match client.send(&RemoteCommand::GetKeys).await? {
        RemoteResponse::Keys(keys) => keys,
        other => return Err(SimulateError::Handshake(format!("expected keys, got {:?}", other))),
    };
    let verify = RemoteCommand::VerifyRemote {
        test_value: keys.verification_value(),
    };
    if let RemoteResponse::Error { message, .. } = client.send(&verify).await? {
        return Err(SimulateError::Handshake(message));
    }

    let max_speed = match client
        .send(&RemoteCommand::Setting {
            setting: "MaxSpeed".to_string(),
        })
        .await?
    {
        RemoteResponse::Setting { value, .. } => Some(value),
        _ => None,
    };
    let hidden = client
        .send(&RemoteCommand::Setting {
            setting: "AdminKey".to_string(),
        })
        .await?;
    let hidden_setting_refused = matches!(
        hidden,
        RemoteResponse::Error {
            kind: ErrorKind::AccessDenied,
            ..
        }
    );

    let client_state = announcer.remote.state(&client.id);
    client.endpoint.disconnect(&client.id);

    Ok(SimulationReport {
        announcer: announcer.job_id().clone(),
        discovered: acks.into_iter().map(|ack| ack.job_id).collect(),
        cached_presence,
        client_state,
        max_speed,
        hidden_setting_refused,
    })
}
