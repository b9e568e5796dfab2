//! Two instances on one hub, each serving a client over raw wire bytes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use fleet_core::cross_server::{JobId, LocalHub, TransportError};
use fleet_core::remote::{
    ClientId, ClientState, ClientTransport, ErrorKind, InMemorySessions, InMemorySettings,
    RemoteEndpoint, RemoteResponse,
};
use fleet_core::{Instance, InstanceConfig};

/// Replies the instance sent to its clients. Clones share one log.
#[derive(Clone, Default)]
struct Wire {
    outbound: Arc<Mutex<Vec<(ClientId, Vec<u8>)>>>,
}

impl Wire {
    fn last_for(&self, client: &ClientId) -> RemoteResponse {
        let outbound = self.outbound.lock();
        let (_, bytes) = outbound
            .iter()
            .rev()
            .find(|(to, _)| to == client)
            .expect("no reply for client");
        serde_json::from_slice(bytes).unwrap()
    }
}

#[async_trait]
impl ClientTransport for Wire {
    async fn send(&self, client: &ClientId, bytes: Vec<u8>) -> Result<(), TransportError> {
        self.outbound.lock().push((client.clone(), bytes));
        Ok(())
    }
}

struct Fixture {
    instance: Instance,
    endpoint: RemoteEndpoint<Wire>,
    wire: Wire,
    sessions: Arc<InMemorySessions>,
}

fn fixture(hub: &LocalHub, job_id: &str) -> Fixture {
    let settings = Arc::new(InMemorySettings::new());
    settings.declare("MaxSpeed", json!(32), true);
    settings.declare("RconPassword", json!("secret"), false);
    let sessions = Arc::new(InMemorySessions::new());

    let instance = Instance::new(
        InstanceConfig {
            job_id: job_id.into(),
            ..Default::default()
        },
        Arc::new(hub.clone()),
        settings,
        sessions.clone(),
    );
    instance.start_listener(hub.subscribe());

    let wire = Wire::default();
    let endpoint = RemoteEndpoint::new(instance.remote.clone(), wire.clone());
    Fixture {
        instance,
        endpoint,
        wire,
        sessions,
    }
}

async fn send(fx: &Fixture, client: &ClientId, command: Value) -> RemoteResponse {
    let bytes = serde_json::to_vec(&command).unwrap();
    fx.endpoint.receive(client, &bytes).await.unwrap();
    fx.wire.last_for(client)
}

async fn handshake(fx: &Fixture, client: &ClientId) {
    let keys = match send(fx, client, json!({"type": "get_keys"})).await {
        RemoteResponse::Keys(keys) => keys,
        other => panic!("expected keys, got {:?}", other),
    };
    let verified = send(
        fx,
        client,
        json!({"type": "verify_remote", "test_value": keys.verification_value()}),
    )
    .await;
    assert_eq!(verified, RemoteResponse::Verified);
}

#[tokio::test]
async fn verified_client_reads_allowed_setting() {
    let hub = LocalHub::new(64);
    let fx = fixture(&hub, "game-1");
    let client = ClientId::from(100u64);

    handshake(&fx, &client).await;

    let response = send(&fx, &client, json!({"type": "setting", "setting": "MaxSpeed"})).await;
    assert_eq!(
        response,
        RemoteResponse::Setting {
            setting: "MaxSpeed".into(),
            value: json!(32),
        }
    );

    let hidden = send(&fx, &client, json!({"type": "setting", "setting": "RconPassword"})).await;
    assert!(matches!(
        hidden,
        RemoteResponse::Error {
            kind: ErrorKind::AccessDenied,
            ..
        }
    ));

    fx.instance.shutdown().await;
}

#[tokio::test]
async fn wrong_test_value_keeps_client_locked_out() {
    let hub = LocalHub::new(64);
    let fx = fixture(&hub, "game-1");
    let client = ClientId::from(101u64);

    assert!(matches!(
        send(&fx, &client, json!({"type": "get_keys"})).await,
        RemoteResponse::Keys(_)
    ));
    assert_eq!(
        send(&fx, &client, json!({"type": "get_keys"})).await,
        RemoteResponse::KeysAlreadyIssued
    );

    let failed = send(&fx, &client, json!({"type": "verify_remote", "test_value": "guess"})).await;
    assert!(matches!(
        failed,
        RemoteResponse::Error {
            kind: ErrorKind::VerificationFailed,
            ..
        }
    ));
    assert_eq!(fx.instance.remote.state(&client), ClientState::Keyed);

    let refused = send(&fx, &client, json!({"type": "setting", "setting": "MaxSpeed"})).await;
    assert!(matches!(
        refused,
        RemoteResponse::Error {
            kind: ErrorKind::Unauthenticated,
            ..
        }
    ));

    fx.instance.shutdown().await;
}

#[tokio::test]
async fn session_traffic_after_ready() {
    let hub = LocalHub::new(64);
    let fx = fixture(&hub, "game-1");
    let client = ClientId::from(102u64);
    fx.sessions.create_session("party-7", [client.clone()]);

    handshake(&fx, &client).await;
    assert_eq!(send(&fx, &client, json!({"type": "client_ready"})).await, RemoteResponse::Ack);
    assert!(fx.sessions.is_ready(&client));

    let ack = send(
        &fx,
        &client,
        json!({"type": "session_data", "session_key": "party-7", "data": ["move", 3]}),
    )
    .await;
    assert_eq!(ack, RemoteResponse::Ack);
    assert_eq!(fx.sessions.drain("party-7")[0].data, vec![json!("move"), json!(3)]);

    let report = send(
        &fx,
        &client,
        json!({"type": "set_user_settings", "settings": {"MaxSpeed": 40, "Ghost": 1}}),
    )
    .await;
    match report {
        RemoteResponse::SettingsReport(report) => {
            assert_eq!(report.applied, vec!["MaxSpeed".to_string()]);
            assert_eq!(report.failed.len(), 1);
        }
        other => panic!("expected settings report, got {:?}", other),
    }

    fx.instance.shutdown().await;
}

#[tokio::test]
async fn malformed_bytes_get_bad_request() {
    let hub = LocalHub::new(64);
    let fx = fixture(&hub, "game-1");
    let client = ClientId::from(103u64);

    fx.endpoint.receive(&client, b"\xff\xfe").await.unwrap();
    assert!(matches!(
        fx.wire.last_for(&client),
        RemoteResponse::Error {
            kind: ErrorKind::BadRequest,
            ..
        }
    ));

    let unknown = send(&fx, &client, json!({"type": "launch_missiles"})).await;
    assert!(matches!(
        unknown,
        RemoteResponse::Error {
            kind: ErrorKind::BadRequest,
            ..
        }
    ));

    fx.instance.shutdown().await;
}

#[tokio::test]
async fn instances_see_each_other_and_keep_clients_apart() {
    let hub = LocalHub::new(64);
    let east = fixture(&hub, "east");
    let west = fixture(&hub, "west");
    west.instance.bus.set_presence(json!({"players": 12}));

    let acks = east
        .instance
        .bus
        .announce(json!({"players": 4}))
        .await
        .unwrap()
        .collect_for(Duration::from_millis(200))
        .await;
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0].job_id, JobId::from("west"));
    assert_eq!(acks[0].data, json!({"players": 12}));

    // A client verified on east is a stranger to west.
    let client = ClientId::from(7u64);
    handshake(&east, &client).await;
    let on_west = send(&west, &client, json!({"type": "setting", "setting": "MaxSpeed"})).await;
    assert!(matches!(
        on_west,
        RemoteResponse::Error {
            kind: ErrorKind::Unauthenticated,
            ..
        }
    ));

    east.instance.shutdown().await;
    west.instance.shutdown().await;
}
