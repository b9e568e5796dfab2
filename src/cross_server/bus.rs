//! Presence protocol between instances.
//!
//! Each instance broadcasts pings and answers other instances' pings with a
//! pong addressed back to the origin. Delivery is fire-and-forget: a peer
//! that never answers simply never becomes `Acknowledged`, and timeouts are
//! the caller's business.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use super::protocol::{
    decode_message, encode_message, CrossServerMessage, JobId, Payload, ProtocolError,
    DEFAULT_MAX_MESSAGE_SIZE,
};
use super::transport::{FanoutTransport, TransportError};
use crate::telemetry;

#[derive(Error, Debug)]
pub enum BusError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Cannot ping own job id {0}")]
    SelfAddressed(JobId),
}

/// Exchange state with one peer, from this instance's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PeerState {
    /// Seen only through its own pings; never pinged by us.
    Unknown,
    /// Pinged by us, no pong yet.
    Pinged,
    /// Answered at least one of our pings.
    Acknowledged,
}

struct PeerRecord {
    state: PeerState,
    last_data: Payload,
    last_seen: DateTime<Utc>,
}

/// Read-only view of one peer.
#[derive(Debug, Clone, Serialize)]
pub struct PeerSnapshot {
    pub job_id: JobId,
    pub state: PeerState,
    pub last_data: Payload,
    pub last_seen: DateTime<Utc>,
}

/// One accepted pong.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerAck {
    pub job_id: JobId,
    pub data: Payload,
}

type RoundTable = Arc<Mutex<HashMap<u64, mpsc::UnboundedSender<PeerAck>>>>;

/// Outstanding direct pings per peer, tagged so one caller can withdraw its own.
type WaiterTable = Mutex<HashMap<JobId, Vec<(u64, oneshot::Sender<PeerAck>)>>>;

/// Cross-server presence bus for one instance.
pub struct CrossServerBus {
    job_id: JobId,
    transport: Arc<dyn FanoutTransport>,
    max_message_size: usize,
    /// Data returned in our pongs.
    presence: RwLock<Payload>,
    peers: DashMap<JobId, PeerRecord>,
    rounds: RoundTable,
    next_round: AtomicU64,
    direct: WaiterTable,
    next_waiter: AtomicU64,
}

impl CrossServerBus {
    pub fn new(job_id: JobId, transport: Arc<dyn FanoutTransport>) -> Self {
        Self::with_max_message_size(job_id, transport, DEFAULT_MAX_MESSAGE_SIZE)
    }

    pub fn with_max_message_size(
        job_id: JobId,
        transport: Arc<dyn FanoutTransport>,
        max_message_size: usize,
    ) -> Self {
        Self {
            job_id,
            transport,
            max_message_size,
            presence: RwLock::new(Payload::Null),
            peers: DashMap::new(),
            rounds: Arc::new(Mutex::new(HashMap::new())),
            next_round: AtomicU64::new(1),
            direct: Mutex::new(HashMap::new()),
            next_waiter: AtomicU64::new(1),
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Set the data this instance sends back in every pong.
    pub fn set_presence(&self, data: Payload) {
        *self.presence.write() = data;
    }

    /// Broadcast a ping to the whole fleet.
    ///
    /// Pongs are accepted from any instance while the returned handle is
    /// alive; dropping it closes the round.
    pub async fn announce(&self, data: Payload) -> Result<Discovery, BusError> {
        let discovery = self.open_round();

        for mut peer in self.peers.iter_mut() {
            if peer.state == PeerState::Unknown {
                peer.state = PeerState::Pinged;
            }
        }

        let message = CrossServerMessage::Ping {
            origin: self.job_id.clone(),
            target: None,
            data,
        };
        self.publish(&message).await?;
        tracing::debug!(job_id = %self.job_id, "presence announced");
        Ok(discovery)
    }

    /// Ping one known peer directly. The receiver completes on its pong and
    /// is never completed if the peer is dead.
    ///
    /// Dropping the receiver withdraws the wait; abandoned waiters are pruned
    /// on the next ping to the same peer. If the publish fails, the peer's
    /// state and other callers' waiters are left as they were.
    pub async fn ping_peer(
        &self,
        target: &JobId,
        data: Payload,
    ) -> Result<oneshot::Receiver<PeerAck>, BusError> {
        if *target == self.job_id {
            return Err(BusError::SelfAddressed(target.clone()));
        }

        // Registered before publishing so a fast pong cannot beat it.
        let (tx, rx) = oneshot::channel();
        let waiter_id = self.next_waiter.fetch_add(1, Ordering::Relaxed);
        {
            let mut direct = self.direct.lock();
            let waiters = direct.entry(target.clone()).or_default();
            waiters.retain(|(_, waiter)| !waiter.is_closed());
            waiters.push((waiter_id, tx));
        }

        let message = CrossServerMessage::Ping {
            origin: self.job_id.clone(),
            target: Some(target.clone()),
            data,
        };
        if let Err(e) = self.publish(&message).await {
            self.withdraw_waiter(target, waiter_id);
            return Err(e);
        }

        self.peers
            .entry(target.clone())
            .and_modify(|peer| {
                if peer.state == PeerState::Unknown {
                    peer.state = PeerState::Pinged;
                }
            })
            .or_insert_with(|| PeerRecord {
                state: PeerState::Pinged,
                last_data: Payload::Null,
                last_seen: Utc::now(),
            });
        Ok(rx)
    }

    /// Handle a ping from `origin`. Returns `true` if a pong was sent.
    pub async fn on_ping(&self, origin: JobId, data: Payload) -> Result<bool, BusError> {
        if origin == self.job_id {
            return Ok(false);
        }
        telemetry::record_ping_received();

        let now = Utc::now();
        self.peers
            .entry(origin.clone())
            .and_modify(|peer| {
                peer.last_data = data.clone();
                peer.last_seen = now;
            })
            .or_insert_with(|| PeerRecord {
                state: PeerState::Unknown,
                last_data: data,
                last_seen: now,
            });

        let reply = CrossServerMessage::Pong {
            origin: self.job_id.clone(),
            target: origin,
            data: self.presence.read().clone(),
        };
        self.publish(&reply).await?;
        Ok(true)
    }

    /// Handle a pong. Returns `true` if it was accepted.
    ///
    /// Pongs addressed elsewhere, or from a peer nothing is waiting on, are
    /// dropped without touching state.
    pub fn on_pong(&self, origin: JobId, target: &JobId, data: Payload) -> bool {
        if *target != self.job_id {
            telemetry::record_pong_dropped("misaddressed");
            return false;
        }
        if origin == self.job_id {
            telemetry::record_pong_dropped("self");
            return false;
        }

        let waiters: Vec<_> = self
            .direct
            .lock()
            .remove(&origin)
            .unwrap_or_default()
            .into_iter()
            .filter(|(_, waiter)| !waiter.is_closed())
            .collect();
        let rounds: Vec<_> = self.rounds.lock().values().cloned().collect();
        if waiters.is_empty() && rounds.is_empty() {
            tracing::debug!(origin = %origin, "dropping unsolicited pong");
            telemetry::record_pong_dropped("unsolicited");
            return false;
        }

        let now = Utc::now();
        self.peers
            .entry(origin.clone())
            .and_modify(|peer| {
                peer.state = PeerState::Acknowledged;
                peer.last_data = data.clone();
                peer.last_seen = now;
            })
            .or_insert_with(|| PeerRecord {
                state: PeerState::Acknowledged,
                last_data: data.clone(),
                last_seen: now,
            });
        telemetry::record_pong_accepted();

        let ack = PeerAck { job_id: origin, data };
        for (_, waiter) in waiters {
            let _ = waiter.send(ack.clone());
        }
        for round in rounds {
            let _ = round.send(ack.clone());
        }
        true
    }

    /// Decode and dispatch one inbound message.
    pub async fn process(&self, bytes: &[u8]) -> Result<(), BusError> {
        match decode_message(bytes, self.max_message_size)? {
            CrossServerMessage::Ping { origin, target, data } => {
                if target.as_ref().map_or(true, |t| *t == self.job_id) {
                    self.on_ping(origin, data).await?;
                }
            }
            CrossServerMessage::Pong { origin, target, data } => {
                self.on_pong(origin, &target, data);
            }
        }
        Ok(())
    }

    pub fn peer(&self, job_id: &JobId) -> Option<PeerSnapshot> {
        self.peers.get(job_id).map(|peer| PeerSnapshot {
            job_id: job_id.clone(),
            state: peer.state,
            last_data: peer.last_data.clone(),
            last_seen: peer.last_seen,
        })
    }

    /// Snapshot of every known peer, sorted by job id.
    pub fn peers(&self) -> Vec<PeerSnapshot> {
        let mut snapshots: Vec<_> = self
            .peers
            .iter()
            .map(|peer| PeerSnapshot {
                job_id: peer.key().clone(),
                state: peer.state,
                last_data: peer.last_data.clone(),
                last_seen: peer.last_seen,
            })
            .collect();
        snapshots.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        snapshots
    }

    pub fn acknowledged_peers(&self) -> Vec<JobId> {
        self.peers()
            .into_iter()
            .filter(|peer| peer.state == PeerState::Acknowledged)
            .map(|peer| peer.job_id)
            .collect()
    }

    /// Drop everything known about a peer the caller considers dead.
    pub fn forget_peer(&self, job_id: &JobId) -> bool {
        self.direct.lock().remove(job_id);
        self.peers.remove(job_id).is_some()
    }

    fn withdraw_waiter(&self, target: &JobId, waiter_id: u64) {
        let mut direct = self.direct.lock();
        if let Some(waiters) = direct.get_mut(target) {
            waiters.retain(|(id, _)| *id != waiter_id);
            if waiters.is_empty() {
                direct.remove(target);
            }
        }
    }

    fn open_round(&self) -> Discovery {
        let id = self.next_round.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.rounds.lock().insert(id, tx);
        Discovery {
            id,
            acks: rx,
            rounds: Arc::clone(&self.rounds),
        }
    }

    async fn publish(&self, message: &CrossServerMessage) -> Result<(), BusError> {
        let bytes = encode_message(message, self.max_message_size)?;
        self.transport.publish(bytes).await?;
        Ok(())
    }
}

/// An open discovery round started by [`CrossServerBus::announce`].
///
/// Closes the round when dropped.
pub struct Discovery {
    id: u64,
    acks: mpsc::UnboundedReceiver<PeerAck>,
    rounds: RoundTable,
}

impl Discovery {
    /// Next pong accepted during this round.
    pub async fn next(&mut self) -> Option<PeerAck> {
        self.acks.recv().await
    }

    /// Collect distinct peers that answer within `window`, then close the round.
    pub async fn collect_for(mut self, window: Duration) -> Vec<PeerAck> {
        let deadline = tokio::time::Instant::now() + window;
        let mut seen: HashMap<JobId, PeerAck> = HashMap::new();

        while let Ok(Some(ack)) = tokio::time::timeout_at(deadline, self.acks.recv()).await {
            seen.insert(ack.job_id.clone(), ack);
        }

        let mut acks: Vec<_> = seen.into_values().collect();
        acks.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        acks
    }
}

impl Drop for Discovery {
    fn drop(&mut self) {
        self.rounds.lock().remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    /// Records published messages instead of sending them.
    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<CrossServerMessage>>,
    }

    #[async_trait]
    impl FanoutTransport for RecordingTransport {
        async fn publish(&self, bytes: Vec<u8>) -> Result<(), TransportError> {
            let message = decode_message(&bytes, DEFAULT_MAX_MESSAGE_SIZE)
                .map_err(|e| TransportError::Publish(e.to_string()))?;
            self.sent.lock().push(message);
            Ok(())
        }
    }

    /// Fails exactly the publish with the given 1-based index.
    struct FlakyTransport {
        fail_on: usize,
        published: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl FanoutTransport for FlakyTransport {
        async fn publish(&self, _bytes: Vec<u8>) -> Result<(), TransportError> {
            let n = self.published.fetch_add(1, Ordering::SeqCst) + 1;
            if n == self.fail_on {
                return Err(TransportError::Publish("link down".into()));
            }
            Ok(())
        }
    }

    fn flaky_bus(id: &str, fail_on: usize) -> CrossServerBus {
        let transport = Arc::new(FlakyTransport {
            fail_on,
            published: std::sync::atomic::AtomicUsize::new(0),
        });
        CrossServerBus::new(JobId::from(id), transport)
    }

    fn bus(id: &str) -> (CrossServerBus, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport::default());
        (CrossServerBus::new(JobId::from(id), transport.clone()), transport)
    }

    #[tokio::test]
    async fn test_ping_from_self_is_ignored() {
        let (bus, transport) = bus("self");
        let replied = bus.on_ping(JobId::from("self"), json!(1)).await.unwrap();
        assert!(!replied);
        assert!(transport.sent.lock().is_empty());
        assert!(bus.peers().is_empty());
    }

    #[tokio::test]
    async fn test_ping_replies_with_addressed_pong() {
        let (bus, transport) = bus("a");
        bus.set_presence(json!({"region": "eu"}));

        assert!(bus.on_ping(JobId::from("b"), json!("hi")).await.unwrap());

        let sent = transport.sent.lock();
        assert_eq!(
            sent.as_slice(),
            &[CrossServerMessage::Pong {
                origin: JobId::from("a"),
                target: JobId::from("b"),
                data: json!({"region": "eu"}),
            }]
        );
        let peer = bus.peer(&JobId::from("b")).unwrap();
        assert_eq!(peer.state, PeerState::Unknown);
        assert_eq!(peer.last_data, json!("hi"));
    }

    #[tokio::test]
    async fn test_unsolicited_pong_dropped() {
        let (bus, _) = bus("a");
        assert!(!bus.on_pong(JobId::from("b"), &JobId::from("a"), json!(null)));
        assert!(bus.peer(&JobId::from("b")).is_none());
    }

    #[tokio::test]
    async fn test_misaddressed_pong_dropped_even_during_round() {
        let (bus, _) = bus("a");
        let _round = bus.announce(json!(null)).await.unwrap();
        assert!(!bus.on_pong(JobId::from("b"), &JobId::from("c"), json!(null)));
        assert!(bus.peers().is_empty());
    }

    #[tokio::test]
    async fn test_round_accepts_pongs_until_dropped() {
        let (bus, _) = bus("a");
        let mut round = bus.announce(json!(null)).await.unwrap();

        assert!(bus.on_pong(JobId::from("b"), &JobId::from("a"), json!(2)));
        assert_eq!(
            round.next().await,
            Some(PeerAck { job_id: JobId::from("b"), data: json!(2) })
        );
        assert_eq!(bus.acknowledged_peers(), vec![JobId::from("b")]);

        drop(round);
        assert!(!bus.on_pong(JobId::from("c"), &JobId::from("a"), json!(3)));
    }

    #[tokio::test]
    async fn test_announce_moves_unknown_peers_to_pinged() {
        let (bus, _) = bus("a");
        bus.on_ping(JobId::from("b"), json!(null)).await.unwrap();
        let _round = bus.announce(json!(null)).await.unwrap();
        assert_eq!(bus.peer(&JobId::from("b")).unwrap().state, PeerState::Pinged);
    }

    #[tokio::test]
    async fn test_direct_ping_completes_on_pong() {
        let (bus, transport) = bus("a");
        let rx = bus.ping_peer(&JobId::from("b"), json!("ping")).await.unwrap();
        assert_eq!(bus.peer(&JobId::from("b")).unwrap().state, PeerState::Pinged);
        assert!(matches!(
            &transport.sent.lock()[0],
            CrossServerMessage::Ping { target: Some(t), .. } if t.as_str() == "b"
        ));

        assert!(bus.on_pong(JobId::from("b"), &JobId::from("a"), json!("pong")));
        let ack = rx.await.unwrap();
        assert_eq!(ack.data, json!("pong"));

        // The outstanding ping was consumed.
        assert!(!bus.on_pong(JobId::from("b"), &JobId::from("a"), json!("again")));
    }

    #[tokio::test]
    async fn test_abandoned_direct_pings_do_not_accumulate() {
        let (bus, _) = bus("a");
        let dead = JobId::from("dead");

        for _ in 0..1000 {
            let rx = bus.ping_peer(&dead, json!(null)).await.unwrap();
            drop(rx);
        }
        assert_eq!(bus.direct.lock()[&dead].len(), 1);

        // Nobody is listening any more, so a pong is unsolicited.
        assert!(!bus.on_pong(dead.clone(), &JobId::from("a"), json!(null)));
        assert!(bus.direct.lock().get(&dead).is_none());
    }

    #[tokio::test]
    async fn test_failed_ping_keeps_earlier_waiters() {
        let bus = flaky_bus("a", 2);
        let b = JobId::from("b");

        let first = bus.ping_peer(&b, json!(1)).await.unwrap();
        assert!(matches!(
            bus.ping_peer(&b, json!(2)).await,
            Err(BusError::Transport(_))
        ));
        assert_eq!(bus.direct.lock()[&b].len(), 1);

        assert!(bus.on_pong(b.clone(), &JobId::from("a"), json!("pong")));
        assert_eq!(first.await.unwrap().data, json!("pong"));
    }

    #[tokio::test]
    async fn test_failed_ping_leaves_peer_state_alone() {
        let bus = flaky_bus("a", 1);
        let b = JobId::from("b");

        assert!(bus.ping_peer(&b, json!(null)).await.is_err());
        assert!(bus.peer(&b).is_none());
        assert!(bus.direct.lock().is_empty());

        bus.on_ping(b.clone(), json!(null)).await.unwrap();
        assert_eq!(bus.peer(&b).unwrap().state, PeerState::Unknown);
    }

    #[tokio::test]
    async fn test_ping_peer_rejects_self() {
        let (bus, _) = bus("a");
        assert!(matches!(
            bus.ping_peer(&JobId::from("a"), json!(null)).await,
            Err(BusError::SelfAddressed(_))
        ));
    }

    #[tokio::test]
    async fn test_acknowledged_never_regresses() {
        let (bus, _) = bus("a");
        let _round = bus.announce(json!(null)).await.unwrap();
        bus.on_pong(JobId::from("b"), &JobId::from("a"), json!(null));
        bus.on_ping(JobId::from("b"), json!("later")).await.unwrap();
        let _again = bus.announce(json!(null)).await.unwrap();

        let peer = bus.peer(&JobId::from("b")).unwrap();
        assert_eq!(peer.state, PeerState::Acknowledged);
        assert_eq!(peer.last_data, json!("later"));
    }

    #[tokio::test]
    async fn test_direct_ping_for_other_instance_ignored() {
        let (bus, transport) = bus("a");
        let raw = br#"{"type":"ping","origin":"b","target":"c","data":null}"#;
        bus.process(raw).await.unwrap();
        assert!(transport.sent.lock().is_empty());
        assert!(bus.peers().is_empty());
    }
}
