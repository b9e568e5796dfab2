//! Inbound loop: feed transport messages into the bus until shutdown.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::bus::CrossServerBus;
use super::transport::Inbound;

/// Spawn the inbound loop. Returns a handle for shutdown.
pub fn spawn_listener<I>(
    bus: Arc<CrossServerBus>,
    inbound: I,
    shutdown: CancellationToken,
) -> JoinHandle<()>
where
    I: Inbound + 'static,
{
    tokio::spawn(async move {
        listener_loop(&bus, inbound, shutdown).await;
    })
}

async fn listener_loop<I: Inbound>(
    bus: &CrossServerBus,
    mut inbound: I,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                tracing::info!(
                    job_id = %bus.job_id(),
                    "cross-server listener: shutdown signal received"
                );
                break;
            }
            message = inbound.recv() => {
                let Some(bytes) = message else {
                    tracing::info!(
                        job_id = %bus.job_id(),
                        "cross-server listener: transport closed"
                    );
                    break;
                };
                // A bad message from one peer must not stop the loop.
                if let Err(e) = bus.process(&bytes).await {
                    tracing::warn!(
                        job_id = %bus.job_id(),
                        error = %e,
                        "dropping cross-server message"
                    );
                }
            }
        }
    }
}
