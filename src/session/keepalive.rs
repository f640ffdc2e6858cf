//! Liveness probing and peer monitoring.
//!
//! The probe never touches the connection itself: it queues a probe for the
//! dispatcher and waits for the peer monitor to report the acknowledgment.

use super::shutdown::Shutdown;
use super::state::EndReason;
use crate::Error;
use axum::extract::ws::Message;
use futures::{Stream, StreamExt};
use std::fmt::Display;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace};

/// Queues a probe every `period` and requires an acknowledgment within
/// `ack_timeout` of queueing it.
pub(crate) async fn probe(
    probes: mpsc::Sender<()>,
    mut acks: mpsc::Receiver<()>,
    period: Duration,
    ack_timeout: Duration,
    shutdown: Shutdown,
) {
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        // Acknowledgments for earlier probes or unsolicited pongs.
        while acks.try_recv().is_ok() {}

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            sent = probes.send(()) => {
                if sent.is_err() {
                    break;
                }
            }
        }
        trace!("Probe queued");

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            ack = time::timeout(ack_timeout, acks.recv()) => match ack {
                Ok(Some(())) => trace!("Probe acknowledged"),
                Ok(None) => break,
                Err(_) => {
                    error!(waited = ?ack_timeout, "Probe not acknowledged");
                    shutdown.trigger(EndReason::Failed(Error::ProbeTimeout {
                        waited: ack_timeout,
                    }));
                    break;
                }
            },
        }
    }
    debug!("Probe stopped");
}

/// Watches the inbound half for acknowledgments, a peer close or a protocol
/// error. Data frames from the peer are ignored.
pub(crate) async fn monitor<R, E>(mut stream: R, acks: mpsc::Sender<()>, shutdown: Shutdown)
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = stream.next() => next,
        };

        match next {
            Some(Ok(Message::Pong(_))) => {
                // A full channel already holds an unconsumed acknowledgment.
                let _ = acks.try_send(());
                trace!("Pong received");
            }
            Some(Ok(Message::Ping(_))) => trace!("Ping received"),
            Some(Ok(Message::Close(frame))) => {
                info!(code = ?frame.as_ref().map(|f| f.code), "Peer closed the connection");
                shutdown.trigger(EndReason::PeerClosed);
                break;
            }
            Some(Ok(_)) => trace!("Ignoring data frame from peer"),
            Some(Err(e)) => {
                error!(error = %e, "Peer connection error");
                shutdown.trigger(EndReason::Failed(Error::PeerError {
                    message: e.to_string(),
                }));
                break;
            }
            None => {
                info!("Peer stream ended");
                shutdown.trigger(EndReason::PeerClosed);
                break;
            }
        }
    }
    debug!("Peer monitor stopped");
}
