use super::shutdown::Shutdown;
use super::state::EndReason;
use crate::record::RecordFormatter;
use crate::Error;
use axum::extract::ws::Message;
use bytes::Bytes;
use futures::{Sink, SinkExt};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tracing::{debug, error, trace, warn};

/// Upper bound on the closing handshake. A peer that stopped reading has
/// already cost one write deadline.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// The only activity that writes to the connection. Data frames from the
/// outbound queue and probe frames from the keepalive are both funnelled
/// through [`Dispatcher::run`], so frames never interleave.
pub(crate) struct Dispatcher<W, P> {
    sink: W,
    formatter: Arc<P>,
    write_timeout: Duration,
}

impl<W, P> Dispatcher<W, P>
where
    W: Sink<Message> + Unpin,
    W::Error: std::error::Error + Send + Sync + 'static,
    P: RecordFormatter,
{
    pub(crate) fn new(sink: W, formatter: Arc<P>, write_timeout: Duration) -> Self {
        Self {
            sink,
            formatter,
            write_timeout,
        }
    }

    pub(crate) async fn run(
        mut self,
        mut outbound: mpsc::Receiver<Bytes>,
        mut probes: mpsc::Receiver<()>,
        shutdown: Shutdown,
    ) {
        loop {
            let message = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(()) = probes.recv() => Message::Ping(Bytes::new()),
                queued = outbound.recv() => match queued {
                    Some(payload) => match self.formatter.format_payload(&payload) {
                        Ok(line) => Message::Text(line.into()),
                        Err(e) => {
                            warn!(error = %e, "Dropping unformattable record");
                            continue;
                        }
                    },
                    None => break,
                },
            };

            let written = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                written = self.write(message) => written,
            };
            if let Err(reason) = written {
                shutdown.trigger(reason);
                break;
            }
        }

        if !outbound.is_empty() {
            debug!(abandoned = outbound.len(), "Abandoning queued records");
        }
        self.close().await;
        debug!("Dispatch stopped");
    }

    async fn write(&mut self, message: Message) -> Result<(), EndReason> {
        let is_probe = matches!(message, Message::Ping(_));
        match tokio::time::timeout(self.write_timeout, self.sink.send(message)).await {
            Ok(Ok(())) => {
                trace!(probe = is_probe, "Frame written");
                Ok(())
            }
            Ok(Err(e)) if is_close_error(&e) => {
                debug!(error = %e, "Peer closed the connection during write");
                Err(EndReason::PeerClosed)
            }
            Ok(Err(e)) => {
                error!(error = %e, "Write failed");
                Err(EndReason::Failed(Error::WriteFailed {
                    message: e.to_string(),
                }))
            }
            Err(_) => {
                error!(timeout = ?self.write_timeout, "Write deadline exceeded");
                Err(EndReason::Failed(Error::WriteFailed {
                    message: format!("write did not complete within {:?}", self.write_timeout),
                }))
            }
        }
    }

    /// Sends the closing handshake and releases the write half. After this
    /// the sink is never written to again.
    async fn close(mut self) {
        let timeout = self.write_timeout.min(CLOSE_TIMEOUT);
        match tokio::time::timeout(timeout, self.sink.close()).await {
            Ok(Ok(())) => debug!("Connection closed"),
            Ok(Err(e)) => debug!(error = %e, "Connection already closed"),
            Err(_) => warn!("Timed out closing connection"),
        }
    }
}

/// Whether a write error means the connection was closed rather than broken.
pub(crate) fn is_close_error(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(ws) = e.downcast_ref::<tungstenite::Error>() {
            if matches!(
                ws,
                tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed
            ) {
                return true;
            }
        }
        if let Some(io) = e.downcast_ref::<io::Error>() {
            if matches!(
                io.kind(),
                io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
            ) {
                return true;
            }
        }
        current = e.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_errors_recognized() {
        assert!(is_close_error(&tungstenite::Error::ConnectionClosed));
        assert!(is_close_error(&tungstenite::Error::AlreadyClosed));
        assert!(is_close_error(&io::Error::from(io::ErrorKind::BrokenPipe)));
        assert!(is_close_error(&axum::Error::new(tungstenite::Error::ConnectionClosed)));
    }

    #[test]
    fn test_other_errors_not_close() {
        assert!(!is_close_error(&io::Error::from(io::ErrorKind::TimedOut)));
        assert!(!is_close_error(&tungstenite::Error::Io(io::Error::from(
            io::ErrorKind::TimedOut
        ))));
        assert!(!is_close_error(&axum::Error::new(io::Error::other("boom"))));
    }
}
