use super::keepalive;
use super::shutdown::Shutdown;
use super::state::{EndReason, SessionEnd, SessionState};
use super::writer::Dispatcher;
use crate::config::SessionConfig;
use crate::record::{FieldFilter, LineFormatter, RecordFilter, RecordFormatter};
use crate::source::{PayloadSource, ReaderHandle};
use crate::{Error, Result};
use axum::extract::ws::{close_code, CloseFrame, Message, Utf8Bytes};
use bytes::Bytes;
use futures::{Sink, SinkExt, Stream};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn, Instrument};

/// One client's log stream, from setup to teardown.
///
/// A running session has four activities: ingest (reader output through the
/// filter into the bounded outbound queue), dispatch (the only writer to the
/// connection), probe (periodic liveness probes) and the peer monitor
/// (inbound half). They share one cancellation signal; the session is
/// closed once all of them and the payload source have exited.
pub struct Session<F = FieldFilter, P = LineFormatter> {
    id: u64,
    config: SessionConfig,
    reader_capacity: usize,
    filter: Arc<F>,
    formatter: Arc<P>,
    shutdown: Shutdown,
    state: watch::Sender<SessionState>,
}

/// Cloneable control handle for a session.
#[derive(Clone)]
pub struct SessionHandle {
    id: u64,
    shutdown: Shutdown,
    state: watch::Receiver<SessionState>,
}

impl Session {
    pub fn new(id: u64, config: SessionConfig) -> Self {
        Self::with_token(id, config, CancellationToken::new())
    }

    /// A session that also stops when `parent` is cancelled.
    pub fn child_of(id: u64, config: SessionConfig, parent: &CancellationToken) -> Self {
        Self::with_token(id, config, parent.child_token())
    }

    fn with_token(id: u64, config: SessionConfig, token: CancellationToken) -> Self {
        let (state, _) = watch::channel(SessionState::Setup);
        Self {
            id,
            config,
            reader_capacity: 1,
            filter: Arc::new(FieldFilter::default()),
            formatter: Arc::new(LineFormatter),
            shutdown: Shutdown::new(token),
            state,
        }
    }
}

impl<F, P> Session<F, P>
where
    F: RecordFilter + 'static,
    P: RecordFormatter + 'static,
{
    pub fn with_filter<G: RecordFilter + 'static>(self, filter: G) -> Session<G, P> {
        Session {
            id: self.id,
            config: self.config,
            reader_capacity: self.reader_capacity,
            filter: Arc::new(filter),
            formatter: self.formatter,
            shutdown: self.shutdown,
            state: self.state,
        }
    }

    pub fn with_formatter<Q: RecordFormatter + 'static>(self, formatter: Q) -> Session<F, Q> {
        Session {
            id: self.id,
            config: self.config,
            reader_capacity: self.reader_capacity,
            filter: self.filter,
            formatter: Arc::new(formatter),
            shutdown: self.shutdown,
            state: self.state,
        }
    }

    /// Capacity of the channel between the payload source and ingest.
    pub fn with_reader_capacity(mut self, capacity: usize) -> Self {
        self.reader_capacity = capacity.max(1);
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            id: self.id,
            shutdown: self.shutdown.clone(),
            state: self.state.subscribe(),
        }
    }

    /// Runs setup by awaiting `open`, then the session. If setup fails the
    /// session never enters [`SessionState::Running`]: the connection is
    /// closed and the setup error is returned.
    #[instrument(skip_all, fields(session_id = self.id))]
    pub async fn start<O, S, W, R, E>(self, open: O, mut sink: W, stream: R) -> Result<SessionEnd>
    where
        O: Future<Output = Result<S>>,
        S: PayloadSource,
        W: Sink<Message> + Unpin + Send + 'static,
        W::Error: std::error::Error + Send + Sync + 'static,
        R: Stream<Item = std::result::Result<Message, E>> + Unpin + Send + 'static,
        E: Display + Send + 'static,
    {
        debug!("Session setup");
        let opened = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => None,
            opened = open => Some(opened),
        };

        let source = match opened {
            Some(Ok(source)) => source,
            Some(Err(e)) => {
                error!(error = %e, "Session setup failed");
                self.close_unstarted(&mut sink, close_code::ERROR, "setup failed")
                    .await;
                return Err(e);
            }
            None => {
                self.close_unstarted(&mut sink, close_code::AWAY, "stopped").await;
                return self.shutdown.take_reason().into_result();
            }
        };

        self.run_source(source, sink, stream).await
    }

    /// Runs the session over an already opened payload source.
    #[instrument(skip_all, fields(session_id = self.id))]
    pub async fn run<S, W, R, E>(self, source: S, sink: W, stream: R) -> Result<SessionEnd>
    where
        S: PayloadSource,
        W: Sink<Message> + Unpin + Send + 'static,
        W::Error: std::error::Error + Send + Sync + 'static,
        R: Stream<Item = std::result::Result<Message, E>> + Unpin + Send + 'static,
        E: Display + Send + 'static,
    {
        self.run_source(source, sink, stream).await
    }

    async fn run_source<S, W, R, E>(self, source: S, sink: W, stream: R) -> Result<SessionEnd>
    where
        S: PayloadSource,
        W: Sink<Message> + Unpin + Send + 'static,
        W::Error: std::error::Error + Send + Sync + 'static,
        R: Stream<Item = std::result::Result<Message, E>> + Unpin + Send + 'static,
        E: Display + Send + 'static,
    {
        let (payload_tx, payload_rx) = mpsc::channel(self.reader_capacity);
        let mut reader = ReaderHandle::start(source, payload_tx, self.shutdown.token());

        let (outbound_tx, outbound_rx) = mpsc::channel(self.config.queue_capacity);
        let (probe_tx, probe_rx) = mpsc::channel(1);
        let (ack_tx, ack_rx) = mpsc::channel(1);

        let mut activities = JoinSet::new();
        activities.spawn(
            ingest(payload_rx, outbound_tx, self.filter.clone(), self.shutdown.clone())
                .in_current_span(),
        );
        activities.spawn(
            Dispatcher::new(sink, self.formatter.clone(), self.config.write_timeout())
                .run(outbound_rx, probe_rx, self.shutdown.clone())
                .in_current_span(),
        );
        activities.spawn(
            keepalive::probe(
                probe_tx,
                ack_rx,
                self.config.ping_period(),
                self.config.pong_wait(),
                self.shutdown.clone(),
            )
            .in_current_span(),
        );
        activities.spawn(keepalive::monitor(stream, ack_tx, self.shutdown.clone()).in_current_span());

        self.set_state(SessionState::Running);
        info!("Session running");

        let lifetime = tokio::time::sleep(self.config.max_lifetime());
        tokio::pin!(lifetime);
        tokio::select! {
            _ = self.shutdown.cancelled() => {}
            _ = &mut lifetime => {
                info!(lifetime = ?self.config.max_lifetime(), "Session lifetime reached");
                self.shutdown.trigger(EndReason::Expired);
            }
            Some(joined) = activities.join_next() => {
                // Activities only exit on their own after signaling
                // cancellation, unless they panicked.
                if let Err(e) = joined {
                    error!(error = %e, "Session activity panicked");
                }
                self.shutdown.trigger(EndReason::Stopped);
            }
        }

        self.set_state(SessionState::Draining);
        reader.stop().await;
        while let Some(joined) = activities.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Session activity panicked");
            }
        }

        self.set_state(SessionState::Closed);
        let result = self.shutdown.take_reason().into_result();
        match &result {
            Ok(end) => info!(end = ?end, "Session closed"),
            Err(e) => info!(error = %e, "Session closed with error"),
        }
        result
    }

    async fn close_unstarted<W>(&self, sink: &mut W, code: u16, reason: &'static str)
    where
        W: Sink<Message> + Unpin,
        W::Error: Display,
    {
        let frame = Message::Close(Some(CloseFrame {
            code,
            reason: Utf8Bytes::from_static(reason),
        }));
        let closing = async {
            match sink.send(frame).await {
                Ok(()) => sink.close().await,
                Err(e) => Err(e),
            }
        };
        match tokio::time::timeout(self.config.write_timeout(), closing).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "Failed to close connection"),
            Err(_) => warn!("Timed out closing connection"),
        }
        self.set_state(SessionState::Closed);
    }

    fn set_state(&self, state: SessionState) {
        debug!(%state, "Session state changed");
        self.state.send_replace(state);
    }
}

/// Moves matching payloads from the source into the outbound queue. This is
/// the only producer of the queue, which closes when it returns.
async fn ingest<F: RecordFilter>(
    mut payloads: mpsc::Receiver<Bytes>,
    outbound: mpsc::Sender<Bytes>,
    filter: Arc<F>,
    shutdown: Shutdown,
) {
    loop {
        let payload = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            payload = payloads.recv() => match payload {
                Some(payload) => payload,
                None => {
                    error!("Partition reader closed");
                    shutdown.trigger(EndReason::Failed(Error::ReaderClosed));
                    break;
                }
            },
        };

        match filter.matches_payload(&payload) {
            Ok(true) => {}
            Ok(false) => {
                trace!("Record filtered out");
                continue;
            }
            Err(e) => {
                warn!(error = %e, "Dropping record");
                continue;
            }
        }

        // Blocks while the queue is full: a slow client stalls ingestion.
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            sent = outbound.send(payload) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }
    debug!("Ingest stopped");
}

impl SessionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Ends the session. Safe to call any number of times, from any task.
    pub fn stop(&self) {
        self.shutdown.trigger(EndReason::Stopped);
    }

    pub fn is_stopping(&self) -> bool {
        self.shutdown.is_triggered()
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Waits until the session reaches `state` (or a later one).
    pub async fn wait_for(&mut self, state: SessionState) {
        // The sender lives as long as the session; once it is gone the
        // session has finished.
        let _ = self.state.wait_for(|current| *current >= state).await;
    }
}
