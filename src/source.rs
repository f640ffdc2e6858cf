//! Payload sources feeding a session.
//!
//! A [`PayloadSource`] pushes raw record payloads into a channel until it is
//! cancelled or fails. [`ReaderHandle`] owns the spawned source task and is
//! the only way to stop it.

use crate::Result;
use bytes::Bytes;
use std::future::Future;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, Instrument};

/// Produces an unbounded sequence of raw payloads.
///
/// `run` must return promptly once `cancel` fires, and must release its
/// resources before returning. Returning (for any reason) drops `tx`, which
/// closes the sequence for the consumer.
pub trait PayloadSource: Send + 'static {
    fn run(
        self,
        tx: mpsc::Sender<Bytes>,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Handle to a running source task.
pub struct ReaderHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ReaderHandle {
    /// Spawns `source`, pushing into `tx`. The source stops when `parent` is
    /// cancelled or [`ReaderHandle::stop`] is called.
    pub fn start<S: PayloadSource>(
        source: S,
        tx: mpsc::Sender<Bytes>,
        parent: &CancellationToken,
    ) -> Self {
        let cancel = parent.child_token();
        let task_cancel = cancel.clone();
        let task = tokio::spawn(
            async move {
                match source.run(tx, task_cancel).await {
                    Ok(()) => debug!("payload source stopped"),
                    Err(e) => error!(error = %e, "payload source failed"),
                }
            }
            .in_current_span(),
        );

        Self {
            cancel,
            task: Some(task),
        }
    }

    /// Stops the source and waits for it to release its resources. Calling
    /// it again is a no-op.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!(error = %e, "payload source task panicked");
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.task.is_none()
    }
}

impl Drop for ReaderHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Forwards payloads from an in-process channel. Ends when the sending side
/// is dropped.
pub struct ChannelSource {
    rx: mpsc::Receiver<Bytes>,
}

impl ChannelSource {
    pub fn new(rx: mpsc::Receiver<Bytes>) -> Self {
        Self { rx }
    }

    /// Returns the source together with the sender feeding it.
    pub fn pair(capacity: usize) -> (mpsc::Sender<Bytes>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self::new(rx))
    }
}

impl PayloadSource for ChannelSource {
    async fn run(mut self, tx: mpsc::Sender<Bytes>, cancel: CancellationToken) -> Result<()> {
        loop {
            let payload = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                payload = self.rx.recv() => match payload {
                    Some(payload) => payload,
                    None => return Ok(()),
                },
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                sent = tx.send(payload) => {
                    if sent.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_source_forwards_in_order() {
        let (feed, source) = ChannelSource::pair(8);
        let (tx, mut rx) = mpsc::channel(8);
        let parent = CancellationToken::new();
        let mut handle = ReaderHandle::start(source, tx, &parent);

        for i in 0..3 {
            feed.send(Bytes::from(format!("r{}", i))).await.unwrap();
        }
        for i in 0..3 {
            assert_eq!(rx.recv().await.unwrap(), Bytes::from(format!("r{}", i)));
        }

        handle.stop().await;
        assert!(handle.is_stopped());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (_feed, source) = ChannelSource::pair(1);
        let (tx, _rx) = mpsc::channel(1);
        let parent = CancellationToken::new();
        let mut handle = ReaderHandle::start(source, tx, &parent);

        handle.stop().await;
        handle.stop().await;
        assert!(handle.is_stopped());
    }

    #[tokio::test]
    async fn test_parent_cancellation_stops_source() {
        let (_feed, source) = ChannelSource::pair(1);
        let (tx, mut rx) = mpsc::channel(1);
        let parent = CancellationToken::new();
        let _handle = ReaderHandle::start(source, tx, &parent);

        parent.cancel();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_source_end_closes_output() {
        let (feed, source) = ChannelSource::pair(1);
        let (tx, mut rx) = mpsc::channel(1);
        let parent = CancellationToken::new();
        let _handle = ReaderHandle::start(source, tx, &parent);

        drop(feed);
        assert!(rx.recv().await.is_none());
    }
}
