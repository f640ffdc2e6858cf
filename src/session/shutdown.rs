use super::state::EndReason;
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// The single cancellation signal shared by every activity of a session.
///
/// Triggering is idempotent: the first reason wins and later triggers only
/// re-cancel an already cancelled token.
#[derive(Clone)]
pub(crate) struct Shutdown {
    token: CancellationToken,
    reason: Arc<Mutex<Option<EndReason>>>,
}

impl Shutdown {
    pub(crate) fn new(token: CancellationToken) -> Self {
        Self {
            token,
            reason: Arc::new(Mutex::new(None)),
        }
    }

    /// Records `reason` if nothing ended the session yet, then cancels.
    /// Returns whether this call decided the outcome.
    pub(crate) fn trigger(&self, reason: EndReason) -> bool {
        let first = {
            let mut slot = self.reason.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.is_none() && !self.token.is_cancelled() {
                debug!(reason = ?reason, "Session cancellation signaled");
                *slot = Some(reason);
                true
            } else {
                false
            }
        };
        self.token.cancel();
        first
    }

    pub(crate) fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    pub(crate) async fn cancelled(&self) {
        self.token.cancelled().await
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// The recorded reason. A token cancelled from outside (server shutdown)
    /// without a recorded reason counts as a stop.
    pub(crate) fn take_reason(&self) -> EndReason {
        self.reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or(EndReason::Stopped)
    }
}
