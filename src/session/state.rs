use crate::{Error, Result};
use std::fmt;

/// Lifecycle of a session. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    /// Resolving the filter and opening the partition reader.
    Setup,
    /// Ingest, dispatch, probe and peer monitor are all live.
    Running,
    /// Cancellation observed; activities are exiting.
    Draining,
    /// Every activity has exited and the connection is released.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Setup => "setup",
            SessionState::Running => "running",
            SessionState::Draining => "draining",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// How a session that did not fail came to an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The peer closed the connection.
    PeerClosed,
    /// The session reached its maximum lifetime.
    Expired,
    /// The session was stopped explicitly or by server shutdown.
    Stopped,
}

/// The first terminal condition observed by any activity.
#[derive(Debug)]
pub(crate) enum EndReason {
    PeerClosed,
    Expired,
    Stopped,
    Failed(Error),
}

impl EndReason {
    pub(crate) fn into_result(self) -> Result<SessionEnd> {
        match self {
            EndReason::PeerClosed => Ok(SessionEnd::PeerClosed),
            EndReason::Expired => Ok(SessionEnd::Expired),
            EndReason::Stopped => Ok(SessionEnd::Stopped),
            EndReason::Failed(e) => Err(e),
        }
    }
}
