pub mod config;
pub mod error;
pub mod server;
pub mod source;

pub mod kafka;
pub mod record;
pub mod session;

pub use crate::config::Config;
pub use crate::error::{Error, Result};
pub use crate::server::LogServer;
pub use crate::session::{Session, SessionEnd, SessionHandle, SessionState};
