//! Error types and result handling for wslog.
//!
//! This module defines the main error type [`Error`] and a convenience
//! [`Result`] type alias used throughout the crate.
//!
//! Errors fall into two groups. Per-record errors ([`Error::InvalidRecord`])
//! are absorbed where they occur: the record is dropped and the session keeps
//! running. Session-level errors end exactly one session and are never
//! allowed to reach the process or another session.
//!
//! # Example
//!
//! ```rust
//! use wslog::{Error, Result};
//!
//! fn open_reader() -> Result<()> {
//!     Err(Error::ConnectFailed {
//!         message: "broker localhost:9092 unreachable".to_string(),
//!     })
//! }
//!
//! match open_reader() {
//!     Ok(()) => println!("Connected"),
//!     Err(Error::ConnectFailed { message }) => eprintln!("Connect failed: {}", message),
//!     Err(e) => eprintln!("Other error: {}", e),
//! }
//! ```

use std::time::Duration;
use thiserror::Error;

/// The main error type for wslog operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration could not be loaded or failed validation.
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Kafka client error outside of session setup.
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// JSON serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error, typically from binding the listener.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The broker could not be reached or the partition could not be
    /// subscribed. Fatal to session setup.
    #[error("Failed to connect to Kafka: {message}")]
    ConnectFailed {
        /// Description of the connection failure
        message: String,
    },

    /// A payload was not a JSON object. The record is dropped.
    #[error("Invalid record: {message}")]
    InvalidRecord {
        /// Description of what was invalid
        message: String,
    },

    /// Writing a frame to the peer failed.
    #[error("Write failed: {message}")]
    WriteFailed {
        /// Description of the write failure
        message: String,
    },

    /// The peer did not acknowledge a liveness probe in time.
    #[error("No probe acknowledgment within {waited:?}")]
    ProbeTimeout {
        /// How long the session waited for the acknowledgment
        waited: Duration,
    },

    /// The inbound stream reported a protocol-level error.
    #[error("Peer error: {message}")]
    PeerError {
        /// Description of the protocol error
        message: String,
    },

    /// The partition reader stopped producing while the session was live.
    #[error("Partition reader closed")]
    ReaderClosed,
}

impl Error {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Error::Config(config::ConfigError::Message(message.into()))
    }

    pub(crate) fn invalid_record(message: impl std::fmt::Display) -> Self {
        Error::InvalidRecord {
            message: message.to_string(),
        }
    }
}

/// A convenient Result type alias for wslog operations.
///
/// This is equivalent to `std::result::Result<T, wslog::Error>`.
pub type Result<T> = std::result::Result<T, Error>;
