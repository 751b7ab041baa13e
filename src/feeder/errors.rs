//! # Feeder Errors

use std::io;

use thiserror::Error;

use crate::filter::FilterError;
use crate::protocol::ProtocolError;
use crate::sequence::SequenceError;
use crate::wal::WalError;

/// Result type for feeder operations
pub type FeederResult<T> = Result<T, FeederError>;

/// Feeder errors
#[derive(Debug, Error)]
pub enum FeederError {
    // ==================
    // Commit Path
    // ==================
    /// Segment I/O or corruption
    #[error(transparent)]
    Wal(#[from] WalError),

    /// SCN could not be issued
    #[error(transparent)]
    Sequence(#[from] SequenceError),

    /// Commit log lock poisoned by a panicking committer
    #[error("Commit log poisoned")]
    Poisoned,

    // ==================
    // Connection Errors
    // ==================
    /// Wire failure on one connection
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A row could not be sent within the send timeout
    #[error("Send timed out after {0} ms")]
    SendTimeout(u64),

    /// Slave asked for a filter that is not registered
    #[error(transparent)]
    Filter(#[from] FilterError),

    // ==================
    // Server Errors
    // ==================
    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Listener could not be bound
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Background task failed
    #[error("Task failed: {0}")]
    Task(String),
}

impl FeederError {
    /// Errors that stop the feeder as a whole rather than one connection.
    pub fn is_fatal(&self) -> bool {
        match self {
            FeederError::Wal(e) => e.is_fatal(),
            FeederError::Sequence(_)
            | FeederError::Poisoned
            | FeederError::Config(_)
            | FeederError::Bind { .. } => true,
            FeederError::Protocol(_)
            | FeederError::SendTimeout(_)
            | FeederError::Filter(_)
            | FeederError::Task(_) => false,
        }
    }
}
