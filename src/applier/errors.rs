//! # Applier Errors

use thiserror::Error;

use crate::engine::EngineError;
use crate::protocol::ProtocolError;
use crate::sequence::SequenceError;
use crate::wal::WalError;

/// Result type for slave operations
pub type ApplierResult<T> = Result<T, ApplierError>;

/// Why an applier stopped accepting rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltReason {
    /// SCN gap while gaps are fatal
    ScnGap { expected: u64, received: u64 },

    /// Local LSN drifted from the applied SCN
    LsnMisaligned { lsn: u64, scn: u64 },

    /// The engine refused a row
    EngineFailure { scn: u64 },

    /// The local log could not persist an applied row
    LocalLogFailure { scn: u64 },
}

impl std::fmt::Display for HaltReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HaltReason::ScnGap { expected, received } => {
                write!(f, "scn gap (expected {}, received {})", expected, received)
            }
            HaltReason::LsnMisaligned { lsn, scn } => {
                write!(f, "local lsn {} misaligned with scn {}", lsn, scn)
            }
            HaltReason::EngineFailure { scn } => write!(f, "engine failed at scn {}", scn),
            HaltReason::LocalLogFailure { scn } => write!(f, "local log failed at scn {}", scn),
        }
    }
}

/// Slave errors
#[derive(Debug, Error)]
pub enum ApplierError {
    // ==================
    // Apply Errors
    // ==================
    /// Applier already halted; no further rows are accepted
    #[error("Applier halted: {0}")]
    Halted(HaltReason),

    #[error(transparent)]
    Sequence(#[from] SequenceError),

    #[error("Engine rejected row at scn {scn}: {source}")]
    Engine {
        scn: u64,
        #[source]
        source: EngineError,
    },

    #[error(transparent)]
    Wal(#[from] WalError),

    // ==================
    // Connection Errors
    // ==================
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Nothing arrived from the feeder, not even a keepalive
    #[error("No data from feeder for {0} ms")]
    ReadTimeout(u64),

    // ==================
    // Setup Errors
    // ==================
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ApplierError {
    /// Fatal errors stop the puller; everything else reconnects.
    pub fn is_fatal(&self) -> bool {
        match self {
            ApplierError::Protocol(e) => e.is_fatal(),
            ApplierError::ReadTimeout(_) => false,
            ApplierError::Halted(_)
            | ApplierError::Sequence(_)
            | ApplierError::Engine { .. }
            | ApplierError::Wal(_)
            | ApplierError::Config(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_connection_loss_is_not_fatal() {
        let lost = ProtocolError::Io(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        assert!(!ApplierError::Protocol(lost).is_fatal());
        assert!(!ApplierError::ReadTimeout(100).is_fatal());
    }

    #[test]
    fn test_rejection_and_halts_are_fatal() {
        let rejected = ProtocolError::Rejected {
            status: crate::protocol::HandshakeStatus::UnknownFilter,
            message: "x".into(),
        };
        assert!(ApplierError::Protocol(rejected).is_fatal());
        assert!(ApplierError::Halted(HaltReason::EngineFailure { scn: 3 }).is_fatal());
    }

    #[test]
    fn test_halt_reason_display() {
        let reason = HaltReason::ScnGap {
            expected: 5,
            received: 7,
        };
        assert_eq!(reason.to_string(), "scn gap (expected 5, received 7)");
    }
}
