//! Sequence validation errors
//!
//! Every variant stops the stream it was raised on.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SequenceError {
    /// SCN jumped past `expected` while gaps are fatal
    #[error("scn gap: expected {expected}, received {received}")]
    ScnGap { expected: u64, received: u64 },

    /// Local LSN no longer tracks the applied SCN
    #[error("local lsn {lsn} is not aligned with last applied scn {scn}")]
    LsnMisaligned { lsn: u64, scn: u64 },

    /// An SCN was confirmed out of order
    #[error("scn {scn} confirmed out of order, last issued is {last}")]
    ScnOutOfOrder { scn: u64, last: u64 },
}

impl SequenceError {
    pub fn is_fatal(&self) -> bool {
        true
    }
}

pub type SequenceResult<T> = Result<T, SequenceError>;
