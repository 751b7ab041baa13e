//! Apply target for replicated rows
//!
//! The storage engine proper is an external collaborator; the replication
//! core only needs somewhere to apply accepted rows. [`Engine`] is that
//! boundary and [`MemoryEngine`] is a small in-memory implementation used
//! by the CLI and by tests.

mod memory;

pub use memory::MemoryEngine;

use thiserror::Error;

use crate::wal::{Command, Row};

/// Errors raised while applying a row
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("cannot store an empty tuple")]
    EmptyTuple,

    #[error("field {field} out of range for tuple of {len} fields")]
    FieldOutOfRange { field: u32, len: usize },

    #[error("operand of field {field} does not match the field width")]
    OperandMismatch { field: u32 },

    #[error("malformed splice operand for field {field}")]
    BadSpliceOperand { field: u32 },
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Something rows can be applied to.
///
/// `apply` must be all-or-nothing: on error the engine state is unchanged.
pub trait Engine: Send {
    /// Applies one replicated row.
    ///
    /// A payload the engine cannot interpret is skipped, not refused: a
    /// feeder filter may legitimately rewrite data rows into opaque bytes.
    fn apply(&mut self, row: &Row) -> EngineResult<()>;

    /// Executes a command directly.
    fn execute(&mut self, command: &Command) -> EngineResult<()>;
}
