//! Log segment error types
//!
//! Error codes:
//! - WAL_APPEND_FAILED (ERROR severity)
//! - WAL_ROW_TOO_LARGE (ERROR severity)
//! - WAL_WRITER_POISONED (FATAL severity)
//! - WAL_FSYNC_FAILED (FATAL severity)
//! - WAL_CORRUPTION (FATAL severity)
//! - WAL_OUT_OF_ORDER (FATAL severity)
//!
//! A corrupted segment is reported with its path and the byte offset of
//! the row that failed, so `walrep cat` can be pointed straight at it.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

/// Severity levels for log errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The write is lost, the log itself is intact
    Error,
    /// Commit or replication must stop
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
        })
    }
}

/// Log error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalErrorCode {
    WalAppendFailed,
    /// Payload could never be read back; nothing was written
    WalRowTooLarge,
    /// An earlier failure left the segment tail in an unknown state
    WalWriterPoisoned,
    WalFsyncFailed,
    WalCorruption,
    /// Row LSN does not advance the log
    WalOutOfOrder,
}

impl WalErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            WalErrorCode::WalAppendFailed => "WAL_APPEND_FAILED",
            WalErrorCode::WalRowTooLarge => "WAL_ROW_TOO_LARGE",
            WalErrorCode::WalWriterPoisoned => "WAL_WRITER_POISONED",
            WalErrorCode::WalFsyncFailed => "WAL_FSYNC_FAILED",
            WalErrorCode::WalCorruption => "WAL_CORRUPTION",
            WalErrorCode::WalOutOfOrder => "WAL_OUT_OF_ORDER",
        }
    }

    /// Only a refused or rolled-back write leaves the log usable.
    pub fn severity(&self) -> Severity {
        match self {
            WalErrorCode::WalAppendFailed | WalErrorCode::WalRowTooLarge => Severity::Error,
            _ => Severity::Fatal,
        }
    }
}

impl fmt::Display for WalErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Where in a segment an error was found
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentPosition {
    pub segment: PathBuf,
    pub offset: u64,
}

/// Log error with context
#[derive(Debug)]
pub struct WalError {
    code: WalErrorCode,
    message: String,
    position: Option<SegmentPosition>,
    lsn: Option<u64>,
    source: Option<io::Error>,
}

impl WalError {
    fn new(code: WalErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            position: None,
            lsn: None,
            source: None,
        }
    }

    fn with_source(mut self, source: io::Error) -> Self {
        self.source = Some(source);
        self
    }

    pub fn append_failed(message: impl Into<String>, source: io::Error) -> Self {
        Self::new(WalErrorCode::WalAppendFailed, message).with_source(source)
    }

    pub fn row_too_large(lsn: u64, len: usize, max: u32) -> Self {
        let mut err = Self::new(
            WalErrorCode::WalRowTooLarge,
            format!("row payload of {} bytes exceeds {}", len, max),
        );
        err.lsn = Some(lsn);
        err
    }

    pub fn poisoned(segment: &Path) -> Self {
        Self::new(
            WalErrorCode::WalWriterPoisoned,
            format!(
                "writer refused: {} was left in an unknown state",
                segment.display()
            ),
        )
    }

    pub fn fsync_failed(message: impl Into<String>, source: io::Error) -> Self {
        Self::new(WalErrorCode::WalFsyncFailed, message).with_source(source)
    }

    /// Malformed log state not tied to a byte position
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::new(WalErrorCode::WalCorruption, message)
    }

    /// Malformed content at `offset` of `segment`
    pub fn corruption_in(segment: &Path, offset: u64, reason: impl Into<String>) -> Self {
        let mut err = Self::new(WalErrorCode::WalCorruption, reason);
        err.position = Some(SegmentPosition {
            segment: segment.to_path_buf(),
            offset,
        });
        err
    }

    pub fn out_of_order(lsn: u64, last_lsn: u64) -> Self {
        let mut err = Self::new(
            WalErrorCode::WalOutOfOrder,
            format!("lsn {} does not follow {}", lsn, last_lsn),
        );
        err.lsn = Some(lsn);
        err
    }

    pub fn code(&self) -> WalErrorCode {
        self.code
    }

    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Segment and offset of a corruption, when known
    pub fn position(&self) -> Option<&SegmentPosition> {
        self.position.as_ref()
    }

    /// LSN of the row that was refused
    pub fn lsn(&self) -> Option<u64> {
        self.lsn
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl fmt::Display for WalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity(), self.code, self.message)?;
        if let Some(pos) = &self.position {
            write!(f, " ({} at byte {})", pos.segment.display(), pos.offset)?;
        }
        Ok(())
    }
}

impl std::error::Error for WalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Result type for log operations
pub type WalResult<T> = Result<T, WalError>;
