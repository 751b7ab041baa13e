//! Log segment directory
//!
//! Rows are persisted in sequential segment files under `<data_dir>/wal`.
//! A segment is named after the LSN of its first row, zero padded to 20
//! digits (`00000000000000000002.xlog`), so lexical and numeric order
//! agree.
//!
//! File layout:
//! - text header `XLOG\n0.12\n\n`
//! - per row: `ROW_MARKER u32 LE` followed by the encoded row
//! - `EOF_MARKER u32 LE` once the segment is closed
//!
//! A segment without the EOF marker is still being written (or its writer
//! stopped); it ends cleanly at the last complete row.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::errors::{WalError, WalResult};
use super::reader::SegmentReader;
use super::row::Row;

pub const SEGMENT_SUFFIX: &str = "xlog";
pub const SEGMENT_HEADER: &[u8] = b"XLOG\n0.12\n\n";
pub const ROW_MARKER: u32 = 0xba0b_abed;
pub const EOF_MARKER: u32 = 0x10ad_ab1e;

const SEGMENT_ID_WIDTH: usize = 20;

/// File name of the segment whose first row has `first_lsn`.
pub fn segment_file_name(first_lsn: u64) -> String {
    format!("{:020}.{}", first_lsn, SEGMENT_SUFFIX)
}

/// Inverse of [`segment_file_name`]. Foreign files yield `None`.
pub fn parse_segment_file_name(name: &str) -> Option<u64> {
    let stem = name.strip_suffix(SEGMENT_SUFFIX)?.strip_suffix('.')?;
    if stem.len() != SEGMENT_ID_WIDTH || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

/// A segment file on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentInfo {
    pub first_lsn: u64,
    pub path: PathBuf,
}

/// Last persisted row position
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogPosition {
    pub lsn: u64,
    pub scn: u64,
}

/// Directory holding the segments of one log
#[derive(Debug, Clone)]
pub struct WalDir {
    path: PathBuf,
}

impl WalDir {
    /// Opens `<data_dir>/wal`, creating it if missing.
    pub fn open(data_dir: &Path) -> WalResult<Self> {
        let path = data_dir.join("wal");
        if !path.exists() {
            fs::create_dir_all(&path).map_err(|e| {
                WalError::append_failed(
                    format!("Failed to create WAL directory: {}", path.display()),
                    e,
                )
            })?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lists segments ordered by first LSN.
    pub fn segments(&self) -> WalResult<Vec<SegmentInfo>> {
        let entries = fs::read_dir(&self.path).map_err(|e| {
            WalError::corruption(format!(
                "Failed to list WAL directory {}: {}",
                self.path.display(),
                e
            ))
        })?;

        let mut segments = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                WalError::corruption(format!("Failed to read WAL directory entry: {}", e))
            })?;
            let name = entry.file_name();
            if let Some(first_lsn) = name.to_str().and_then(parse_segment_file_name) {
                segments.push(SegmentInfo {
                    first_lsn,
                    path: entry.path(),
                });
            }
        }
        segments.sort_by_key(|s| s.first_lsn);
        Ok(segments)
    }

    /// Position of the last persisted row, or zero for an empty log.
    pub fn last_position(&self) -> WalResult<LogPosition> {
        for segment in self.segments()?.iter().rev() {
            let mut reader = SegmentReader::open(&segment.path)?;
            let mut last = None;
            while let Some(row) = reader.read_next()? {
                last = Some(LogPosition {
                    lsn: row.lsn,
                    scn: row.scn,
                });
            }
            if let Some(position) = last {
                return Ok(position);
            }
        }
        Ok(LogPosition::default())
    }

    /// Reads every persisted row in log order.
    pub fn read_all(&self) -> WalResult<Vec<Row>> {
        let mut rows = Vec::new();
        for segment in self.segments()? {
            let mut reader = SegmentReader::open(&segment.path)?;
            while let Some(row) = reader.read_next()? {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    /// Reads up to `limit` rows with `after_scn < scn <= until_scn`.
    ///
    /// Segments are skipped by their first row's SCN so a catch-up read
    /// does not rescan the whole log. Reading stops at `until_scn`, which
    /// lets it run against a log that is still being appended to as long
    /// as `until_scn` is durable.
    pub fn read_after_scn(
        &self,
        after_scn: u64,
        until_scn: u64,
        limit: usize,
    ) -> WalResult<Vec<Row>> {
        let mut rows = Vec::new();
        if after_scn >= until_scn || limit == 0 {
            return Ok(rows);
        }

        let segments = self.segments()?;
        let mut start = 0;
        for (i, segment) in segments.iter().enumerate() {
            match first_scn(&segment.path) {
                Ok(Some(scn)) if scn <= after_scn + 1 => start = i,
                Ok(None) => {}
                // Later segments hold later rows, or are still being created
                Ok(Some(_)) | Err(_) => break,
            }
        }

        for segment in &segments[start..] {
            let mut reader = SegmentReader::open(&segment.path)?;
            while let Some(row) = reader.read_next()? {
                if row.scn <= after_scn {
                    continue;
                }
                if row.scn > until_scn {
                    return Ok(rows);
                }
                let done = row.scn == until_scn || rows.len() + 1 >= limit;
                rows.push(row);
                if done {
                    return Ok(rows);
                }
            }
        }
        Ok(rows)
    }
}

fn first_scn(path: &Path) -> WalResult<Option<u64>> {
    let mut reader = SegmentReader::open(path)?;
    Ok(reader.read_next()?.map(|row| row.scn))
}

pub(crate) fn is_not_found(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::NotFound
}
