//! Segment writer with fsync enforcement
//!
//! - Every append is followed by fsync before it is reported durable
//! - LSNs must strictly increase across the whole log
//! - A new segment is started every `rows_per_segment` rows, named after
//!   the LSN of its first row
//!
//! A reopened writer never appends to an old segment; it starts a fresh
//! one at the next row.
//!
//! A failed write is cut back to the last row boundary. If that cut or an
//! fsync fails, the segment tail is unknown and the writer is poisoned:
//! every later append fails fatally and no EOF marker is written.

use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::errors::{WalError, WalResult};
use super::row::{Row, MAX_ROW_LEN};
use super::segment::{segment_file_name, LogPosition, WalDir, EOF_MARKER, ROW_MARKER, SEGMENT_HEADER};

struct OpenSegment {
    path: PathBuf,
    file: File,
    rows: usize,
    /// Bytes up to the end of the last complete row
    len: u64,
}

impl OpenSegment {
    /// Cuts the file back to the last complete row.
    fn rollback(&mut self) -> io::Result<()> {
        self.file.set_len(self.len)?;
        self.file.seek(SeekFrom::Start(self.len))?;
        Ok(())
    }
}

/// Append-only writer over a [`WalDir`].
pub struct SegmentWriter {
    dir: WalDir,
    rows_per_segment: usize,
    current: Option<OpenSegment>,
    last: LogPosition,
    buf: Vec<u8>,
    /// Segment left in an unknown state by a failed write
    poisoned: Option<PathBuf>,
}

impl SegmentWriter {
    /// Opens the log in `dir`, resuming after its last persisted row.
    pub fn open(dir: WalDir, rows_per_segment: usize) -> WalResult<Self> {
        let last = dir.last_position()?;
        Ok(Self {
            dir,
            rows_per_segment: rows_per_segment.max(1),
            current: None,
            last,
            buf: Vec::with_capacity(4096),
            poisoned: None,
        })
    }

    pub fn dir(&self) -> &WalDir {
        &self.dir
    }

    /// Path of the segment currently appended to.
    pub fn current_path(&self) -> Option<&Path> {
        self.current.as_ref().map(|s| s.path.as_path())
    }

    pub fn last_lsn(&self) -> u64 {
        self.last.lsn
    }

    pub fn last_scn(&self) -> u64 {
        self.last.scn
    }

    pub fn next_lsn(&self) -> u64 {
        self.last.lsn + 1
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.is_some()
    }

    /// Appends a row and fsyncs it.
    ///
    /// # Errors
    ///
    /// - `WAL_WRITER_POISONED` after an earlier unrecoverable failure (FATAL)
    /// - `WAL_ROW_TOO_LARGE` if the payload could never be read back
    /// - `WAL_OUT_OF_ORDER` if `row.lsn` does not exceed the last LSN
    /// - `WAL_APPEND_FAILED` if the write fails and was rolled back
    /// - `WAL_FSYNC_FAILED` if fsync or the rollback fails (FATAL)
    pub fn append(&mut self, row: &Row) -> WalResult<()> {
        if let Some(path) = &self.poisoned {
            return Err(WalError::poisoned(path));
        }
        if row.check_len().is_err() {
            return Err(WalError::row_too_large(row.lsn, row.data.len(), MAX_ROW_LEN));
        }
        if row.lsn <= self.last.lsn {
            return Err(WalError::out_of_order(row.lsn, self.last.lsn));
        }

        if self
            .current
            .as_ref()
            .map_or(false, |s| s.rows >= self.rows_per_segment)
        {
            self.close()?;
        }
        if self.current.is_none() {
            self.current = Some(self.create_segment(row.lsn)?);
        }

        self.buf.clear();
        self.buf.extend_from_slice(&ROW_MARKER.to_le_bytes());
        row.encode_into(&mut self.buf);

        let segment = match self.current.as_mut() {
            Some(segment) => segment,
            None => return Err(WalError::corruption("no open segment")),
        };

        if let Err(e) = segment.file.write_all(&self.buf) {
            if let Err(cut) = segment.rollback() {
                tracing::error!(
                    path = %segment.path.display(),
                    offset = segment.len,
                    error = %cut,
                    "rollback after failed write failed"
                );
                self.poisoned = Some(segment.path.clone());
                return Err(WalError::fsync_failed(
                    format!("Failed to roll back partial row at lsn {}", row.lsn),
                    e,
                ));
            }
            return Err(WalError::append_failed(
                format!("Failed to write row at lsn {}", row.lsn),
                e,
            ));
        }
        if let Err(e) = segment.file.sync_data() {
            // The kernel may have dropped dirty pages: nothing written since
            // the last fsync can be trusted
            if let Err(cut) = segment.rollback() {
                tracing::error!(
                    path = %segment.path.display(),
                    error = %cut,
                    "rollback after failed fsync failed"
                );
            }
            self.poisoned = Some(segment.path.clone());
            return Err(WalError::fsync_failed(
                format!("fsync failed after row at lsn {}", row.lsn),
                e,
            ));
        }

        segment.len += self.buf.len() as u64;
        segment.rows += 1;
        self.last = LogPosition {
            lsn: row.lsn,
            scn: row.scn,
        };
        Ok(())
    }

    /// Writes the EOF marker to the current segment, if any.
    ///
    /// A poisoned segment is left without one.
    pub fn close(&mut self) -> WalResult<()> {
        if self.poisoned.is_some() {
            self.current = None;
            return Ok(());
        }
        if let Some(mut segment) = self.current.take() {
            if let Err(e) = segment.file.write_all(&EOF_MARKER.to_le_bytes()) {
                self.poisoned = Some(segment.path);
                return Err(WalError::fsync_failed("Failed to write EOF marker", e));
            }
            if let Err(e) = segment.file.sync_all() {
                self.poisoned = Some(segment.path);
                return Err(WalError::fsync_failed("fsync failed after EOF marker", e));
            }
        }
        Ok(())
    }

    fn create_segment(&self, first_lsn: u64) -> WalResult<OpenSegment> {
        let path = self.dir.path().join(segment_file_name(first_lsn));
        // a leftover file with this name can only hold a header: its first
        // row would otherwise be part of `self.last`
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| {
                WalError::append_failed(format!("Failed to create segment {}", path.display()), e)
            })?;
        file.write_all(SEGMENT_HEADER)
            .map_err(|e| WalError::append_failed("Failed to write segment header", e))?;

        tracing::debug!(path = %path.display(), first_lsn, "opened log segment");
        Ok(OpenSegment {
            path,
            file,
            rows: 0,
            len: SEGMENT_HEADER.len() as u64,
        })
    }
}

impl Drop for SegmentWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "failed to close log segment");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::tag::Tag;

    fn row(lsn: u64, scn: u64) -> Row {
        Row::new(lsn, scn, Tag::wal_data(), format!("row{}", lsn).into_bytes())
    }

    #[test]
    fn test_append_then_reopen_resumes_position() {
        let dir = tempfile::TempDir::new().unwrap();
        {
            let mut writer = SegmentWriter::open(WalDir::open(dir.path()).unwrap(), 100).unwrap();
            for i in 1..=5 {
                writer.append(&row(i, i + 10)).unwrap();
            }
        }

        let writer = SegmentWriter::open(WalDir::open(dir.path()).unwrap(), 100).unwrap();
        assert_eq!(writer.last_lsn(), 5);
        assert_eq!(writer.last_scn(), 15);
        assert_eq!(writer.next_lsn(), 6);
    }

    #[test]
    fn test_rotation_names_segments_by_first_lsn() {
        let dir = tempfile::TempDir::new().unwrap();
        let wal = WalDir::open(dir.path()).unwrap();
        let mut writer = SegmentWriter::open(wal.clone(), 2).unwrap();
        for i in 1..=5 {
            writer.append(&row(i, i)).unwrap();
        }
        writer.close().unwrap();

        let firsts: Vec<u64> = wal.segments().unwrap().iter().map(|s| s.first_lsn).collect();
        assert_eq!(firsts, vec![1, 3, 5]);
        assert_eq!(wal.read_all().unwrap().len(), 5);
    }

    #[test]
    fn test_out_of_order_lsn_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut writer = SegmentWriter::open(WalDir::open(dir.path()).unwrap(), 10).unwrap();
        writer.append(&row(3, 3)).unwrap();

        let err = writer.append(&row(3, 4)).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_oversized_row_rejected_before_write() {
        let dir = tempfile::TempDir::new().unwrap();
        let wal = WalDir::open(dir.path()).unwrap();
        let mut writer = SegmentWriter::open(wal.clone(), 10).unwrap();
        writer.append(&row(1, 1)).unwrap();

        let big = Row::new(2, 2, Tag::wal_data(), vec![0u8; MAX_ROW_LEN as usize + 1]);
        let err = writer.append(&big).unwrap_err();
        assert_eq!(err.code(), crate::wal::WalErrorCode::WalRowTooLarge);
        assert!(!err.is_fatal());
        assert_eq!(writer.last_lsn(), 1);

        // The LSN was not consumed
        writer.append(&row(2, 2)).unwrap();
        drop(writer);
        let lsns: Vec<u64> = wal.read_all().unwrap().iter().map(|r| r.lsn).collect();
        assert_eq!(lsns, vec![1, 2]);
    }

    #[test]
    fn test_partial_write_is_cut_back() {
        let dir = tempfile::TempDir::new().unwrap();
        let wal = WalDir::open(dir.path()).unwrap();
        let mut writer = SegmentWriter::open(wal.clone(), 10).unwrap();
        writer.append(&row(1, 1)).unwrap();

        let segment = writer.current.as_mut().unwrap();
        segment.file.write_all(&ROW_MARKER.to_le_bytes()).unwrap();
        segment.file.write_all(b"half a row").unwrap();
        segment.rollback().unwrap();

        writer.append(&row(2, 2)).unwrap();
        drop(writer);
        let lsns: Vec<u64> = wal.read_all().unwrap().iter().map(|r| r.lsn).collect();
        assert_eq!(lsns, vec![1, 2]);
    }

    #[test]
    fn test_failed_write_poisons_writer() {
        let dir = tempfile::TempDir::new().unwrap();
        let wal = WalDir::open(dir.path()).unwrap();
        let mut writer = SegmentWriter::open(wal.clone(), 10).unwrap();
        writer.append(&row(1, 1)).unwrap();

        // A read-only handle fails the write and the truncate alike
        let segment = writer.current.as_mut().unwrap();
        segment.file = File::open(&segment.path).unwrap();

        let err = writer.append(&row(2, 2)).unwrap_err();
        assert!(err.is_fatal());
        assert!(writer.is_poisoned());
        assert_eq!(writer.last_lsn(), 1);

        let err = writer.append(&row(3, 3)).unwrap_err();
        assert_eq!(err.code(), crate::wal::WalErrorCode::WalWriterPoisoned);
        drop(writer);

        // The durable prefix still reads back, and a reopened writer
        // continues after it in a fresh segment
        let lsns: Vec<u64> = wal.read_all().unwrap().iter().map(|r| r.lsn).collect();
        assert_eq!(lsns, vec![1]);
        let mut writer = SegmentWriter::open(wal.clone(), 10).unwrap();
        writer.append(&row(2, 2)).unwrap();
        drop(writer);
        assert_eq!(wal.read_all().unwrap().len(), 2);
    }

    #[test]
    fn test_lsn_gaps_allowed() {
        let dir = tempfile::TempDir::new().unwrap();
        let wal = WalDir::open(dir.path()).unwrap();
        let mut writer = SegmentWriter::open(wal.clone(), 10).unwrap();
        writer.append(&row(1, 1)).unwrap();
        writer.append(&row(4, 4)).unwrap();
        drop(writer);

        let lsns: Vec<u64> = wal.read_all().unwrap().iter().map(|r| r.lsn).collect();
        assert_eq!(lsns, vec![1, 4]);
    }

    #[test]
    fn test_read_after_scn_skips_and_limits() {
        let dir = tempfile::TempDir::new().unwrap();
        let wal = WalDir::open(dir.path()).unwrap();
        let mut writer = SegmentWriter::open(wal.clone(), 3).unwrap();
        for i in 1..=10 {
            writer.append(&row(i, i)).unwrap();
        }

        let scns: Vec<u64> = wal
            .read_after_scn(4, 9, 3)
            .unwrap()
            .iter()
            .map(|r| r.scn)
            .collect();
        assert_eq!(scns, vec![5, 6, 7]);

        let tail: Vec<u64> = wal
            .read_after_scn(7, 9, 100)
            .unwrap()
            .iter()
            .map(|r| r.scn)
            .collect();
        assert_eq!(tail, vec![8, 9]);
    }
}
