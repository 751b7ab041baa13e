//! Sequential segment reader with strict corruption detection
//!
//! - Every row must be preceded by `ROW_MARKER`
//! - Header and payload checksums are verified
//! - LSNs must strictly increase within a segment
//! - A segment ends at `EOF_MARKER` or cleanly at a row boundary
//!
//! A row cut in the middle is corruption, never silently skipped.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use bytes::Bytes;

use super::errors::{WalError, WalResult};
use super::row::{Row, RowHeader, ROW_HEADER_LEN};
use super::segment::{is_not_found, EOF_MARKER, ROW_MARKER, SEGMENT_HEADER};

/// Reader over one segment file.
pub struct SegmentReader {
    path: PathBuf,
    reader: BufReader<File>,
    offset: u64,
    last_lsn: u64,
    closed: bool,
}

impl SegmentReader {
    /// Opens a segment and validates its header.
    pub fn open(path: &Path) -> WalResult<Self> {
        let file = File::open(path).map_err(|e| {
            if is_not_found(&e) {
                WalError::corruption(format!("Segment not found: {}", path.display()))
            } else {
                WalError::corruption(format!(
                    "Failed to open segment {}: {}",
                    path.display(),
                    e
                ))
            }
        })?;
        let mut reader = BufReader::new(file);

        let mut header = vec![0u8; SEGMENT_HEADER.len()];
        reader.read_exact(&mut header).map_err(|e| {
            WalError::corruption_in(path, 0, format!("Failed to read segment header: {}", e))
        })?;
        if header != SEGMENT_HEADER {
            return Err(WalError::corruption_in(path, 0, "Bad segment header"));
        }

        Ok(Self {
            path: path.to_path_buf(),
            reader,
            offset: SEGMENT_HEADER.len() as u64,
            last_lsn: 0,
            closed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True once the EOF marker has been read.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Reads the next row.
    ///
    /// Returns `Ok(None)` at the EOF marker or at a clean end of file.
    pub fn read_next(&mut self) -> WalResult<Option<Row>> {
        if self.closed {
            return Ok(None);
        }

        let marker = match self.read_marker()? {
            Some(marker) => marker,
            None => return Ok(None),
        };
        if marker == EOF_MARKER {
            self.closed = true;
            return Ok(None);
        }
        if marker != ROW_MARKER {
            return Err(WalError::corruption_in(
                &self.path,
                self.offset,
                format!("Bad row marker {:08x}", marker),
            ));
        }
        let row_offset = self.offset + 4;

        let mut header = [0u8; ROW_HEADER_LEN];
        self.reader.read_exact(&mut header).map_err(|e| {
            let reason = format!("Truncated row header: {}", e);
            WalError::corruption_in(&self.path, row_offset, reason)
        })?;
        let header = RowHeader::decode(&header)
            .map_err(|e| WalError::corruption_in(&self.path, row_offset, e.to_string()))?;

        let mut data = vec![0u8; header.len as usize];
        self.reader.read_exact(&mut data).map_err(|e| {
            let reason = format!("Truncated row data: {}", e);
            WalError::corruption_in(&self.path, row_offset, reason)
        })?;
        let row = header
            .into_row(Bytes::from(data))
            .map_err(|e| WalError::corruption_in(&self.path, row_offset, e.to_string()))?;

        if self.last_lsn != 0 && row.lsn <= self.last_lsn {
            return Err(WalError::corruption_in(
                &self.path,
                row_offset,
                format!("Non-increasing lsn {} after {}", row.lsn, self.last_lsn),
            ));
        }

        self.offset = row_offset + row.encoded_len() as u64;
        self.last_lsn = row.lsn;
        Ok(Some(row))
    }

    /// Reads every remaining row.
    pub fn read_all(&mut self) -> WalResult<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.read_next()? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Reads a marker; `None` if the file ends exactly here.
    fn read_marker(&mut self) -> WalResult<Option<u32>> {
        let mut buf = [0u8; 4];
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) if filled == 0 => return Ok(None),
                Ok(0) => {
                    return Err(WalError::corruption_in(
                        &self.path,
                        self.offset,
                        "Truncated row marker",
                    ))
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(WalError::corruption_in(
                        &self.path,
                        self.offset,
                        format!("Failed to read row marker: {}", e),
                    ))
                }
            }
        }
        Ok(Some(u32::from_le_bytes(buf)))
    }
}
