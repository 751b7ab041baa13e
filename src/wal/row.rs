//! WAL row envelope
//!
//! Each row is a fixed 46-byte header followed by the payload:
//!
//! | offset | field        | type    |
//! |--------|--------------|---------|
//! | 0      | `header_crc` | u32 LE  |
//! | 4      | `lsn`        | u64 LE  |
//! | 12     | `scn`        | u64 LE  |
//! | 20     | `tag`        | u16 LE  |
//! | 22     | `cookie`     | u64 LE  |
//! | 30     | `tm`         | f64 LE  |
//! | 38     | `len`        | u32 LE  |
//! | 42     | `data_crc`   | u32 LE  |
//! | 46     | `data`       | `len` bytes |
//!
//! `header_crc` covers bytes 4..46, `data_crc` covers the payload. The
//! header alone tells a receiver how many bytes follow, so rows can be
//! streamed back to back without any extra framing.

use bytes::Bytes;
use chrono::Utc;
use thiserror::Error;

use super::checksum::{compute_checksum, verify_checksum};
use super::tag::{InvalidTag, Tag};

/// Size of the fixed row header
pub const ROW_HEADER_LEN: usize = 46;

/// Largest payload a decoder will accept
pub const MAX_ROW_LEN: u32 = 16 * 1024 * 1024;

/// Fails for a payload no decoder would accept.
///
/// Writers check this before anything reaches a segment or a socket: a row
/// that cannot be read back must never be acknowledged.
pub fn check_payload_len(len: usize) -> Result<(), CodecError> {
    if len > MAX_ROW_LEN as usize {
        return Err(CodecError::RowTooLarge {
            len: len.min(u32::MAX as usize) as u32,
            max: MAX_ROW_LEN,
        });
    }
    Ok(())
}

/// Row decoding failures. All of them mean the byte stream can no longer
/// be trusted from this point on.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodecError {
    #[error("row truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("row header checksum mismatch: stored {stored:08x}, computed {computed:08x}")]
    HeaderChecksum { stored: u32, computed: u32 },

    #[error("row data checksum mismatch at lsn {lsn}: stored {stored:08x}, computed {computed:08x}")]
    DataChecksum { lsn: u64, stored: u32, computed: u32 },

    #[error("row payload of {len} bytes exceeds limit of {max}")]
    RowTooLarge { len: u32, max: u32 },

    #[error(transparent)]
    InvalidTag(#[from] InvalidTag),
}

/// One replicated log entry
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Position in the writer's own log
    pub lsn: u64,
    /// Cluster wide state change number
    pub scn: u64,
    pub tag: Tag,
    /// Origin cookie, carried unchanged
    pub cookie: u64,
    /// Seconds since the epoch; advisory only
    pub timestamp: f64,
    pub data: Bytes,
}

/// Decoded and checksum-verified row header
#[derive(Debug, Clone, PartialEq)]
pub struct RowHeader {
    pub lsn: u64,
    pub scn: u64,
    pub tag: Tag,
    pub cookie: u64,
    pub timestamp: f64,
    pub len: u32,
    pub data_crc: u32,
}

/// Current wall clock as row timestamp
pub fn now_timestamp() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

fn read_u16(buf: &[u8], at: usize) -> u16 {
    let mut b = [0u8; 2];
    b.copy_from_slice(&buf[at..at + 2]);
    u16::from_le_bytes(b)
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(b)
}

fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(b)
}

impl RowHeader {
    /// Decodes a header, verifying its checksum, tag and length limit.
    pub fn decode(buf: &[u8; ROW_HEADER_LEN]) -> Result<Self, CodecError> {
        let stored = read_u32(buf, 0);
        if !verify_checksum(&buf[4..], stored) {
            return Err(CodecError::HeaderChecksum {
                stored,
                computed: compute_checksum(&buf[4..]),
            });
        }

        let len = read_u32(buf, 38);
        check_payload_len(len as usize)?;

        Ok(Self {
            lsn: read_u64(buf, 4),
            scn: read_u64(buf, 12),
            tag: Tag::from_u16(read_u16(buf, 20))?,
            cookie: read_u64(buf, 22),
            timestamp: f64::from_bits(read_u64(buf, 30)),
            len,
            data_crc: read_u32(buf, 42),
        })
    }

    /// Checks `data` against the header and builds the row.
    pub fn into_row(self, data: Bytes) -> Result<Row, CodecError> {
        if !verify_checksum(&data, self.data_crc) {
            return Err(CodecError::DataChecksum {
                lsn: self.lsn,
                stored: self.data_crc,
                computed: compute_checksum(&data),
            });
        }
        Ok(Row {
            lsn: self.lsn,
            scn: self.scn,
            tag: self.tag,
            cookie: self.cookie,
            timestamp: self.timestamp,
            data,
        })
    }
}

impl Row {
    /// Creates a row stamped with the current time.
    pub fn new(lsn: u64, scn: u64, tag: Tag, data: impl Into<Bytes>) -> Self {
        Self {
            lsn,
            scn,
            tag,
            cookie: 0,
            timestamp: now_timestamp(),
            data: data.into(),
        }
    }

    /// Payload length in bytes
    pub fn len(&self) -> u32 {
        self.data.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Fails if the payload is too large to ever be decoded.
    pub fn check_len(&self) -> Result<(), CodecError> {
        check_payload_len(self.data.len())
    }

    /// Same row with a replaced payload. Everything else is preserved.
    pub fn with_data(&self, data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            ..self.clone()
        }
    }

    /// Same row stored at a different local position.
    pub fn with_lsn(&self, lsn: u64) -> Self {
        Self {
            lsn,
            ..self.clone()
        }
    }

    /// Size of the encoded row
    pub fn encoded_len(&self) -> usize {
        ROW_HEADER_LEN + self.data.len()
    }

    /// Encodes the row, header checksums included.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf
    }

    /// Appends the encoded row to `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        let start = buf.len();
        buf.extend_from_slice(&[0u8; 4]);
        buf.extend_from_slice(&self.lsn.to_le_bytes());
        buf.extend_from_slice(&self.scn.to_le_bytes());
        buf.extend_from_slice(&self.tag.as_u16().to_le_bytes());
        buf.extend_from_slice(&self.cookie.to_le_bytes());
        buf.extend_from_slice(&self.timestamp.to_bits().to_le_bytes());
        buf.extend_from_slice(&self.len().to_le_bytes());
        buf.extend_from_slice(&compute_checksum(&self.data).to_le_bytes());

        let header_crc = compute_checksum(&buf[start + 4..start + ROW_HEADER_LEN]);
        buf[start..start + 4].copy_from_slice(&header_crc.to_le_bytes());

        buf.extend_from_slice(&self.data);
    }

    /// Decodes one row from the front of `buf`.
    ///
    /// Returns the row and the number of bytes consumed. The payload length
    /// is checked against what is actually left in `buf` before anything is
    /// copied.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize), CodecError> {
        if buf.len() < ROW_HEADER_LEN {
            return Err(CodecError::Truncated {
                needed: ROW_HEADER_LEN,
                available: buf.len(),
            });
        }

        let mut header = [0u8; ROW_HEADER_LEN];
        header.copy_from_slice(&buf[..ROW_HEADER_LEN]);
        let header = RowHeader::decode(&header)?;

        let total = ROW_HEADER_LEN + header.len as usize;
        if buf.len() < total {
            return Err(CodecError::Truncated {
                needed: total,
                available: buf.len(),
            });
        }

        let data = Bytes::copy_from_slice(&buf[ROW_HEADER_LEN..total]);
        Ok((header.into_row(data)?, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::tag::Tag;

    fn sample_row() -> Row {
        let mut row = Row::new(7, 5, Tag::wal_data(), &b"\x0d\x00payload"[..]);
        row.cookie = 0xfeed;
        row
    }

    #[test]
    fn test_round_trip() {
        let row = sample_row();
        let bytes = row.encode();

        assert_eq!(bytes.len(), ROW_HEADER_LEN + row.data.len());

        let (decoded, consumed) = Row::decode(&bytes).unwrap();
        assert_eq!(decoded, row);
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn test_decode_back_to_back_rows() {
        let first = sample_row();
        let second = Row::new(8, 6, Tag::wal_data(), &b"second"[..]);

        let mut stream = first.encode();
        second.encode_into(&mut stream);

        let (a, used) = Row::decode(&stream).unwrap();
        let (b, rest) = Row::decode(&stream[used..]).unwrap();
        assert_eq!(a, first);
        assert_eq!(b, second);
        assert_eq!(used + rest, stream.len());
    }

    #[test]
    fn test_length_checked_before_copy() {
        let mut bytes = sample_row().encode();
        bytes.truncate(ROW_HEADER_LEN + 2);

        match Row::decode(&bytes) {
            Err(CodecError::Truncated { needed, available }) => {
                assert_eq!(available, ROW_HEADER_LEN + 2);
                assert!(needed > available);
            }
            other => panic!("expected truncation, got {:?}", other),
        }
    }

    #[test]
    fn test_oversized_length_rejected() {
        let mut bytes = sample_row().encode();
        bytes[38..42].copy_from_slice(&(MAX_ROW_LEN + 1).to_le_bytes());
        let crc = compute_checksum(&bytes[4..ROW_HEADER_LEN]);
        bytes[0..4].copy_from_slice(&crc.to_le_bytes());

        assert!(matches!(
            Row::decode(&bytes),
            Err(CodecError::RowTooLarge { .. })
        ));
    }

    #[test]
    fn test_payload_limit_is_inclusive() {
        assert!(check_payload_len(MAX_ROW_LEN as usize).is_ok());
        assert_eq!(
            check_payload_len(MAX_ROW_LEN as usize + 1),
            Err(CodecError::RowTooLarge {
                len: MAX_ROW_LEN + 1,
                max: MAX_ROW_LEN,
            })
        );
        assert!(sample_row().check_len().is_ok());
    }

    #[test]
    fn test_header_corruption_detected() {
        let mut bytes = sample_row().encode();
        bytes[12] ^= 0x01;
        assert!(matches!(
            Row::decode(&bytes),
            Err(CodecError::HeaderChecksum { .. })
        ));
    }

    #[test]
    fn test_data_corruption_detected() {
        let mut bytes = sample_row().encode();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x80;
        assert!(matches!(
            Row::decode(&bytes),
            Err(CodecError::DataChecksum { lsn: 7, .. })
        ));
    }

    #[test]
    fn test_with_data_keeps_identity() {
        let row = sample_row();
        let rewritten = row.with_data(&b"other"[..]);
        assert_eq!(rewritten.lsn, row.lsn);
        assert_eq!(rewritten.scn, row.scn);
        assert_eq!(rewritten.tag, row.tag);
        assert_eq!(rewritten.cookie, row.cookie);
        assert_eq!(rewritten.timestamp, row.timestamp);
        assert_eq!(rewritten.len(), 5);
    }
}
