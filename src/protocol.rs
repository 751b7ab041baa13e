//! Feeder wire protocol
//!
//! A slave opens a TCP connection and sends a 44-byte handshake:
//!
//! | offset | field    | type                     |
//! |--------|----------|--------------------------|
//! | 0      | version  | u32 LE                   |
//! | 4      | scn      | u64 LE, last applied SCN |
//! | 12     | filter   | 32 bytes, NUL padded     |
//!
//! From version 2 on it is followed by the filter type (`u32 LE`), the
//! argument length (`u32 LE`) and that many argument bytes. Version 1
//! slaves are still served, with an identity-type filter and no argument.
//!
//! The feeder answers with `version u32`, `status u32` and, for a non-zero
//! status, `len u32` plus a UTF-8 message. After an accepted handshake the
//! feeder streams encoded rows back to back until either side closes.

use std::io;

use bytes::Bytes;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::filter::{validate_filter_name, MAX_FILTER_NAME_LEN};
use crate::wal::{CodecError, Row, RowHeader, ROW_HEADER_LEN};

/// Protocol version spoken by this build
pub const PROTOCOL_VERSION: u32 = 2;

/// Oldest version a feeder still serves
pub const MIN_PROTOCOL_VERSION: u32 = 1;

/// Size of the fixed part of the handshake request
pub const HANDSHAKE_LEN: usize = 4 + 8 + MAX_FILTER_NAME_LEN;

/// Longest filter argument a version 2 handshake may carry
pub const MAX_FILTER_ARG_LEN: u32 = 4096;

/// Longest reply message accepted
pub const MAX_REPLY_MESSAGE_LEN: u32 = 1024;

/// Wire level failures
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Malformed row: {0}")]
    Codec(#[from] CodecError),

    #[error("Stream ended inside a row ({read} of {expected} bytes)")]
    TruncatedRow { read: usize, expected: usize },

    #[error("Bad handshake: {0}")]
    BadHandshake(String),

    #[error("Handshake rejected ({status:?}): {message}")]
    Rejected {
        status: HandshakeStatus,
        message: String,
    },
}

impl ProtocolError {
    /// A rejected handshake will be rejected again on retry.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProtocolError::Rejected { .. })
    }
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// How the feeder should interpret the requested filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum FilterType {
    /// A filter registered by name on the feeder
    Id = 0,
    /// A script shipped with the request; never served by this feeder
    Lua = 1,
    /// A native plugin named by the request; never served by this feeder
    C = 2,
}

impl FilterType {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(FilterType::Id),
            1 => Some(FilterType::Lua),
            2 => Some(FilterType::C),
            _ => None,
        }
    }
}

/// Slave to feeder handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub version: u32,
    /// Last SCN the slave applied; streaming resumes after it
    pub scn: u64,
    /// Filter name, empty for none
    pub filter: String,
    pub filter_type: FilterType,
    /// Opaque argument handed to the filter with every row
    pub filter_arg: Bytes,
}

impl Handshake {
    pub fn new(scn: u64, filter: &str) -> ProtocolResult<Self> {
        validate_filter_name(filter).map_err(|e| ProtocolError::BadHandshake(e.to_string()))?;
        Ok(Self {
            version: PROTOCOL_VERSION,
            scn,
            filter: filter.to_string(),
            filter_type: FilterType::Id,
            filter_arg: Bytes::new(),
        })
    }

    /// Attaches a filter argument.
    pub fn with_arg(mut self, arg: impl Into<Bytes>) -> ProtocolResult<Self> {
        let arg = arg.into();
        if arg.len() > MAX_FILTER_ARG_LEN as usize {
            return Err(ProtocolError::BadHandshake(format!(
                "filter argument of {} bytes (max: {})",
                arg.len(),
                MAX_FILTER_ARG_LEN
            )));
        }
        self.filter_arg = arg;
        Ok(self)
    }

    /// Whether a feeder of this build serves `version`.
    pub fn is_supported_version(version: u32) -> bool {
        (MIN_PROTOCOL_VERSION..=PROTOCOL_VERSION).contains(&version)
    }

    /// Encodes the request; version 1 requests carry no filter type or
    /// argument.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; HANDSHAKE_LEN];
        buf[0..4].copy_from_slice(&self.version.to_le_bytes());
        buf[4..12].copy_from_slice(&self.scn.to_le_bytes());
        let name = self.filter.as_bytes();
        let n = name.len().min(MAX_FILTER_NAME_LEN);
        buf[12..12 + n].copy_from_slice(&name[..n]);
        if self.version >= 2 {
            buf.extend_from_slice(&(self.filter_type as u32).to_le_bytes());
            buf.extend_from_slice(&(self.filter_arg.len() as u32).to_le_bytes());
            buf.extend_from_slice(&self.filter_arg);
        }
        buf
    }

    /// Decodes the fixed part of a request. The version is returned as
    /// sent; checking it is up to the feeder so that it can answer with a
    /// proper status.
    pub fn decode(buf: &[u8; HANDSHAKE_LEN]) -> ProtocolResult<Self> {
        let mut version = [0u8; 4];
        version.copy_from_slice(&buf[0..4]);
        let mut scn = [0u8; 8];
        scn.copy_from_slice(&buf[4..12]);

        let field = &buf[12..];
        let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
        if field[end..].iter().any(|&b| b != 0) {
            return Err(ProtocolError::BadHandshake(
                "filter name is not NUL padded".to_string(),
            ));
        }
        let filter = std::str::from_utf8(&field[..end])
            .map_err(|_| ProtocolError::BadHandshake("filter name is not UTF-8".to_string()))?;

        Ok(Self {
            version: u32::from_le_bytes(version),
            scn: u64::from_le_bytes(scn),
            filter: filter.to_string(),
            filter_type: FilterType::Id,
            filter_arg: Bytes::new(),
        })
    }
}

/// Handshake outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum HandshakeStatus {
    Ok = 0,
    BadVersion = 1,
    UnknownFilter = 2,
    Malformed = 3,
    /// The filter refused its argument
    BadFilterArg = 4,
}

impl HandshakeStatus {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(HandshakeStatus::Ok),
            1 => Some(HandshakeStatus::BadVersion),
            2 => Some(HandshakeStatus::UnknownFilter),
            3 => Some(HandshakeStatus::Malformed),
            4 => Some(HandshakeStatus::BadFilterArg),
            _ => None,
        }
    }
}

/// Feeder to slave handshake answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeReply {
    pub version: u32,
    pub status: HandshakeStatus,
    pub message: String,
}

impl HandshakeReply {
    pub fn accept() -> Self {
        Self {
            version: PROTOCOL_VERSION,
            status: HandshakeStatus::Ok,
            message: String::new(),
        }
    }

    pub fn reject(status: HandshakeStatus, message: impl Into<String>) -> Self {
        let mut message = message.into();
        truncate_utf8(&mut message, MAX_REPLY_MESSAGE_LEN as usize);
        Self {
            version: PROTOCOL_VERSION,
            status,
            message,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == HandshakeStatus::Ok
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(12 + self.message.len());
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(&(self.status as u32).to_le_bytes());
        if !self.is_ok() {
            buf.extend_from_slice(&(self.message.len() as u32).to_le_bytes());
            buf.extend_from_slice(self.message.as_bytes());
        }
        buf
    }
}

fn truncate_utf8(s: &mut String, max: usize) {
    if s.len() <= max {
        return;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s.truncate(end);
}

pub async fn write_handshake<W>(writer: &mut W, handshake: &Handshake) -> ProtocolResult<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&handshake.encode()).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_handshake<R>(reader: &mut R) -> ProtocolResult<Handshake>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; HANDSHAKE_LEN];
    reader.read_exact(&mut buf).await?;
    let mut handshake = Handshake::decode(&buf)?;
    // Version 1 stops here; unknown versions are refused by the feeder
    if handshake.version != PROTOCOL_VERSION {
        return Ok(handshake);
    }

    let raw_type = reader.read_u32_le().await?;
    handshake.filter_type = FilterType::from_u32(raw_type)
        .ok_or_else(|| ProtocolError::BadHandshake(format!("unknown filter type {}", raw_type)))?;
    let len = reader.read_u32_le().await?;
    if len > MAX_FILTER_ARG_LEN {
        return Err(ProtocolError::BadHandshake(format!(
            "filter argument of {} bytes (max: {})",
            len, MAX_FILTER_ARG_LEN
        )));
    }
    let mut arg = vec![0u8; len as usize];
    reader.read_exact(&mut arg).await?;
    handshake.filter_arg = Bytes::from(arg);
    Ok(handshake)
}

pub async fn write_reply<W>(writer: &mut W, reply: &HandshakeReply) -> ProtocolResult<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&reply.encode()).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_reply<R>(reader: &mut R) -> ProtocolResult<HandshakeReply>
where
    R: AsyncRead + Unpin,
{
    let version = reader.read_u32_le().await?;
    let raw_status = reader.read_u32_le().await?;
    let status = HandshakeStatus::from_u32(raw_status)
        .ok_or_else(|| ProtocolError::BadHandshake(format!("unknown status {}", raw_status)))?;

    let mut message = String::new();
    if status != HandshakeStatus::Ok {
        let len = reader.read_u32_le().await?;
        if len > MAX_REPLY_MESSAGE_LEN {
            return Err(ProtocolError::BadHandshake(format!(
                "reply message of {} bytes",
                len
            )));
        }
        let mut buf = vec![0u8; len as usize];
        reader.read_exact(&mut buf).await?;
        message = String::from_utf8_lossy(&buf).into_owned();
    }

    Ok(HandshakeReply {
        version,
        status,
        message,
    })
}

/// Reads one row. `Ok(None)` means the peer closed cleanly between rows.
pub async fn read_row<R>(reader: &mut R) -> ProtocolResult<Option<Row>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; ROW_HEADER_LEN];
    let read = read_full(reader, &mut header).await?;
    if read == 0 {
        return Ok(None);
    }
    if read < ROW_HEADER_LEN {
        return Err(ProtocolError::TruncatedRow {
            read,
            expected: ROW_HEADER_LEN,
        });
    }

    // Length is bounded by MAX_ROW_LEN before this allocation
    let header = RowHeader::decode(&header)?;
    let mut data = vec![0u8; header.len as usize];
    let read = read_full(reader, &mut data).await?;
    if read < data.len() {
        return Err(ProtocolError::TruncatedRow {
            read: ROW_HEADER_LEN + read,
            expected: ROW_HEADER_LEN + data.len(),
        });
    }
    Ok(Some(header.into_row(Bytes::from(data))?))
}

pub async fn write_row<W>(writer: &mut W, row: &Row) -> ProtocolResult<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&row.encode()).await?;
    writer.flush().await?;
    Ok(())
}

async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}
