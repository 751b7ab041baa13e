//! Write-ahead log rows and segments
//!
//! The WAL is the durable, ordered record of committed operations. Both
//! replication and local recovery are derived from it.
//!
//! # Invariants
//!
//! - Rows are checksummed (header and payload separately)
//! - LSNs strictly increase in persistence order
//! - A row is reported durable only after fsync
//! - Corruption is never skipped or repaired
//! - Command payloads that decode re-encode byte-identically

mod checksum;
mod command;
mod dump;
mod errors;
mod reader;
mod row;
mod segment;
mod tag;
mod writer;

pub use checksum::{compute_checksum, verify_checksum};
pub use command::{
    decode_command, decode_number, write_field, write_varint32, Command, Mutation, OpCode, Tuple,
    UpdateOperator,
};
pub(crate) use command::Cursor;
pub use dump::{dump_segment, format_row};
pub use errors::{SegmentPosition, Severity, WalError, WalErrorCode, WalResult};
pub use reader::SegmentReader;
pub use row::{
    check_payload_len, now_timestamp, CodecError, Row, RowHeader, MAX_ROW_LEN, ROW_HEADER_LEN,
};
pub use segment::{
    parse_segment_file_name, segment_file_name, LogPosition, SegmentInfo, WalDir, EOF_MARKER,
    ROW_MARKER, SEGMENT_HEADER,
};
pub use tag::{EngineTag, InvalidTag, Tag, TagCode, TagKind, TAG_MASK, USER_TAG_MIN};
pub use writer::SegmentWriter;
