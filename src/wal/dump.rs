//! Read-only textual dump of log segments

use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};

use super::command::decode_command;
use super::errors::{WalError, WalResult};
use super::reader::SegmentReader;
use super::row::Row;

/// One line per row: `lsn:<n> scn:<n> tm:<time> t:<tag> <body>`.
///
/// The body is the decoded command for recognized data rows, otherwise
/// the payload length and bytes in hex.
pub fn format_row(row: &Row) -> String {
    let secs = row.timestamp.trunc() as i64;
    let nanos = (row.timestamp.fract() * 1e9) as u32;
    let tm = DateTime::<Utc>::from_timestamp(secs, nanos)
        .map(|t| t.format("%Y-%m-%dT%H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| format!("{:.3}", row.timestamp));

    let body = match decode_command(row.tag, &row.data) {
        Some(cmd) => cmd.to_string(),
        None => {
            let mut hex = String::with_capacity(row.data.len() * 2);
            for b in row.data.iter() {
                hex.push_str(&format!("{:02x}", b));
            }
            format!("len:{} {}", row.len(), hex)
        }
    };

    format!(
        "lsn:{} scn:{} tm:{} t:{} {}",
        row.lsn, row.scn, tm, row.tag, body
    )
}

/// Prints every row of the segment at `path`. Returns the row count.
pub fn dump_segment<W: Write>(path: &Path, out: &mut W) -> WalResult<usize> {
    let mut reader = SegmentReader::open(path)?;
    let mut count = 0;
    while let Some(row) = reader.read_next()? {
        writeln!(out, "{}", format_row(&row))
            .map_err(|e| WalError::append_failed("Failed to write dump output", e))?;
        count += 1;
    }
    Ok(count)
}
