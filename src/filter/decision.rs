//! Filter inputs and outputs

use std::cell::OnceCell;
use std::fmt;

use bytes::Bytes;

use crate::wal::{decode_command, Command, Row};

/// A row as presented to a filter.
///
/// The command is decoded on first access and cached, so filters that only
/// look at the header never pay for parsing.
pub struct FilterRow<'a> {
    row: &'a Row,
    arg: &'a [u8],
    command: OnceCell<Option<Command>>,
}

impl<'a> FilterRow<'a> {
    pub fn new(row: &'a Row) -> Self {
        Self::with_arg(row, &[])
    }

    /// A row together with the argument the slave sent in its handshake.
    pub fn with_arg(row: &'a Row, arg: &'a [u8]) -> Self {
        Self {
            row,
            arg,
            command: OnceCell::new(),
        }
    }

    /// Filter argument, empty when the slave sent none
    pub fn arg(&self) -> &[u8] {
        self.arg
    }

    pub fn row(&self) -> &Row {
        self.row
    }

    pub fn scn(&self) -> u64 {
        self.row.scn
    }

    /// Decoded command, `None` for opaque or non-data rows.
    pub fn command(&self) -> Option<&Command> {
        self.command
            .get_or_init(|| decode_command(self.row.tag, &self.row.data))
            .as_ref()
    }
}

impl fmt::Debug for FilterRow<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterRow")
            .field("lsn", &self.row.lsn)
            .field("scn", &self.row.scn)
            .field("tag", &self.row.tag)
            .finish()
    }
}

/// What a filter decided for one row
#[derive(Debug, Clone, PartialEq)]
pub enum FilterDecision {
    /// Do not send
    Drop,
    /// Send unchanged
    Pass,
    /// Send with the command replaced
    Rewrite(Command),
    /// Send with the raw payload replaced
    RewriteData(Bytes),
}

/// What the feeder does with a row after filtering
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOutcome {
    Send(Row),
    Drop,
}

impl FilterOutcome {
    pub fn is_drop(&self) -> bool {
        matches!(self, FilterOutcome::Drop)
    }
}

impl FilterDecision {
    /// Resolves the decision against the original row. Header fields
    /// (lsn, scn, tag, cookie, timestamp) are always preserved.
    pub fn resolve(self, row: &Row) -> FilterOutcome {
        match self {
            FilterDecision::Drop => FilterOutcome::Drop,
            FilterDecision::Pass => FilterOutcome::Send(row.clone()),
            FilterDecision::Rewrite(command) => FilterOutcome::Send(row.with_data(command.encode())),
            FilterDecision::RewriteData(data) => FilterOutcome::Send(row.with_data(data)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::{Tag, Tuple};

    fn insert_row(scn: u64) -> Row {
        let cmd = Command::Insert {
            space: 0,
            flags: 0,
            tuple: Tuple::from_u32s(&[1, 2]),
        };
        Row::new(scn, scn, Tag::wal_data(), cmd.encode())
    }

    #[test]
    fn test_command_is_decoded_lazily_once() {
        let row = insert_row(3);
        let fr = FilterRow::new(&row);
        assert!(fr.command.get().is_none());
        assert!(matches!(fr.command(), Some(Command::Insert { .. })));
        assert!(fr.command.get().is_some());
    }

    #[test]
    fn test_opaque_payload_has_no_command() {
        let row = Row::new(1, 1, Tag::wal_data(), &b"\xff\xff"[..]);
        assert_eq!(FilterRow::new(&row).command(), None);
    }

    #[test]
    fn test_rewrite_preserves_header() {
        let row = insert_row(9);
        let replacement = Command::Delete {
            space: 0,
            flags: 0,
            key: Tuple::from_u32s(&[1]),
        };
        match FilterDecision::Rewrite(replacement.clone()).resolve(&row) {
            FilterOutcome::Send(sent) => {
                assert_eq!(sent.scn, 9);
                assert_eq!(sent.lsn, row.lsn);
                assert_eq!(sent.tag, row.tag);
                assert_eq!(sent.timestamp, row.timestamp);
                assert_eq!(Command::decode(&sent.data), Some(replacement));
            }
            FilterOutcome::Drop => panic!("rewrite must send"),
        }
        assert!(FilterDecision::Drop.resolve(&row).is_drop());
    }
}
