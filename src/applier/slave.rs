//! Slave row application
//!
//! Rows from one upstream are applied strictly in arrival order:
//!
//! 1. continuity check against the last applied SCN
//! 2. apply to the engine
//! 3. append to the local log (fsync)
//! 4. advance `last_applied`
//!
//! The local log doubles as the applier's recovery source: reopening
//! replays it into the engine and resumes from its last SCN, so a
//! reconnect never applies a row twice.

use std::path::Path;

use super::errors::{ApplierError, ApplierResult, HaltReason};
use crate::engine::Engine;
use crate::sequence::{Admission, Continuity, ContinuityPolicy, ContinuityTracker, SequenceError};
use crate::wal::{LogPosition, Row, SegmentWriter, WalDir};

/// What happened to one incoming row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied { scn: u64, local_lsn: u64 },
    Skipped(Continuity),
}

/// Applies replicated rows to an engine and a local log.
pub struct SlaveApplier<E: Engine> {
    engine: E,
    writer: SegmentWriter,
    tracker: ContinuityTracker,
    halted: Option<HaltReason>,
}

impl<E: Engine> SlaveApplier<E> {
    /// Opens the local log under `data_dir` and replays it into `engine`.
    pub fn open(
        data_dir: &Path,
        rows_per_segment: usize,
        mut engine: E,
        policy: ContinuityPolicy,
    ) -> ApplierResult<Self> {
        let dir = WalDir::open(data_dir)?;

        let mut recovered = 0usize;
        for row in dir.read_all()? {
            engine
                .apply(&row)
                .map_err(|source| ApplierError::Engine {
                    scn: row.scn,
                    source,
                })?;
            recovered += 1;
        }

        let writer = SegmentWriter::open(dir, rows_per_segment)?;
        let position = LogPosition {
            lsn: writer.last_lsn(),
            scn: writer.last_scn(),
        };
        let tracker = ContinuityTracker::new(policy, position);
        tracker.check_alignment()?;

        tracing::info!(
            recovered,
            last_lsn = position.lsn,
            last_scn = position.scn,
            "slave log recovered"
        );

        Ok(Self {
            engine,
            writer,
            tracker,
            halted: None,
        })
    }

    /// Last applied SCN, announced on every (re)connect.
    pub fn last_applied(&self) -> u64 {
        self.tracker.last_scn()
    }

    pub fn last_lsn(&self) -> u64 {
        self.tracker.last_lsn()
    }

    pub fn policy(&self) -> ContinuityPolicy {
        self.tracker.policy()
    }

    pub fn halt_reason(&self) -> Option<HaltReason> {
        self.halted
    }

    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn into_engine(self) -> E {
        self.engine
    }

    /// Applies one row. Any error halts the applier for good.
    pub fn apply(&mut self, row: &Row) -> ApplierResult<ApplyOutcome> {
        if let Some(reason) = self.halted {
            return Err(ApplierError::Halted(reason));
        }

        let local_lsn = match self.tracker.admit(row) {
            Ok(Admission::Apply { local_lsn }) => local_lsn,
            Ok(Admission::Skip(continuity)) => {
                if continuity == Continuity::Duplicate {
                    tracing::debug!(scn = row.scn, last = self.last_applied(), "duplicate row skipped");
                }
                return Ok(ApplyOutcome::Skipped(continuity));
            }
            Err(e) => return Err(self.halt(sequence_halt(&e), e.into())),
        };

        if let Err(source) = self.engine.apply(row) {
            let reason = HaltReason::EngineFailure { scn: row.scn };
            return Err(self.halt(reason, ApplierError::Engine { scn: row.scn, source }));
        }

        if let Err(e) = self.writer.append(&row.with_lsn(local_lsn)) {
            let reason = HaltReason::LocalLogFailure { scn: row.scn };
            return Err(self.halt(reason, e.into()));
        }

        self.tracker.record(row.scn, local_lsn);
        tracing::trace!(scn = row.scn, local_lsn, "row applied");
        Ok(ApplyOutcome::Applied {
            scn: row.scn,
            local_lsn,
        })
    }

    /// Closes the current local segment.
    pub fn close(&mut self) -> ApplierResult<()> {
        self.writer.close()?;
        Ok(())
    }

    fn halt(&mut self, reason: HaltReason, error: ApplierError) -> ApplierError {
        tracing::error!(%reason, error = %error, "slave applier halted");
        self.halted = Some(reason);
        error
    }
}

fn sequence_halt(e: &SequenceError) -> HaltReason {
    match *e {
        SequenceError::ScnGap { expected, received } => HaltReason::ScnGap { expected, received },
        SequenceError::LsnMisaligned { lsn, scn } => HaltReason::LsnMisaligned { lsn, scn },
        SequenceError::ScnOutOfOrder { scn, last } => HaltReason::ScnGap {
            expected: last + 1,
            received: scn,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemoryEngine;
    use crate::wal::{Command, Tag, Tuple};
    use tempfile::TempDir;

    fn insert_row(scn: u64, key: u32) -> Row {
        let cmd = Command::Insert {
            space: 0,
            flags: 0,
            tuple: Tuple::from_u32s(&[key, key]),
        };
        Row::new(scn, scn, Tag::wal_data(), cmd.encode())
    }

    fn policy(sync: bool, panic: bool) -> ContinuityPolicy {
        ContinuityPolicy {
            sync_scn_with_lsn: sync,
            panic_on_scn_gap: panic,
        }
    }

    fn open(dir: &TempDir, p: ContinuityPolicy) -> SlaveApplier<MemoryEngine> {
        SlaveApplier::open(dir.path(), 100, MemoryEngine::new(), p).unwrap()
    }

    #[test]
    fn test_applies_in_order_rows() {
        let dir = TempDir::new().unwrap();
        let mut applier = open(&dir, policy(false, true));
        for scn in 1..=3 {
            let outcome = applier.apply(&insert_row(scn, scn as u32)).unwrap();
            assert_eq!(outcome, ApplyOutcome::Applied { scn, local_lsn: scn });
        }
        assert_eq!(applier.last_applied(), 3);
        assert_eq!(applier.engine().count(0), 3);
    }

    #[test]
    fn test_duplicates_are_not_reapplied() {
        let dir = TempDir::new().unwrap();
        let mut applier = open(&dir, policy(false, true));
        applier.apply(&insert_row(1, 1)).unwrap();
        applier.apply(&insert_row(2, 2)).unwrap();

        assert_eq!(
            applier.apply(&insert_row(2, 2)).unwrap(),
            ApplyOutcome::Skipped(Continuity::Duplicate)
        );
        assert_eq!(applier.engine().applied(), 2);
    }

    #[test]
    fn test_fatal_gap_halts() {
        let dir = TempDir::new().unwrap();
        let mut applier = open(&dir, policy(false, true));
        applier.apply(&insert_row(1, 1)).unwrap();

        let err = applier.apply(&insert_row(3, 3)).unwrap_err();
        assert!(matches!(err, ApplierError::Sequence(SequenceError::ScnGap { .. })));
        assert_eq!(applier.last_applied(), 1);
        assert_eq!(
            applier.halt_reason(),
            Some(HaltReason::ScnGap {
                expected: 2,
                received: 3
            })
        );

        // Even the row that would have been next is refused now
        assert!(matches!(
            applier.apply(&insert_row(2, 2)),
            Err(ApplierError::Halted(_))
        ));
    }

    #[test]
    fn test_tolerated_gap_with_sync_lsn() {
        let dir = TempDir::new().unwrap();
        let mut applier = open(&dir, policy(true, false));
        applier.apply(&insert_row(1, 1)).unwrap();
        let outcome = applier.apply(&insert_row(3, 3)).unwrap();
        assert_eq!(outcome, ApplyOutcome::Applied { scn: 3, local_lsn: 3 });
        assert_eq!(applier.last_lsn(), 3);
    }

    #[test]
    fn test_reopen_recovers_engine_and_position() {
        let dir = TempDir::new().unwrap();
        {
            let mut applier = open(&dir, policy(false, false));
            applier.apply(&insert_row(1, 1)).unwrap();
            applier.apply(&insert_row(3, 3)).unwrap();
            applier.close().unwrap();
        }

        let mut applier = open(&dir, policy(false, false));
        assert_eq!(applier.last_applied(), 3);
        assert_eq!(applier.last_lsn(), 2);
        assert!(applier.engine().select(0, &1u32.to_le_bytes()).is_some());
        assert!(applier.engine().select(0, &3u32.to_le_bytes()).is_some());

        assert_eq!(
            applier.apply(&insert_row(3, 3)).unwrap(),
            ApplyOutcome::Skipped(Continuity::Duplicate)
        );
    }

    #[test]
    fn test_misaligned_log_is_rejected_with_sync_lsn() {
        let dir = TempDir::new().unwrap();
        {
            let mut applier = open(&dir, policy(false, false));
            applier.apply(&insert_row(1, 1)).unwrap();
            applier.apply(&insert_row(5, 5)).unwrap();
        }
        let err = SlaveApplier::open(dir.path(), 100, MemoryEngine::new(), policy(true, false))
            .err()
            .unwrap();
        assert!(matches!(
            err,
            ApplierError::Sequence(SequenceError::LsnMisaligned { lsn: 2, scn: 5 })
        ));
    }

    #[test]
    fn test_opaque_row_advances_and_is_logged() {
        let dir = TempDir::new().unwrap();
        let mut applier = open(&dir, policy(false, true));
        applier.apply(&insert_row(1, 1)).unwrap();

        let opaque = Row::new(2, 2, Tag::wal_data(), &b"\xff\xff\xff"[..]);
        assert_eq!(
            applier.apply(&opaque).unwrap(),
            ApplyOutcome::Applied { scn: 2, local_lsn: 2 }
        );
        applier.apply(&insert_row(3, 3)).unwrap();
        assert_eq!(applier.last_applied(), 3);
        assert_eq!(applier.engine().count(0), 2);
        drop(applier);

        // The opaque row is kept in the local log and replays cleanly
        let reopened = open(&dir, policy(false, true));
        assert_eq!(reopened.last_applied(), 3);
        assert_eq!(reopened.engine().count(0), 2);
    }

    #[test]
    fn test_keepalives_are_ignored() {
        let dir = TempDir::new().unwrap();
        let mut applier = open(&dir, policy(false, true));
        let keepalive = Row::new(0, 7, Tag::wal_final(), &b""[..]);
        assert_eq!(
            applier.apply(&keepalive).unwrap(),
            ApplyOutcome::Skipped(Continuity::Dummy)
        );
        assert_eq!(applier.last_applied(), 0);
    }
}
