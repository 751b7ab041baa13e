//! Slave-side continuity validation
//!
//! - A row whose SCN is at or below the last applied SCN is a duplicate
//!   and is never applied again
//! - A row whose SCN is exactly `last + 1` is in order
//! - Anything above that is a gap; rows dropped by a feeder filter show up
//!   here too, since drops are inferred from the next SCN
//!
//! Gaps are fatal when `panic_on_scn_gap` is set; otherwise they are
//! logged and the tracker moves on to the new SCN.

use serde::{Deserialize, Serialize};

use super::errors::{SequenceError, SequenceResult};
use crate::wal::{LogPosition, Row};

/// Slave continuity configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinuityPolicy {
    /// Store applied rows with local lsn equal to their scn
    pub sync_scn_with_lsn: bool,
    /// Halt on any SCN gap instead of accepting it
    pub panic_on_scn_gap: bool,
}

impl Default for ContinuityPolicy {
    fn default() -> Self {
        Self {
            sync_scn_with_lsn: false,
            panic_on_scn_gap: true,
        }
    }
}

/// Position of an incoming row relative to the applied sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuity {
    /// `scn == last + 1`
    InOrder,
    /// `scn <= last`
    Duplicate,
    /// `scn > last + 1`
    Gap { expected: u64, received: u64 },
    /// Keepalive row, carries no state
    Dummy,
}

/// What the applier should do with a row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Apply and store at `local_lsn`
    Apply { local_lsn: u64 },
    /// Do not apply
    Skip(Continuity),
}

/// Tracks the last applied SCN and local LSN of one upstream.
#[derive(Debug, Clone)]
pub struct ContinuityTracker {
    policy: ContinuityPolicy,
    last_scn: u64,
    last_lsn: u64,
}

impl ContinuityTracker {
    /// Tracker resuming from the local log's last position.
    pub fn new(policy: ContinuityPolicy, last: LogPosition) -> Self {
        Self {
            policy,
            last_scn: last.scn,
            last_lsn: last.lsn,
        }
    }

    pub fn policy(&self) -> ContinuityPolicy {
        self.policy
    }

    /// Last applied SCN; this is what a reconnect announces.
    pub fn last_scn(&self) -> u64 {
        self.last_scn
    }

    pub fn last_lsn(&self) -> u64 {
        self.last_lsn
    }

    /// Verifies the local log still tracks the SCN sequence.
    pub fn check_alignment(&self) -> SequenceResult<()> {
        if self.policy.sync_scn_with_lsn && self.last_lsn != self.last_scn {
            return Err(SequenceError::LsnMisaligned {
                lsn: self.last_lsn,
                scn: self.last_scn,
            });
        }
        Ok(())
    }

    /// Classifies a row without any policy applied.
    pub fn check(&self, row: &Row) -> Continuity {
        if row.tag.is_dummy() {
            return Continuity::Dummy;
        }
        let expected = self.last_scn + 1;
        if row.scn < expected {
            Continuity::Duplicate
        } else if row.scn == expected {
            Continuity::InOrder
        } else {
            Continuity::Gap {
                expected,
                received: row.scn,
            }
        }
    }

    /// Applies the policy to a row. Does not change the tracker.
    pub fn admit(&self, row: &Row) -> SequenceResult<Admission> {
        match self.check(row) {
            Continuity::InOrder => Ok(Admission::Apply {
                local_lsn: self.local_lsn_for(row),
            }),
            Continuity::Gap { expected, received } => {
                if self.policy.panic_on_scn_gap {
                    return Err(SequenceError::ScnGap { expected, received });
                }
                tracing::warn!(
                    expected,
                    received,
                    skipped = received - expected,
                    "scn gap accepted, replica diverges for the skipped range"
                );
                Ok(Admission::Apply {
                    local_lsn: self.local_lsn_for(row),
                })
            }
            skip => Ok(Admission::Skip(skip)),
        }
    }

    /// Records a row as applied at `local_lsn`.
    pub fn record(&mut self, scn: u64, local_lsn: u64) {
        self.last_scn = scn;
        self.last_lsn = local_lsn;
    }

    fn local_lsn_for(&self, row: &Row) -> u64 {
        if self.policy.sync_scn_with_lsn {
            row.scn
        } else {
            self.last_lsn + 1
        }
    }
}
