//! Master-side SCN counter
//!
//! The counter starts above the highest SCN found in the durable log and
//! is only ever advanced by one. A proposed SCN becomes issued through
//! [`ScnCounter::confirm`] once its row is durable, so a failed write does
//! not burn a number.

use std::sync::atomic::{AtomicU64, Ordering};

use super::errors::{SequenceError, SequenceResult};

#[derive(Debug)]
pub struct ScnCounter {
    last: AtomicU64,
}

impl ScnCounter {
    /// Counter whose next SCN is `durable_scn + 1`.
    pub fn starting_after(durable_scn: u64) -> Self {
        Self {
            last: AtomicU64::new(durable_scn),
        }
    }

    /// Last issued SCN, zero if none.
    pub fn last(&self) -> u64 {
        self.last.load(Ordering::Acquire)
    }

    /// SCN the next committed row will carry.
    pub fn next(&self) -> u64 {
        self.last() + 1
    }

    /// Publishes `scn` as issued. It must be exactly `last + 1`.
    pub fn confirm(&self, scn: u64) -> SequenceResult<()> {
        let expected = scn.wrapping_sub(1);
        self.last
            .compare_exchange(expected, scn, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|last| SequenceError::ScnOutOfOrder { scn, last })
    }
}
