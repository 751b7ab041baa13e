//! Filter invocation
//!
//! A failing filter never takes the connection down: an error, a panic or
//! a rewrite too large to be decoded is logged and the row is sent
//! unchanged.

use std::panic::{catch_unwind, AssertUnwindSafe};

use super::decision::{FilterDecision, FilterOutcome, FilterRow};
use super::registry::RowFilter;
use crate::wal::Row;

/// Runs `filter` on `row` with the slave's argument and resolves the
/// decision.
pub fn apply_filter(filter: &dyn RowFilter, row: &Row, arg: &[u8]) -> FilterOutcome {
    let view = FilterRow::with_arg(row, arg);
    let decision = match catch_unwind(AssertUnwindSafe(|| filter.filter(&view))) {
        Ok(Ok(decision)) => decision,
        Ok(Err(err)) => {
            tracing::warn!(lsn = row.lsn, scn = row.scn, error = %err, "filter failed, passing row");
            FilterDecision::Pass
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::warn!(lsn = row.lsn, scn = row.scn, panic = %message, "filter panicked, passing row");
            FilterDecision::Pass
        }
    };
    match decision.resolve(row) {
        FilterOutcome::Send(rewritten) if rewritten.check_len().is_err() => {
            tracing::warn!(
                lsn = row.lsn,
                scn = row.scn,
                len = rewritten.data.len(),
                "filter rewrite too large, passing row"
            );
            FilterOutcome::Send(row.clone())
        }
        outcome => outcome,
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
