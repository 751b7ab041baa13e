//! Sequence tracking
//!
//! Two identifiers travel with every row:
//! - SCN: cluster wide, issued once per committed row by the master
//! - LSN: position in a node's own log
//!
//! The master owns an [`ScnCounter`]; each slave upstream owns a
//! [`ContinuityTracker`]. Independent upstreams never share a tracker.

mod continuity;
mod errors;
mod scn;

pub use continuity::{Admission, Continuity, ContinuityPolicy, ContinuityTracker};
pub use errors::{SequenceError, SequenceResult};
pub use scn::ScnCounter;
