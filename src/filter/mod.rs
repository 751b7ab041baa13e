//! Replication filters
//!
//! A slave names a filter in its handshake; the feeder runs every outgoing
//! row through it. A filter may pass, drop or rewrite a row. Rewrites keep
//! the row header, so SCN and LSN never change on the way out.

mod builtin;
mod decision;
mod errors;
mod registry;
mod runtime;

pub use builtin::{IdentityFilter, ParityDeltaFilter, SpaceFilter};
pub use decision::{FilterDecision, FilterOutcome, FilterRow};
pub use errors::{validate_filter_name, FilterError, FilterResult, MAX_FILTER_NAME_LEN};
pub use registry::{FilterRegistry, FilterSpec, RowFilter};
pub use runtime::apply_filter;
