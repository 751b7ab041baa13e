//! Slave side of replication
//!
//! [`Puller`] owns the connection to the feeder; [`SlaveApplier`] owns the
//! continuity rules, the engine and the local log. Each upstream gets its
//! own pair.

mod config;
mod errors;
mod puller;
mod slave;

pub use config::SlaveConfig;
pub use errors::{ApplierError, ApplierResult, HaltReason};
pub use puller::{Puller, PullerShutdown};
pub use slave::{ApplyOutcome, SlaveApplier};
