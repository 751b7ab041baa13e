//! Master side of replication
//!
//! [`CommitLog`] issues SCNs and persists rows; [`FeederServer`] accepts
//! slaves and streams every row after the SCN they announce, through the
//! filter they asked for.

mod commit_log;
mod config;
mod connection;
mod errors;
mod server;

pub use commit_log::{CommitLog, SharedCommitLog};
pub use config::FeederConfig;
pub use connection::{ConnectionInfo, FeederState};
pub use errors::{FeederError, FeederResult};
pub use server::{ConnectionTableHandle, FeederServer, ShutdownHandle};
