//! walrep - WAL row replication
//!
//! A master commits rows to a checksummed, segmented write-ahead log and
//! streams them to slaves over TCP. Each slave names a filter in its
//! handshake; the feeder runs every outgoing row through it, so one log
//! can feed replicas that each see a different projection of it.
//!
//! - [`wal`]: row envelope, command codec, segments
//! - [`sequence`]: SCN issuing and slave-side continuity
//! - [`filter`]: per-connection row filters
//! - [`protocol`]: handshake and row framing
//! - [`feeder`]: master commit log and server
//! - [`applier`]: slave applier and puller
//! - [`engine`]: apply target for accepted rows

pub mod applier;
pub mod cli;
pub mod engine;
pub mod feeder;
pub mod filter;
pub mod protocol;
pub mod sequence;
pub mod wal;
