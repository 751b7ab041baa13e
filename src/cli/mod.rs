//! CLI module for walrep
//!
//! Provides command-line interface for:
//! - feeder: commit commands from stdin and serve slaves
//! - slave: replicate from a feeder
//! - cat: dump a log segment

mod args;
mod commands;
mod config;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{cat, feeder, run, run_command, slave};
pub use config::Config;
pub use errors::{CliError, CliErrorCode, CliResult};
pub use io::{parse_request, FieldValue, Request};
