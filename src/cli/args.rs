//! CLI argument definitions using clap
//!
//! Commands:
//! - walrep feeder --config <path>
//! - walrep slave --config <path>
//! - walrep cat <segment>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// walrep - WAL streaming replication with per-slave row filters
#[derive(Parser, Debug)]
#[command(name = "walrep")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a master: commit JSON commands from stdin and serve slaves
    Feeder {
        /// Path to configuration file
        #[arg(long, default_value = "./walrep.json")]
        config: PathBuf,
    },

    /// Run a slave: replicate from the configured feeder
    Slave {
        /// Path to configuration file
        #[arg(long, default_value = "./walrep.json")]
        config: PathBuf,
    },

    /// Print the rows of a log segment, one per line
    Cat {
        /// Segment file (`*.xlog`)
        segment: PathBuf,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
