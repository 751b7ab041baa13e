//! CLI command implementations
//!
//! `feeder` and `slave` follow the same boot sequence:
//! 1. Configuration load
//! 2. Logging setup
//! 3. Local log recovery
//! 4. Network activation
//!
//! `cat` only reads the segment it is given.

use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use serde_json::json;
use tracing_subscriber::fmt::format::FmtSpan;

use super::args::Command;
use super::config::Config;
use super::errors::{CliError, CliErrorCode, CliResult};
use super::io::{parse_request, read_requests, write_error, write_response};
use crate::applier::{Puller, SlaveApplier};
use crate::engine::{Engine, MemoryEngine};
use crate::feeder::{CommitLog, FeederServer};
use crate::wal::{check_payload_len, dump_segment, Tag};

/// Main CLI entry point
///
/// Parses arguments and dispatches to the appropriate command.
/// This is the only function that main.rs should call.
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    run_command(cli.command)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Feeder { config } => feeder(&config),
        Command::Slave { config } => slave(&config),
        Command::Cat { segment } => cat(&segment),
    }
}

/// Install the global subscriber. Logs go to stderr so stdout stays JSON.
fn init_logging(config: &Config) -> CliResult<()> {
    let builder = tracing_subscriber::fmt()
        .with_max_level(config.log_level()?)
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(io::stderr);

    // A subscriber may already be installed when embedded; keep it
    let _ = if config.json_logs() {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    Ok(())
}

fn build_runtime() -> CliResult<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| CliError::boot_failed(format!("Failed to start runtime: {}", e)))
}

/// Run a master
///
/// Commits every valid command read from stdin and streams the log to
/// connected slaves. Keeps serving after stdin closes until interrupted.
pub fn feeder(config_path: &Path) -> CliResult<()> {
    let config = Config::load(config_path)?;
    init_logging(&config)?;
    let feeder_config = config.feeder_config()?;
    let registry = Arc::new(config.filter_registry()?);

    let log = Arc::new(CommitLog::open(
        config.data_path(),
        config.rows_per_segment,
        config.memory_window_rows,
    )?);

    let mut engine = MemoryEngine::new();
    for row in log.dir().read_all()? {
        engine
            .apply(&row)
            .map_err(|e| CliError::boot_failed(format!("Recovery failed at scn {}: {}", row.scn, e)))?;
    }

    let runtime = build_runtime()?;
    runtime.block_on(async move {
        let server = Arc::new(FeederServer::bind(feeder_config, Arc::clone(&log), registry).await?);
        write_response(json!({
            "listening": server.local_addr()?.to_string(),
            "last_scn": log.last_scn(),
        }))?;

        let runner = Arc::clone(&server);
        let serving = tokio::spawn(async move { runner.run().await });

        let stdin_log = Arc::clone(&log);
        tokio::task::spawn_blocking(move || commit_from_stdin(&stdin_log, &mut engine))
            .await
            .map_err(|e| CliError::io_error(format!("stdin task failed: {}", e)))??;

        tracing::info!("stdin closed, serving until interrupted");
        tokio::signal::ctrl_c().await?;

        server.shutdown_handle().shutdown();
        serving
            .await
            .map_err(|e| CliError::boot_failed(format!("feeder task failed: {}", e)))??;
        log.close()?;
        Ok::<(), CliError>(())
    })
}

/// SERVING loop of the feeder: one JSON command per line.
///
/// A malformed, oversized or inapplicable command gets an error response
/// and is not committed. A commit failure is fatal: the engine has already
/// executed the command.
fn commit_from_stdin(log: &CommitLog, engine: &mut MemoryEngine) -> CliResult<()> {
    for line in read_requests() {
        let line = line?;
        let command = match parse_request(&line) {
            Ok(command) => command,
            Err(e) => {
                write_error(e.code_str(), e.message())?;
                continue;
            }
        };

        let data = command.encode();
        if let Err(e) = check_payload_len(data.len()) {
            write_error(CliErrorCode::BadRequest.code(), &e.to_string())?;
            continue;
        }

        if let Err(e) = engine.execute(&command) {
            write_error("WALREP_ENGINE_REJECTED", &e.to_string())?;
            continue;
        }

        let row = log.commit(Tag::wal_data(), data)?;
        write_response(json!({"lsn": row.lsn, "scn": row.scn}))?;
    }
    Ok(())
}

/// Run a slave
///
/// Replicates until interrupted or until replication fails fatally.
pub fn slave(config_path: &Path) -> CliResult<()> {
    let config = Config::load(config_path)?;
    init_logging(&config)?;
    let slave_config = config.slave_config()?;

    let applier = SlaveApplier::open(
        config.data_path(),
        config.rows_per_segment,
        MemoryEngine::new(),
        config.continuity_policy(),
    )?;
    let mut puller = Puller::new(slave_config, applier)?;

    let runtime = build_runtime()?;
    runtime.block_on(async move {
        let stop = puller.shutdown_handle();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                stop.shutdown();
            }
        });

        let result = puller.run().await;
        let mut applier = puller.into_applier();
        applier.close()?;
        result?;

        write_response(json!({"last_applied": applier.last_applied()}))?;
        Ok::<(), CliError>(())
    })
}

/// Print a segment, one row per line
pub fn cat(segment: &Path) -> CliResult<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    dump_segment(segment, &mut out)?;
    out.flush()?;
    Ok(())
}
