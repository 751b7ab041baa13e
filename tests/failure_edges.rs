//! Failure Edge Tests
//!
//! Master and slave over real TCP when something goes wrong on the way:
//! - an oversized commit is refused and the log still reopens
//! - a filter turning rows into opaque payloads does not stop the slave
//! - a rewrite too large to decode is replaced by the original row
//! - a failed append consumes no SCN and the stream stays contiguous

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tempfile::TempDir;
use walrep::applier::{Puller, SlaveApplier, SlaveConfig};
use walrep::engine::MemoryEngine;
use walrep::feeder::{CommitLog, FeederConfig, FeederError, FeederServer};
use walrep::filter::{FilterDecision, FilterRegistry, FilterResult, FilterRow};
use walrep::sequence::ContinuityPolicy;
use walrep::wal::{segment_file_name, Command, Tag, Tuple, WalDir, WalErrorCode, MAX_ROW_LEN};

// =============================================================================
// Test Utilities
// =============================================================================

fn insert(key: u32) -> Command {
    Command::Insert {
        space: 0,
        flags: 0,
        tuple: Tuple::from_u32s(&[key]),
    }
}

/// Replaces the payload of SCN 2 with bytes no engine can parse.
fn opaque_second(row: &FilterRow<'_>) -> FilterResult<FilterDecision> {
    if row.scn() == 2 {
        return Ok(FilterDecision::RewriteData(Bytes::from_static(b"\xff\xfe\xfd")));
    }
    Ok(FilterDecision::Pass)
}

/// Rewrites every data row into a payload past the row size limit.
fn inflate(row: &FilterRow<'_>) -> FilterResult<FilterDecision> {
    if !row.row().tag.is_data() {
        return Ok(FilterDecision::Pass);
    }
    let huge = vec![0u8; MAX_ROW_LEN as usize + 1];
    Ok(FilterDecision::RewriteData(Bytes::from(huge)))
}

async fn start_master(log: Arc<CommitLog>) -> (Arc<FeederServer>, SocketAddr) {
    let mut registry = FilterRegistry::new();
    registry
        .register("opaque_second", Arc::new(opaque_second))
        .expect("register opaque_second");
    registry
        .register("inflate", Arc::new(inflate))
        .expect("register inflate");

    let config = FeederConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        keepalive_interval: Duration::from_millis(100),
        ..Default::default()
    };
    let server = Arc::new(
        FeederServer::bind(config, log, Arc::new(registry))
            .await
            .expect("bind feeder"),
    );
    let addr = server.local_addr().expect("local addr");
    let runner = Arc::clone(&server);
    tokio::spawn(async move { runner.run().await });
    (server, addr)
}

/// Replicates with `filter` until `scn` is applied, then returns the applier.
async fn replicate_until(
    dir: &TempDir,
    addr: SocketAddr,
    filter: &str,
    scn: u64,
) -> SlaveApplier<MemoryEngine> {
    let applier =
        SlaveApplier::open(dir.path(), 100, MemoryEngine::new(), ContinuityPolicy::default())
            .expect("open slave");
    let config = SlaveConfig {
        feeder_addr: addr.to_string(),
        filter: filter.to_string(),
        reconnect_delay: Duration::from_millis(50),
        read_timeout: Duration::from_secs(5),
        ..Default::default()
    };
    let mut puller = Puller::new(config, applier).expect("puller");
    let mut progress = puller.progress();
    let stop = puller.shutdown_handle();
    let task = tokio::spawn(async move {
        let result = puller.run().await;
        (puller, result)
    });

    tokio::time::timeout(Duration::from_secs(20), progress.wait_for(|s| *s >= scn))
        .await
        .expect("slave caught up in time")
        .expect("progress channel open");
    stop.shutdown();

    let (puller, result) = task.await.expect("puller task");
    result.expect("puller stopped cleanly");
    puller.into_applier()
}

// =============================================================================
// Commit Path
// =============================================================================

#[tokio::test]
async fn test_oversized_commit_is_refused_and_log_reopens() {
    let master_dir = TempDir::new().unwrap();
    let slave_dir = TempDir::new().unwrap();
    {
        let log = CommitLog::open(master_dir.path(), 100, 16).unwrap();
        log.commit(Tag::wal_data(), vec![1u8, 2, 3, 4]).unwrap();

        let err = log
            .commit(Tag::wal_data(), vec![0u8; MAX_ROW_LEN as usize + 1])
            .unwrap_err();
        assert!(!err.is_fatal(), "{}", err);
        assert_eq!(log.last_scn(), 1);
        log.close().unwrap();
    }

    let log = CommitLog::open(master_dir.path(), 100, 16).expect("reopen after refusal");
    let log = Arc::new(log);
    assert_eq!(log.last_scn(), 1);
    log.commit_command(&insert(2)).unwrap();

    let (server, addr) = start_master(log).await;
    let slave = replicate_until(&slave_dir, addr, "", 2).await;
    server.shutdown_handle().shutdown();

    assert_eq!(slave.last_applied(), 2);
    assert!(!slave.is_halted());
}

#[tokio::test]
async fn test_failed_append_consumes_no_scn() {
    let master_dir = TempDir::new().unwrap();
    let slave_dir = TempDir::new().unwrap();

    // One row per segment: the second commit has to create a new file
    let log = Arc::new(CommitLog::open(master_dir.path(), 1, 16).unwrap());
    log.commit_command(&insert(1)).unwrap();

    let blocker = master_dir.path().join(segment_file_name(2));
    std::fs::create_dir(&blocker).unwrap();
    let err = log.commit_command(&insert(2)).unwrap_err();
    assert!(!err.is_fatal(), "{}", err);
    match &err {
        FeederError::Wal(e) => assert_eq!(e.code(), WalErrorCode::WalAppendFailed),
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(log.last_scn(), 1);

    std::fs::remove_dir(&blocker).unwrap();
    let row = log.commit_command(&insert(2)).unwrap();
    assert_eq!((row.lsn, row.scn), (2, 2));
    log.commit_command(&insert(3)).unwrap();

    let (server, addr) = start_master(Arc::clone(&log)).await;
    let slave = replicate_until(&slave_dir, addr, "", 3).await;
    server.shutdown_handle().shutdown();

    assert!(!slave.is_halted());
    assert_eq!(slave.engine().count(0), 3);

    let scns: Vec<u64> = WalDir::open(master_dir.path())
        .unwrap()
        .read_all()
        .unwrap()
        .iter()
        .map(|r| r.scn)
        .collect();
    assert_eq!(scns, vec![1, 2, 3]);
}

// =============================================================================
// Filtered Streams
// =============================================================================

#[tokio::test]
async fn test_opaque_rewrite_does_not_halt_slave() {
    let master_dir = TempDir::new().unwrap();
    let slave_dir = TempDir::new().unwrap();
    let log = Arc::new(CommitLog::open(master_dir.path(), 100, 16).unwrap());
    let (server, addr) = start_master(Arc::clone(&log)).await;

    for key in 1..=3 {
        log.commit_command(&insert(key)).unwrap();
    }

    let slave = replicate_until(&slave_dir, addr, "opaque_second", 3).await;
    server.shutdown_handle().shutdown();

    assert!(!slave.is_halted());
    assert_eq!(slave.last_applied(), 3);
    assert_eq!(slave.engine().count(0), 2);
    assert!(slave.engine().select(0, &2u32.to_le_bytes()).is_none());
    drop(slave);

    // The opaque row is in the slave's log and replays without error
    let rows = WalDir::open(slave_dir.path()).unwrap().read_all().unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[1].data, Bytes::from_static(b"\xff\xfe\xfd"));
    let reopened = SlaveApplier::open(
        slave_dir.path(),
        100,
        MemoryEngine::new(),
        ContinuityPolicy::default(),
    )
    .expect("opaque rows replay");
    assert_eq!(reopened.last_applied(), 3);
}

#[tokio::test]
async fn test_oversized_rewrite_sends_original_row() {
    let master_dir = TempDir::new().unwrap();
    let slave_dir = TempDir::new().unwrap();
    let log = Arc::new(CommitLog::open(master_dir.path(), 100, 16).unwrap());
    let (server, addr) = start_master(Arc::clone(&log)).await;

    for key in 1..=2 {
        log.commit_command(&insert(key)).unwrap();
    }

    let slave = replicate_until(&slave_dir, addr, "inflate", 2).await;
    server.shutdown_handle().shutdown();

    assert!(!slave.is_halted());
    assert_eq!(slave.engine().count(0), 2);
    drop(slave);

    let master = WalDir::open(master_dir.path()).unwrap().read_all().unwrap();
    let local = WalDir::open(slave_dir.path()).unwrap().read_all().unwrap();
    assert_eq!(local.len(), 2);
    for (m, s) in master.iter().zip(&local) {
        assert_eq!(s.data, m.data);
    }
}
