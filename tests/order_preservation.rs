//! Ordering Tests
//!
//! Concurrent committers on the master; the slave must see every row
//! exactly once, in the master's SCN order, with no holes.

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tempfile::TempDir;
use walrep::applier::{Puller, SlaveApplier, SlaveConfig};
use walrep::engine::MemoryEngine;
use walrep::feeder::{CommitLog, FeederConfig, FeederServer};
use walrep::filter::FilterRegistry;
use walrep::sequence::ContinuityPolicy;
use walrep::wal::{Command, Row, Tuple, WalDir};

const WRITERS: u32 = 4;
const ROWS_PER_WRITER: u32 = 50;
const TOTAL: u64 = (WRITERS * ROWS_PER_WRITER) as u64;

fn insert(key: u32) -> Command {
    Command::Insert {
        space: 0,
        flags: 0,
        tuple: Tuple::from_u32s(&[key]),
    }
}

/// Commits from `WRITERS` threads at once; returns each thread's rows.
fn commit_concurrently(log: &Arc<CommitLog>) -> Vec<Vec<Row>> {
    let handles: Vec<_> = (0..WRITERS)
        .map(|writer| {
            let log = Arc::clone(log);
            thread::spawn(move || {
                (0..ROWS_PER_WRITER)
                    .map(|i| log.commit_command(&insert(writer * 1000 + i)).unwrap())
                    .collect::<Vec<Row>>()
            })
        })
        .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

async fn start_master(dir: &TempDir) -> (Arc<FeederServer>, SocketAddr) {
    // Small window and segments so catch-up crosses both paths
    let log = Arc::new(CommitLog::open(dir.path(), 7, 16).expect("open commit log"));
    let config = FeederConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        keepalive_interval: Duration::from_millis(100),
        batch_rows: 10,
        ..Default::default()
    };
    let server = Arc::new(
        FeederServer::bind(config, log, Arc::new(FilterRegistry::new()))
            .await
            .expect("bind feeder"),
    );
    let addr = server.local_addr().expect("local addr");
    let runner = Arc::clone(&server);
    tokio::spawn(async move { runner.run().await });
    (server, addr)
}

fn start_slave(dir: &TempDir, addr: SocketAddr) -> Puller<MemoryEngine> {
    let applier =
        SlaveApplier::open(dir.path(), 25, MemoryEngine::new(), ContinuityPolicy::default())
            .expect("open slave");
    let config = SlaveConfig {
        feeder_addr: addr.to_string(),
        reconnect_delay: Duration::from_millis(50),
        read_timeout: Duration::from_secs(5),
        ..Default::default()
    };
    Puller::new(config, applier).expect("puller")
}

async fn run_until(mut puller: Puller<MemoryEngine>, scn: u64) -> SlaveApplier<MemoryEngine> {
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

fn assert_same_order(master_dir: &TempDir, slave_dir: &TempDir) {
    let master = WalDir::open(master_dir.path()).unwrap().read_all().unwrap();
    let slave = WalDir::open(slave_dir.path()).unwrap().read_all().unwrap();

    assert_eq!(master.len() as u64, TOTAL);
    assert_eq!(slave.len() as u64, TOTAL);
    for (i, (m, s)) in master.iter().zip(&slave).enumerate() {
        assert_eq!(m.scn, i as u64 + 1);
        assert_eq!(s.scn, m.scn);
        assert_eq!(s.data, m.data, "row at scn {}", m.scn);
    }
}

#[test]
fn test_concurrent_commits_get_consecutive_scns() {
    let dir = TempDir::new().unwrap();
    let log = Arc::new(CommitLog::open(dir.path(), 7, 16).unwrap());
    let per_writer = commit_concurrently(&log);

    // Each writer observes its own commits in increasing order
    for rows in &per_writer {
        assert!(rows.windows(2).all(|w| w[0].scn < w[1].scn));
        assert!(rows.iter().all(|r| r.lsn == r.scn));
    }

    let mut scns: Vec<u64> = per_writer.iter().flatten().map(|r| r.scn).collect();
    scns.sort_unstable();
    assert_eq!(scns, (1..=TOTAL).collect::<Vec<u64>>());
    assert_eq!(log.last_scn(), TOTAL);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_slave_catching_up_preserves_master_order() {
    let master_dir = TempDir::new().unwrap();
    let slave_dir = TempDir::new().unwrap();
    let (server, addr) = start_master(&master_dir).await;

    let log = Arc::clone(server.commit_log());
    tokio::task::spawn_blocking(move || commit_concurrently(&log))
        .await
        .unwrap();

    let applier = run_until(start_slave(&slave_dir, addr), TOTAL).await;
    server.shutdown_handle().shutdown();
    assert_eq!(applier.last_applied(), TOTAL);
    assert_eq!(applier.engine().count(0), TOTAL as usize);
    drop(applier);

    assert_same_order(&master_dir, &slave_dir);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_live_stream_preserves_master_order() {
    let master_dir = TempDir::new().unwrap();
    let slave_dir = TempDir::new().unwrap();
    let (server, addr) = start_master(&master_dir).await;

    // Slave connects first and follows the commits as they happen
    let puller = start_slave(&slave_dir, addr);
    let log = Arc::clone(server.commit_log());
    let committers = tokio::task::spawn_blocking(move || commit_concurrently(&log));

    let applier = run_until(puller, TOTAL).await;
    committers.await.unwrap();
    server.shutdown_handle().shutdown();

    assert_eq!(applier.last_applied(), TOTAL);
    assert!(!applier.is_halted());
    drop(applier);

    assert_same_order(&master_dir, &slave_dir);
}
