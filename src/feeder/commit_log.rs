//! Master commit log
//!
//! The only place SCNs are issued. A commit assigns the next LSN and SCN,
//! appends the row, fsyncs, and only then publishes it:
//!
//! 1. the SCN is confirmed on the counter
//! 2. the row joins the in-memory window
//! 3. watchers are woken
//!
//! Everything happens under one mutex, so SCN order is append order is
//! emission order. Commits never wait on connections; a slow slave only
//! falls behind the window and continues from disk.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

use bytes::Bytes;
use tokio::sync::watch;

use super::errors::{FeederError, FeederResult};
use crate::sequence::ScnCounter;
use crate::wal::{Command, Row, SegmentWriter, Tag, WalDir};

/// Durable, SCN-ordered row log of the master
pub struct CommitLog {
    writer: Mutex<SegmentWriter>,
    counter: ScnCounter,
    dir: WalDir,
    window: RwLock<VecDeque<Row>>,
    window_rows: usize,
    committed: watch::Sender<u64>,
}

impl CommitLog {
    /// Opens the log under `data_dir`, resuming after its last durable row.
    pub fn open(data_dir: &Path, rows_per_segment: usize, window_rows: usize) -> FeederResult<Self> {
        let dir = WalDir::open(data_dir)?;
        let writer = SegmentWriter::open(dir.clone(), rows_per_segment)?;
        let last_scn = writer.last_scn();
        let (committed, _) = watch::channel(last_scn);

        tracing::info!(
            path = %dir.path().display(),
            last_lsn = writer.last_lsn(),
            last_scn,
            "commit log opened"
        );

        Ok(Self {
            writer: Mutex::new(writer),
            counter: ScnCounter::starting_after(last_scn),
            dir,
            window: RwLock::new(VecDeque::with_capacity(window_rows.min(4096))),
            window_rows: window_rows.max(1),
            committed,
        })
    }

    pub fn dir(&self) -> &WalDir {
        &self.dir
    }

    /// Last durable SCN
    pub fn last_scn(&self) -> u64 {
        self.counter.last()
    }

    /// Receiver woken with the last SCN after every commit.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.committed.subscribe()
    }

    /// Commits a raw payload. Returns the row as persisted.
    ///
    /// A payload over `MAX_ROW_LEN` is refused before anything is written
    /// and leaves the sequence untouched.
    ///
    /// Blocks on fsync; async callers should go through `spawn_blocking`.
    pub fn commit(&self, tag: Tag, data: impl Into<Bytes>) -> FeederResult<Row> {
        let mut writer = self.writer.lock().map_err(|_| FeederError::Poisoned)?;

        let row = Row::new(writer.next_lsn(), self.counter.next(), tag, data);
        writer.append(&row)?;
        self.counter.confirm(row.scn)?;

        {
            let mut window = self.window.write().map_err(|_| FeederError::Poisoned)?;
            if window.len() == self.window_rows {
                window.pop_front();
            }
            window.push_back(row.clone());
        }
        self.committed.send_replace(row.scn);

        tracing::debug!(lsn = row.lsn, scn = row.scn, tag = %row.tag, "row committed");
        Ok(row)
    }

    /// Commits an operation as a `wal_data` row.
    pub fn commit_command(&self, command: &Command) -> FeederResult<Row> {
        self.commit(Tag::wal_data(), command.encode())
    }

    /// Up to `limit` rows with `scn > after`, in SCN order.
    ///
    /// Served from the window when it still holds `after + 1`, otherwise
    /// from disk. Only durable rows are ever returned.
    pub async fn rows_after(&self, after: u64, limit: usize) -> FeederResult<Vec<Row>> {
        let last = self.last_scn();
        if after >= last || limit == 0 {
            return Ok(Vec::new());
        }

        let until = {
            let window = self.window.read().map_err(|_| FeederError::Poisoned)?;
            match window.front() {
                Some(front) if front.scn <= after + 1 => {
                    return Ok(window
                        .iter()
                        .filter(|row| row.scn > after)
                        .take(limit)
                        .cloned()
                        .collect());
                }
                Some(front) => front.scn - 1,
                None => last,
            }
        };

        let dir = self.dir.clone();
        let rows = tokio::task::spawn_blocking(move || dir.read_after_scn(after, until, limit))
            .await
            .map_err(|e| FeederError::Task(e.to_string()))??;
        Ok(rows)
    }

    /// Closes the current segment with an end marker.
    pub fn close(&self) -> FeederResult<()> {
        let mut writer = self.writer.lock().map_err(|_| FeederError::Poisoned)?;
        writer.close()?;
        Ok(())
    }
}

/// Shared handle used by the server and its connections
pub type SharedCommitLog = Arc<CommitLog>;
