//! One slave connection
//!
//! Lifecycle: `Connecting` until the handshake is answered, `Streaming`
//! while rows flow, then `Disconnected` (I/O failure or send timeout) or
//! `Closed` (shutdown, peer hang-up, rejected handshake). Failures are
//! confined to this connection.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::net::TcpStream;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::{broadcast, RwLock};
use tokio::time::timeout;
use uuid::Uuid;

use super::commit_log::CommitLog;
use super::config::FeederConfig;
use super::errors::{FeederError, FeederResult};
use crate::filter::{apply_filter, FilterOutcome, FilterRegistry, RowFilter};
use crate::protocol::{
    read_handshake, write_reply, write_row, FilterType, Handshake, HandshakeReply,
    HandshakeStatus, ProtocolError, PROTOCOL_VERSION,
};
use crate::wal::{Row, Tag};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeederState {
    Connecting,
    Streaming,
    Disconnected,
    Closed,
}

impl FeederState {
    /// State a connection ends in after `result`.
    pub fn after(result: &FeederResult<()>) -> Self {
        match result {
            Ok(()) => FeederState::Closed,
            Err(FeederError::Protocol(ProtocolError::Io(_)))
            | Err(FeederError::Protocol(ProtocolError::TruncatedRow { .. }))
            | Err(FeederError::SendTimeout(_)) => FeederState::Disconnected,
            Err(_) => FeederState::Closed,
        }
    }
}

/// Snapshot of one connection as seen in the server's table
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub id: Uuid,
    pub peer: SocketAddr,
    pub state: FeederState,
    /// Filter requested in the handshake
    pub filter: String,
    /// Last SCN sent or dropped by the filter
    pub last_scn: u64,
    pub connected_at: DateTime<Utc>,
}

pub(crate) type ConnectionTable = Arc<RwLock<HashMap<Uuid, ConnectionInfo>>>;

pub(crate) struct FeederConnection {
    pub(crate) id: Uuid,
    pub(crate) peer: SocketAddr,
    pub(crate) stream: TcpStream,
    pub(crate) log: Arc<CommitLog>,
    pub(crate) registry: Arc<FilterRegistry>,
    pub(crate) config: FeederConfig,
    pub(crate) table: ConnectionTable,
    pub(crate) shutdown: broadcast::Receiver<()>,
}

impl FeederConnection {
    /// Serves the connection to completion and leaves the table.
    pub(crate) async fn run(mut self) {
        self.table.write().await.insert(
            self.id,
            ConnectionInfo {
                id: self.id,
                peer: self.peer,
                state: FeederState::Connecting,
                filter: String::new(),
                last_scn: 0,
                connected_at: Utc::now(),
            },
        );

        let result = self.serve().await;
        let state = FeederState::after(&result);
        match &result {
            Ok(()) => {
                tracing::info!(id = %self.id, peer = %self.peer, ?state, "slave connection closed")
            }
            Err(e) => tracing::info!(
                id = %self.id,
                peer = %self.peer,
                ?state,
                error = %e,
                "slave connection ended"
            ),
        }

        self.table.write().await.remove(&self.id);
    }

    async fn serve(&mut self) -> FeederResult<()> {
        let handshake = timeout(self.config.send_timeout, read_handshake(&mut self.stream))
            .await
            .map_err(|_| self.timed_out())??;

        if !Handshake::is_supported_version(handshake.version) {
            tracing::warn!(
                peer = %self.peer,
                version = handshake.version,
                "unsupported protocol version"
            );
            let reply = HandshakeReply::reject(
                HandshakeStatus::BadVersion,
                format!(
                    "protocol version {} not supported, expected at most {}",
                    handshake.version, PROTOCOL_VERSION
                ),
            );
            self.send_reply(&reply).await?;
            return Ok(());
        }

        if handshake.filter_type != FilterType::Id {
            tracing::warn!(
                peer = %self.peer,
                filter = %handshake.filter,
                filter_type = ?handshake.filter_type,
                "slave requested an unsupported filter type"
            );
            let reply = HandshakeReply::reject(
                HandshakeStatus::UnknownFilter,
                format!("filter type {:?} is not served", handshake.filter_type),
            );
            self.send_reply(&reply).await?;
            return Ok(());
        }

        let filter = match self.registry.resolve(&handshake.filter) {
            Ok(filter) => filter,
            Err(e) => {
                tracing::warn!(
                    peer = %self.peer,
                    filter = %handshake.filter,
                    error = %e,
                    "slave requested unknown filter"
                );
                let reply = HandshakeReply::reject(HandshakeStatus::UnknownFilter, e.to_string());
                self.send_reply(&reply).await?;
                return Ok(());
            }
        };

        if let Err(e) = filter.check_arg(&handshake.filter_arg) {
            tracing::warn!(
                peer = %self.peer,
                filter = %handshake.filter,
                error = %e,
                "slave sent a bad filter argument"
            );
            let reply = HandshakeReply::reject(HandshakeStatus::BadFilterArg, e.to_string());
            self.send_reply(&reply).await?;
            return Ok(());
        }

        let last_scn = self.log.last_scn();
        if handshake.scn > last_scn {
            tracing::warn!(
                peer = %self.peer,
                announced = handshake.scn,
                last_scn,
                "slave is ahead of this master"
            );
        }

        self.send_reply(&HandshakeReply::accept()).await?;
        self.update(|info| {
            info.state = FeederState::Streaming;
            info.filter = handshake.filter.clone();
            info.last_scn = handshake.scn;
        })
        .await;
        tracing::info!(
            id = %self.id,
            scn = handshake.scn,
            filter = %handshake.filter,
            "slave subscribed"
        );

        self.stream_rows(handshake.scn, filter.as_ref(), &handshake.filter_arg)
            .await
    }

    async fn stream_rows(
        &mut self,
        mut sent: u64,
        filter: &dyn RowFilter,
        arg: &[u8],
    ) -> FeederResult<()> {
        let mut committed = self.log.subscribe();

        loop {
            if !matches!(self.shutdown.try_recv(), Err(TryRecvError::Empty)) {
                return Ok(());
            }

            // Mark before reading so a commit racing the read wakes us
            committed.borrow_and_update();
            let rows = self.log.rows_after(sent, self.config.batch_rows).await?;

            if !rows.is_empty() {
                for row in rows {
                    sent = row.scn;
                    match apply_filter(filter, &row, arg) {
                        FilterOutcome::Send(row) => self.send_row(&row).await?,
                        FilterOutcome::Drop => {
                            tracing::trace!(scn = row.scn, "row dropped by filter")
                        }
                    }
                }
                self.update(|info| info.last_scn = sent).await;
                continue;
            }

            tokio::select! {
                changed = committed.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                }
                _ = tokio::time::sleep(self.config.keepalive_interval) => {
                    let keepalive = Row::new(0, sent, Tag::wal_final(), Bytes::new());
                    self.send_row(&keepalive).await?;
                }
                _ = self.shutdown.recv() => return Ok(()),
            }
        }
    }

    async fn send_row(&mut self, row: &Row) -> FeederResult<()> {
        timeout(self.config.send_timeout, write_row(&mut self.stream, row))
            .await
            .map_err(|_| self.timed_out())??;
        Ok(())
    }

    async fn send_reply(&mut self, reply: &HandshakeReply) -> FeederResult<()> {
        timeout(self.config.send_timeout, write_reply(&mut self.stream, reply))
            .await
            .map_err(|_| self.timed_out())??;
        Ok(())
    }

    fn timed_out(&self) -> FeederError {
        FeederError::SendTimeout(duration_ms(self.config.send_timeout))
    }

    async fn update(&self, f: impl FnOnce(&mut ConnectionInfo)) {
        if let Some(info) = self.table.write().await.get_mut(&self.id) {
            f(info);
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    d.as_millis().min(u64::MAX as u128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_final_state() {
        assert_eq!(FeederState::after(&Ok(())), FeederState::Closed);
        assert_eq!(
            FeederState::after(&Err(FeederError::SendTimeout(10))),
            FeederState::Disconnected
        );
        let reset = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        assert_eq!(
            FeederState::after(&Err(FeederError::Protocol(ProtocolError::Io(reset)))),
            FeederState::Disconnected
        );
        assert_eq!(
            FeederState::after(&Err(FeederError::Poisoned)),
            FeederState::Closed
        );
    }
}
