//! Feeder TCP server

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use super::commit_log::CommitLog;
use super::config::FeederConfig;
use super::connection::{ConnectionInfo, ConnectionTable, FeederConnection};
use super::errors::{FeederError, FeederResult};
use crate::filter::FilterRegistry;

/// Accepts slaves and streams the commit log to each of them
pub struct FeederServer {
    config: FeederConfig,
    log: Arc<CommitLog>,
    registry: Arc<FilterRegistry>,
    listener: TcpListener,
    shutdown_tx: broadcast::Sender<()>,
    connections: ConnectionTable,
}

impl FeederServer {
    /// Binds the listener. Nothing is served until [`FeederServer::run`].
    pub async fn bind(
        config: FeederConfig,
        log: Arc<CommitLog>,
        registry: Arc<FilterRegistry>,
    ) -> FeederResult<Self> {
        config.validate()?;
        let addr = config.socket_addr()?;
        let listener = TcpListener::bind(addr).await.map_err(|source| FeederError::Bind {
            addr: config.bind_addr.clone(),
            source,
        })?;
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            log,
            registry,
            listener,
            shutdown_tx,
            connections: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Actual listen address, useful when bound to port 0.
    pub fn local_addr(&self) -> FeederResult<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| FeederError::Config(format!("Listener has no address: {}", e)))
    }

    pub fn commit_log(&self) -> &Arc<CommitLog> {
        &self.log
    }

    /// Handle that stops the server and every connection.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    /// Snapshot of live connections
    pub async fn connections(&self) -> Vec<ConnectionInfo> {
        self.connections.read().await.values().cloned().collect()
    }

    /// Handle for reading the connection table while the server runs.
    pub fn connection_table(&self) -> ConnectionTableHandle {
        ConnectionTableHandle {
            table: Arc::clone(&self.connections),
        }
    }

    /// Accept loop. Returns after shutdown.
    pub async fn run(&self) -> FeederResult<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tracing::info!(addr = %self.config.bind_addr, filters = ?self.registry.names(), "feeder listening");

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => self.spawn_connection(stream, peer),
                        Err(e) => tracing::error!(error = %e, "accept failed"),
                    }
                }

                _ = shutdown_rx.recv() => {
                    tracing::info!("feeder shutting down");
                    break;
                }
            }
        }

        Ok(())
    }

    fn spawn_connection(&self, stream: tokio::net::TcpStream, peer: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(error = %e, "could not set TCP_NODELAY");
        }

        let id = Uuid::new_v4();
        tracing::info!(%id, %peer, "slave connected");
        let connection = FeederConnection {
            id,
            peer,
            stream,
            log: Arc::clone(&self.log),
            registry: Arc::clone(&self.registry),
            config: self.config.clone(),
            table: Arc::clone(&self.connections),
            shutdown: self.shutdown_tx.subscribe(),
        };

        tokio::spawn(connection.run());
    }
}

/// Stops a running [`FeederServer`].
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: broadcast::Sender<()>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        // No receivers means nothing is running
        let _ = self.tx.send(());
    }
}

/// Read access to the connection table from outside the server.
#[derive(Clone)]
pub struct ConnectionTableHandle {
    table: ConnectionTable,
}

impl ConnectionTableHandle {
    pub async fn snapshot(&self) -> Vec<ConnectionInfo> {
        self.table.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.table.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{
        read_reply, read_row, write_handshake, FilterType, Handshake, HandshakeStatus,
    };
    use crate::wal::Tag;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::net::TcpStream;

    async fn start(dir: &TempDir) -> (Arc<FeederServer>, SocketAddr) {
        let log = Arc::new(CommitLog::open(dir.path(), 100, 64).unwrap());
        let config = FeederConfig {
            bind_addr: "127.0.0.1:0".into(),
            keepalive_interval: Duration::from_millis(50),
            ..Default::default()
        };
        let server = Arc::new(
            FeederServer::bind(config, log, Arc::new(FilterRegistry::new()))
                .await
                .unwrap(),
        );
        let addr = server.local_addr().unwrap();
        let runner = Arc::clone(&server);
        tokio::spawn(async move { runner.run().await });
        (server, addr)
    }

    #[tokio::test]
    async fn test_unknown_filter_is_rejected() {
        let dir = TempDir::new().unwrap();
        let (server, addr) = start(&dir).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        write_handshake(&mut stream, &Handshake::new(0, "missing").unwrap())
            .await
            .unwrap();
        let reply = read_reply(&mut stream).await.unwrap();
        assert_eq!(reply.status, HandshakeStatus::UnknownFilter);
        assert!(read_row(&mut stream).await.unwrap().is_none());

        server.shutdown_handle().shutdown();
    }

    #[tokio::test]
    async fn test_bad_version_is_rejected() {
        let dir = TempDir::new().unwrap();
        let (server, addr) = start(&dir).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let mut handshake = Handshake::new(0, "").unwrap();
        handshake.version = 99;
        write_handshake(&mut stream, &handshake).await.unwrap();
        assert_eq!(
            read_reply(&mut stream).await.unwrap().status,
            HandshakeStatus::BadVersion
        );

        server.shutdown_handle().shutdown();
    }

    #[tokio::test]
    async fn test_version_one_slave_is_served() {
        let dir = TempDir::new().unwrap();
        let (server, addr) = start(&dir).await;
        server.commit_log().commit(Tag::wal_data(), vec![1u8]).unwrap();

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let mut handshake = Handshake::new(0, "identity").unwrap();
        handshake.version = 1;
        write_handshake(&mut stream, &handshake).await.unwrap();
        assert!(read_reply(&mut stream).await.unwrap().is_ok());
        assert_eq!(read_row(&mut stream).await.unwrap().unwrap().scn, 1);

        server.shutdown_handle().shutdown();
    }

    #[tokio::test]
    async fn test_bad_filter_argument_is_rejected() {
        let dir = TempDir::new().unwrap();
        let (server, addr) = start(&dir).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let handshake = Handshake::new(0, "space")
            .unwrap()
            .with_arg(&b"one,two"[..])
            .unwrap();
        write_handshake(&mut stream, &handshake).await.unwrap();
        assert_eq!(
            read_reply(&mut stream).await.unwrap().status,
            HandshakeStatus::BadFilterArg
        );

        server.shutdown_handle().shutdown();
    }

    #[tokio::test]
    async fn test_script_filter_type_is_rejected() {
        let dir = TempDir::new().unwrap();
        let (server, addr) = start(&dir).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let mut handshake = Handshake::new(0, "identity").unwrap();
        handshake.filter_type = FilterType::Lua;
        write_handshake(&mut stream, &handshake).await.unwrap();
        assert_eq!(
            read_reply(&mut stream).await.unwrap().status,
            HandshakeStatus::UnknownFilter
        );

        server.shutdown_handle().shutdown();
    }

    #[tokio::test]
    async fn test_streams_rows_after_announced_scn() {
        let dir = TempDir::new().unwrap();
        let (server, addr) = start(&dir).await;
        let log = Arc::clone(server.commit_log());
        for i in 1..=3u8 {
            log.commit(Tag::wal_data(), vec![i]).unwrap();
        }

        let mut stream = TcpStream::connect(addr).await.unwrap();
        write_handshake(&mut stream, &Handshake::new(1, "").unwrap())
            .await
            .unwrap();
        assert!(read_reply(&mut stream).await.unwrap().is_ok());

        let mut scns = Vec::new();
        while scns.len() < 3 {
            let row = read_row(&mut stream).await.unwrap().unwrap();
            if row.tag.is_dummy() {
                continue;
            }
            scns.push(row.scn);
            if scns.len() == 2 {
                log.commit(Tag::wal_data(), vec![4]).unwrap();
            }
        }
        assert_eq!(scns, vec![2, 3, 4]);
        assert_eq!(server.connections().await.len(), 1);

        server.shutdown_handle().shutdown();
    }

    #[tokio::test]
    async fn test_idle_connection_gets_keepalives() {
        let dir = TempDir::new().unwrap();
        let (server, addr) = start(&dir).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        write_handshake(&mut stream, &Handshake::new(0, "").unwrap())
            .await
            .unwrap();
        assert!(read_reply(&mut stream).await.unwrap().is_ok());

        let row = tokio::time::timeout(Duration::from_secs(2), read_row(&mut stream))
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(row.tag.is_dummy());

        server.shutdown_handle().shutdown();
    }
}
