//! Slave connection loop
//!
//! Connects to the feeder, announces the last applied SCN and the filter,
//! then applies rows until the stream breaks. Transient failures reconnect
//! after `reconnect_delay`; a rejected handshake or a halted applier ends
//! the loop.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch};
use tokio::time::timeout;

use super::config::SlaveConfig;
use super::errors::{ApplierError, ApplierResult};
use super::slave::{ApplyOutcome, SlaveApplier};
use crate::engine::Engine;
use crate::protocol::{read_reply, read_row, write_handshake, Handshake, ProtocolError};

/// Drives one [`SlaveApplier`] from one feeder.
pub struct Puller<E: Engine> {
    config: SlaveConfig,
    applier: SlaveApplier<E>,
    progress: watch::Sender<u64>,
    shutdown_tx: broadcast::Sender<()>,
}

impl<E: Engine> Puller<E> {
    pub fn new(config: SlaveConfig, applier: SlaveApplier<E>) -> ApplierResult<Self> {
        config.validate()?;
        let (progress, _) = watch::channel(applier.last_applied());
        let (shutdown_tx, _) = broadcast::channel(1);
        Ok(Self {
            config,
            applier,
            progress,
            shutdown_tx,
        })
    }

    /// Last applied SCN, updated after every applied row.
    pub fn progress(&self) -> watch::Receiver<u64> {
        self.progress.subscribe()
    }

    pub fn shutdown_handle(&self) -> PullerShutdown {
        PullerShutdown {
            tx: self.shutdown_tx.clone(),
        }
    }

    pub fn applier(&self) -> &SlaveApplier<E> {
        &self.applier
    }

    pub fn into_applier(self) -> SlaveApplier<E> {
        self.applier
    }

    /// Runs until shutdown (`Ok`) or a fatal error.
    pub async fn run(&mut self) -> ApplierResult<()> {
        let mut shutdown = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = self.session() => match result {
                    Ok(()) => tracing::info!(feeder = %self.config.feeder_addr, "feeder closed the stream"),
                    Err(e) if e.is_fatal() => {
                        tracing::error!(error = %e, "replication stopped");
                        return Err(e);
                    }
                    Err(e) => tracing::info!(error = %e, "replication connection lost"),
                },
                _ = shutdown.recv() => return Ok(()),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
                _ = shutdown.recv() => return Ok(()),
            }
        }
    }

    async fn session(&mut self) -> ApplierResult<()> {
        let read_timeout = self.config.read_timeout;
        let mut stream = timeout(read_timeout, TcpStream::connect(&self.config.feeder_addr))
            .await
            .map_err(|_| ApplierError::ReadTimeout(millis(read_timeout)))?
            .map_err(ProtocolError::from)?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(error = %e, "could not set TCP_NODELAY");
        }

        let handshake = Handshake::new(self.applier.last_applied(), &self.config.filter)?
            .with_arg(self.config.filter_arg.clone().into_bytes())?;
        write_handshake(&mut stream, &handshake).await?;
        let reply = timeout(read_timeout, read_reply(&mut stream))
            .await
            .map_err(|_| ApplierError::ReadTimeout(millis(read_timeout)))??;
        if !reply.is_ok() {
            return Err(ProtocolError::Rejected {
                status: reply.status,
                message: reply.message,
            }
            .into());
        }

        tracing::info!(
            feeder = %self.config.feeder_addr,
            scn = handshake.scn,
            filter = %handshake.filter,
            "replicating"
        );

        loop {
            let row = timeout(read_timeout, read_row(&mut stream))
                .await
                .map_err(|_| ApplierError::ReadTimeout(millis(read_timeout)))??;
            let Some(row) = row else {
                return Ok(());
            };

            if let ApplyOutcome::Applied { scn, .. } = self.applier.apply(&row)? {
                self.progress.send_replace(scn);
            }
        }
    }
}

/// Stops a running [`Puller`].
#[derive(Debug, Clone)]
pub struct PullerShutdown {
    tx: broadcast::Sender<()>,
}

impl PullerShutdown {
    pub fn shutdown(&self) {
        let _ = self.tx.send(());
    }
}

fn millis(d: Duration) -> u64 {
    d.as_millis().min(u64::MAX as u128) as u64
}
