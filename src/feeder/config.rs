//! Feeder runtime configuration

use std::net::SocketAddr;
use std::time::Duration;

use super::errors::{FeederError, FeederResult};

/// Feeder server settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeederConfig {
    /// Listen address, `host:port`
    pub bind_addr: String,

    /// Upper bound on sending one row to a slave
    pub send_timeout: Duration,

    /// Idle time after which a keepalive row is sent
    pub keepalive_interval: Duration,

    /// Rows fetched per catch-up read
    pub batch_rows: usize,
}

impl Default for FeederConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:33316".to_string(),
            send_timeout: Duration::from_secs(5),
            keepalive_interval: Duration::from_secs(1),
            batch_rows: 512,
        }
    }
}

impl FeederConfig {
    pub fn validate(&self) -> FeederResult<()> {
        self.socket_addr()?;
        if self.send_timeout.is_zero() {
            return Err(FeederError::Config("send_timeout must be positive".into()));
        }
        if self.keepalive_interval.is_zero() {
            return Err(FeederError::Config(
                "keepalive_interval must be positive".into(),
            ));
        }
        if self.batch_rows == 0 {
            return Err(FeederError::Config("batch_rows must be positive".into()));
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> FeederResult<SocketAddr> {
        self.bind_addr
            .parse()
            .map_err(|e| FeederError::Config(format!("Invalid bind address {:?}: {}", self.bind_addr, e)))
    }
}
