//! Slave runtime configuration

use std::time::Duration;

use super::errors::{ApplierError, ApplierResult};
use crate::filter::validate_filter_name;
use crate::protocol::MAX_FILTER_ARG_LEN;

/// Slave puller settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlaveConfig {
    /// Feeder address, `host:port`
    pub feeder_addr: String,

    /// Filter requested from the feeder, empty for none
    pub filter: String,

    /// Argument sent along with the filter name
    pub filter_arg: String,

    /// Pause between connection attempts
    pub reconnect_delay: Duration,

    /// Longest silence tolerated from the feeder
    pub read_timeout: Duration,
}

impl Default for SlaveConfig {
    fn default() -> Self {
        Self {
            feeder_addr: "127.0.0.1:33316".to_string(),
            filter: String::new(),
            filter_arg: String::new(),
            reconnect_delay: Duration::from_millis(500),
            read_timeout: Duration::from_secs(10),
        }
    }
}

impl SlaveConfig {
    pub fn validate(&self) -> ApplierResult<()> {
        if self.feeder_addr.trim().is_empty() {
            return Err(ApplierError::Config("feeder_addr is required".into()));
        }
        validate_filter_name(&self.filter).map_err(|e| ApplierError::Config(e.to_string()))?;
        if self.filter_arg.len() > MAX_FILTER_ARG_LEN as usize {
            return Err(ApplierError::Config(format!(
                "filter_arg is {} bytes (max: {})",
                self.filter_arg.len(),
                MAX_FILTER_ARG_LEN
            )));
        }
        if self.reconnect_delay.is_zero() {
            return Err(ApplierError::Config("reconnect_delay must be positive".into()));
        }
        if self.read_timeout.is_zero() {
            return Err(ApplierError::Config("read_timeout must be positive".into()));
        }
        Ok(())
    }
}
