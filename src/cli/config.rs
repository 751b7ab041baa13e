//! Configuration file
//!
//! One JSON file configures either role. Keys that only one role reads
//! are ignored by the other:
//!
//! ```json
//! {
//!   "data_dir": "/var/lib/walrep/master",
//!   "feeder_bind_addr": "127.0.0.1:33316",
//!   "filters": {
//!     "test_filter": {"kind": "parity_delta", "drop_below_scn": 5, "add_delta": 1}
//!   }
//! }
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::errors::{CliError, CliResult};
use crate::applier::SlaveConfig;
use crate::feeder::FeederConfig;
use crate::filter::{validate_filter_name, FilterRegistry, FilterSpec};
use crate::sequence::ContinuityPolicy;

/// Configuration file structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data directory (required); segments live in `<data_dir>/wal`
    pub data_dir: String,

    /// Rows per segment before rotation
    #[serde(default = "default_rows_per_segment")]
    pub rows_per_segment: usize,

    // --- Feeder ---
    /// Listen address of the feeder (required for `feeder`)
    #[serde(default)]
    pub feeder_bind_addr: Option<String>,

    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,

    #[serde(default = "default_keepalive_interval_ms")]
    pub keepalive_interval_ms: u64,

    /// Recent rows kept in memory for connected slaves
    #[serde(default = "default_memory_window_rows")]
    pub memory_window_rows: usize,

    /// Rows per disk catch-up read
    #[serde(default = "default_catchup_batch_rows")]
    pub catchup_batch_rows: usize,

    /// Named filters slaves may request
    #[serde(default)]
    pub filters: HashMap<String, FilterSpec>,

    // --- Slave ---
    /// Feeder to replicate from (required for `slave`)
    #[serde(default)]
    pub wal_feeder_addr: Option<String>,

    /// Filter to request, empty for none
    #[serde(default)]
    pub wal_feeder_filter: String,

    /// Argument sent with the filter, such as `0,3` for `space`
    #[serde(default)]
    pub wal_feeder_filter_arg: String,

    #[serde(default)]
    pub sync_scn_with_lsn: bool,

    #[serde(default = "default_panic_on_scn_gap")]
    pub panic_on_scn_gap: bool,

    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    // --- Logging ---
    /// trace, debug, info, warn or error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// text or json
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_rows_per_segment() -> usize {
    50_000
}
fn default_send_timeout_ms() -> u64 {
    5_000
}
fn default_keepalive_interval_ms() -> u64 {
    1_000
}
fn default_memory_window_rows() -> usize {
    4_096
}
fn default_catchup_batch_rows() -> usize {
    512
}
fn default_panic_on_scn_gap() -> bool {
    true
}
fn default_reconnect_delay_ms() -> u64 {
    500
}
fn default_read_timeout_ms() -> u64 {
    10_000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> CliResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| CliError::config_error(format!("Failed to read config: {}", e)))?;
        Self::from_json(&content)
    }

    /// Parse and validate configuration text
    pub fn from_json(content: &str) -> CliResult<Self> {
        let config: Config = serde_json::from_str(content)
            .map_err(|e| CliError::config_error(format!("Invalid config JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> CliResult<()> {
        if self.data_dir.trim().is_empty() {
            return Err(CliError::config_error("data_dir must not be empty"));
        }
        for (name, value) in [
            ("rows_per_segment", self.rows_per_segment as u64),
            ("memory_window_rows", self.memory_window_rows as u64),
            ("catchup_batch_rows", self.catchup_batch_rows as u64),
            ("send_timeout_ms", self.send_timeout_ms),
            ("keepalive_interval_ms", self.keepalive_interval_ms),
            ("reconnect_delay_ms", self.reconnect_delay_ms),
            ("read_timeout_ms", self.read_timeout_ms),
        ] {
            if value == 0 {
                return Err(CliError::config_error(format!("{} must be > 0", name)));
            }
        }

        self.log_level()?;
        if self.log_format != "text" && self.log_format != "json" {
            return Err(CliError::config_error(format!(
                "Invalid log_format: '{}'. Expected 'text' or 'json'.",
                self.log_format
            )));
        }

        validate_filter_name(&self.wal_feeder_filter)
            .map_err(|e| CliError::config_error(format!("wal_feeder_filter: {}", e)))?;
        self.filter_registry()?;

        if let Some(addr) = &self.feeder_bind_addr {
            self.feeder_config_for(addr).validate()?;
        }
        Ok(())
    }

    /// Get data directory as Path
    pub fn data_path(&self) -> &Path {
        Path::new(&self.data_dir)
    }

    pub fn log_level(&self) -> CliResult<tracing::Level> {
        tracing::Level::from_str(&self.log_level).map_err(|_| {
            CliError::config_error(format!("Invalid log_level: '{}'", self.log_level))
        })
    }

    pub fn json_logs(&self) -> bool {
        self.log_format == "json"
    }

    pub fn continuity_policy(&self) -> ContinuityPolicy {
        ContinuityPolicy {
            sync_scn_with_lsn: self.sync_scn_with_lsn,
            panic_on_scn_gap: self.panic_on_scn_gap,
        }
    }

    /// Builtin filters plus the declared ones.
    pub fn filter_registry(&self) -> CliResult<FilterRegistry> {
        FilterRegistry::from_specs(&self.filters)
            .map_err(|e| CliError::config_error(format!("filters: {}", e)))
    }

    pub fn feeder_config(&self) -> CliResult<FeederConfig> {
        let addr = self
            .feeder_bind_addr
            .as_deref()
            .ok_or_else(|| CliError::config_error("feeder_bind_addr is required for feeder"))?;
        Ok(self.feeder_config_for(addr))
    }

    fn feeder_config_for(&self, addr: &str) -> FeederConfig {
        FeederConfig {
            bind_addr: addr.to_string(),
            send_timeout: Duration::from_millis(self.send_timeout_ms),
            keepalive_interval: Duration::from_millis(self.keepalive_interval_ms),
            batch_rows: self.catchup_batch_rows,
        }
    }

    pub fn slave_config(&self) -> CliResult<SlaveConfig> {
        let addr = self
            .wal_feeder_addr
            .as_deref()
            .ok_or_else(|| CliError::config_error("wal_feeder_addr is required for slave"))?;
        let config = SlaveConfig {
            feeder_addr: addr.to_string(),
            filter: self.wal_feeder_filter.clone(),
            filter_arg: self.wal_feeder_filter_arg.clone(),
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            read_timeout: Duration::from_millis(self.read_timeout_ms),
        };
        config.validate()?;
        Ok(config)
    }
}
