//! CLI-specific error types
//!
//! Every CLI error ends the process. The code tells a supervisor whether a
//! restart can help: configuration errors exit with 2 and need an
//! operator, everything else exits with 1.

use std::error::Error as StdError;
use std::fmt;
use std::io;

use crate::applier::ApplierError;
use crate::feeder::FeederError;
use crate::wal::WalError;

type BoxedSource = Box<dyn StdError + Send + Sync + 'static>;

/// CLI error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliErrorCode {
    ConfigError,
    /// stdin/stdout failure
    IoError,
    /// Malformed command on stdin; reported, not fatal to the feeder
    BadRequest,
    BootFailed,
    /// Replication stopped on a fatal error
    ReplicationFailed,
}

impl CliErrorCode {
    pub fn code(self) -> &'static str {
        match self {
            Self::ConfigError => "WALREP_CLI_CONFIG_ERROR",
            Self::IoError => "WALREP_CLI_IO_ERROR",
            Self::BadRequest => "WALREP_CLI_BAD_REQUEST",
            Self::BootFailed => "WALREP_CLI_BOOT_FAILED",
            Self::ReplicationFailed => "WALREP_CLI_REPLICATION_FAILED",
        }
    }

    /// Process exit status for this code
    pub fn exit_code(self) -> i32 {
        match self {
            Self::ConfigError => 2,
            _ => 1,
        }
    }
}

/// CLI error
#[derive(Debug)]
pub struct CliError {
    code: CliErrorCode,
    message: String,
    source: Option<BoxedSource>,
}

impl CliError {
    pub fn new(code: CliErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
        }
    }

    fn caused_by(code: CliErrorCode, source: impl StdError + Send + Sync + 'static) -> Self {
        Self {
            code,
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::ConfigError, msg)
    }

    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::IoError, msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::BadRequest, msg)
    }

    pub fn boot_failed(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::BootFailed, msg)
    }

    pub fn code(&self) -> CliErrorCode {
        self.code
    }

    /// Error code string, as written in JSON error responses
    pub fn code_str(&self) -> &'static str {
        self.code.code()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn exit_code(&self) -> i32 {
        self.code.exit_code()
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.code(), self.message)
    }
}

impl StdError for CliError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source.as_deref().map(|e| e as &(dyn StdError + 'static))
    }
}

impl From<io::Error> for CliError {
    fn from(e: io::Error) -> Self {
        Self::caused_by(CliErrorCode::IoError, e)
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        Self::bad_request(format!("JSON error: {}", e))
    }
}

impl From<WalError> for CliError {
    fn from(e: WalError) -> Self {
        Self::caused_by(CliErrorCode::BootFailed, e)
    }
}

impl From<FeederError> for CliError {
    fn from(e: FeederError) -> Self {
        match e {
            FeederError::Config(msg) => Self::config_error(msg),
            other => Self::caused_by(CliErrorCode::BootFailed, other),
        }
    }
}

impl From<ApplierError> for CliError {
    fn from(e: ApplierError) -> Self {
        match e {
            ApplierError::Config(msg) => Self::config_error(msg),
            other => Self::caused_by(CliErrorCode::ReplicationFailed, other),
        }
    }
}

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;
