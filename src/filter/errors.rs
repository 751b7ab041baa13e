//! # Filter Errors

use thiserror::Error;

/// Longest filter name the handshake can carry
pub const MAX_FILTER_NAME_LEN: usize = 32;

/// Result type for filter operations
pub type FilterResult<T> = Result<T, FilterError>;

/// Filter errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    // ==================
    // Registration Errors
    // ==================
    /// No filter registered under this name
    #[error("Unknown filter: {0:?}")]
    UnknownFilter(String),

    /// Name does not fit the handshake field
    #[error("Filter name too long: {len} bytes (max: {MAX_FILTER_NAME_LEN})")]
    NameTooLong { len: usize },

    /// Name already taken
    #[error("Filter already registered: {0:?}")]
    Duplicate(String),

    /// Filter declaration rejected
    #[error("Invalid filter config: {0}")]
    InvalidConfig(String),

    /// Filter refused the argument a slave sent
    #[error("Invalid filter argument: {0}")]
    InvalidArg(String),

    // ==================
    // Runtime Errors
    // ==================
    /// Filter reported a failure for one row
    #[error("Filter failed: {0}")]
    Failed(String),
}

impl FilterError {
    /// Registration errors prevent startup; a bad argument only affects
    /// one handshake and a runtime failure only one row.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, FilterError::Failed(_) | FilterError::InvalidArg(_))
    }
}

/// Checks that a name fits the handshake's fixed filter field.
pub fn validate_filter_name(name: &str) -> FilterResult<()> {
    if name.len() > MAX_FILTER_NAME_LEN {
        return Err(FilterError::NameTooLong { len: name.len() });
    }
    if name.bytes().any(|b| b == 0) {
        return Err(FilterError::InvalidConfig(format!(
            "filter name {:?} contains a NUL byte",
            name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_validation() {
        assert!(validate_filter_name("").is_ok());
        assert!(validate_filter_name(&"f".repeat(32)).is_ok());
        assert_eq!(
            validate_filter_name(&"f".repeat(33)),
            Err(FilterError::NameTooLong { len: 33 })
        );
        assert!(validate_filter_name("a\0b").is_err());
    }

    #[test]
    fn test_runtime_failures_are_not_fatal() {
        assert!(!FilterError::Failed("boom".into()).is_fatal());
        assert!(!FilterError::InvalidArg("x".into()).is_fatal());
        assert!(FilterError::UnknownFilter("x".into()).is_fatal());
    }
}
