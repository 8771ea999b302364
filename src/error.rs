//! Error types for vdevd
//!
//! Provides structured error types for event parsing, device access, label
//! inspection, topology queries, storage commands and the event source.
//! Routing itself never surfaces these to the dispatcher: every failure inside
//! the router resolves to "discard" or "retain for replay".

use thiserror::Error;

/// Unified error type for the daemon
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Event Errors
    // =========================================================================
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    // =========================================================================
    // Device Errors
    // =========================================================================
    #[error("Device not found: {device}")]
    DeviceNotFound { device: String },

    // =========================================================================
    // Label Errors
    // =========================================================================
    #[error("Label read failed for {device}: {reason}")]
    LabelRead { device: String, reason: String },

    #[error("{0}")]
    LabelParse(String),

    // =========================================================================
    // Topology Errors
    // =========================================================================
    #[error("Pool not found: {pool_guid}")]
    PoolNotFound { pool_guid: String },

    #[error("Vdev not found: {pool_guid}:{vdev_guid}")]
    VdevNotFound { pool_guid: String, vdev_guid: String },

    // =========================================================================
    // Storage Command Errors
    // =========================================================================
    #[error("Storage command failed: {operation} {device} in pool {pool}: {reason}")]
    StorageCommand {
        operation: String,
        pool: String,
        device: String,
        reason: String,
    },

    // =========================================================================
    // Event Source Errors
    // =========================================================================
    #[error("Event source disconnected: {0}")]
    SourceDisconnected(String),

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Action the daemon takes when an error reaches its event loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Reconnect the event source with exponential backoff
    Reconnect,
    /// Drop the offending input and keep going
    Discard,
    /// Stop the daemon
    Abort,
}

impl Error {
    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Event stream went away - reconnect
            Error::SourceDisconnected(_) | Error::Io(_) => ErrorAction::Reconnect,

            // Startup problems - nothing sensible to retry
            Error::Configuration(_) | Error::YamlParse(_) | Error::Metrics(_) => {
                ErrorAction::Abort
            }

            // Everything else is scoped to one event
            _ => ErrorAction::Discard,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::Abort)
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::SourceDisconnected(_)
                | Error::Io(_)
                | Error::LabelRead { .. }
                | Error::PoolNotFound { .. }
                | Error::VdevNotFound { .. }
        )
    }

    /// Prefix the message of a label parse error with caller context.
    ///
    /// Other variants are returned untouched.
    pub fn with_context(self, context: &str) -> Self {
        match self {
            Error::LabelParse(msg) => Error::LabelParse(format!("{}{}", context, msg)),
            other => other,
        }
    }
}

/// Result type alias for the daemon
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_actions() {
        let err = Error::SourceDisconnected("/var/run/devd.pipe".into());
        assert_eq!(err.action(), ErrorAction::Reconnect);

        let err = Error::Configuration("bad config".into());
        assert_eq!(err.action(), ErrorAction::Abort);

        let err = Error::MalformedEvent("no system".into());
        assert_eq!(err.action(), ErrorAction::Discard);
    }

    #[test]
    fn test_error_retryable() {
        let transient = Error::PoolNotFound {
            pool_guid: "42".into(),
        };
        assert!(transient.is_retryable());
        assert!(transient.is_transient());

        let config_err = Error::Configuration("invalid".into());
        assert!(!config_err.is_retryable());
        assert!(!config_err.is_transient());
    }

    #[test]
    fn test_label_parse_context() {
        let err = Error::LabelParse("Unable to extract pool GUID".into())
            .with_context("read_label: /dev/da1: ");
        assert_eq!(
            err.to_string(),
            "read_label: /dev/da1: Unable to extract pool GUID"
        );

        let err = Error::Internal("x".into()).with_context("ctx: ");
        assert_eq!(err.to_string(), "Internal error: x");
    }
}
