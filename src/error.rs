//! Error types for link operations.
//!
//! Every fallible operation in this crate reports failure through [`LinkError`].
//! Nothing panics on a missing host, a busy lock or an oversized payload: the
//! link simply stays (or becomes) inactive, the mutation is skipped, and the
//! caller decides whether to try again on its next tick.
//!
//! ## Error Categories
//!
//! - **Connection Errors**: host not running, mapping or lock not available
//! - **Lock Errors**: the companion lock timed out, was abandoned, or the wait failed
//! - **Framing Errors**: a command or bulk payload does not fit the 64 KiB buffer
//! - **Protocol Errors**: version mismatch, "process" without an armed payload
//! - **Configuration Errors**: invalid or unreadable [`crate::LinkConfig`]
//!
//! ## Recovery and Retry
//!
//! ```rust
//! use gamelink::LinkError;
//!
//! let error = LinkError::connection_failed("host not running");
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[cfg(windows)]
use windows_core as core;

/// Result type alias for link operations.
pub type Result<T, E = LinkError> = std::result::Result<T, E>;

/// Main error type for link operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum LinkError {
    #[error("Failed to connect to GameLink host: {reason}")]
    Connection {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Link is not connected")]
    NotConnected,

    #[error("Protocol version mismatch: expected {expected}, found {found}")]
    Version { expected: u8, found: u8 },

    #[error("Companion lock '{lock}' is not available")]
    LockUnavailable { lock: String },

    #[error("Timed out after {timeout:?} waiting for the link lock")]
    LockTimedOut { timeout: Duration },

    #[error("Link lock was abandoned by its previous holder")]
    LockAbandoned,

    #[error("Waiting for the link lock failed: {reason}")]
    LockFailed { reason: String },

    #[error("Payload of {payload_len} bytes exceeds the {max_payload}-byte bulk write limit")]
    PayloadTooLarge { payload_len: usize, max_payload: usize },

    #[error("Command of {len} bytes exceeds the {max}-byte command limit")]
    CommandTooLong { len: usize, max: usize },

    #[error("No bulk payload is armed for processing")]
    NotReady,

    #[error("Scancode {scancode} is outside the 256-key bitmap")]
    ScancodeOutOfRange { scancode: u32 },

    #[error("Invalid link configuration: {reason}")]
    Config { reason: String },

    #[error("Configuration file error: {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration parse error")]
    Yaml(#[from] serde_yaml_ng::Error),

    #[error("Windows API error: {operation}")]
    #[cfg(windows)]
    WindowsApi {
        operation: String,
        #[source]
        source: core::Error,
    },
}

impl LinkError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            LinkError::Connection { .. } => true,
            LinkError::NotConnected => true,
            LinkError::LockUnavailable { .. } => true,
            LinkError::LockTimedOut { .. } => true,
            LinkError::LockAbandoned => true,
            LinkError::LockFailed { .. } => true,
            LinkError::Version { .. } => false,
            LinkError::PayloadTooLarge { .. } => false,
            LinkError::CommandTooLong { .. } => false,
            LinkError::NotReady => false,
            LinkError::ScancodeOutOfRange { .. } => false,
            LinkError::Config { .. } => false,
            LinkError::Io { .. } => false,
            LinkError::Yaml(_) => false,
            #[cfg(windows)]
            LinkError::WindowsApi { .. } => true,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            LinkError::Connection { .. } | LinkError::NotConnected => vec![
                "Ensure the emulator is running with GameLink enabled",
                "Check that both processes run in the same session",
                "Reconnect on the next tick",
            ],
            LinkError::Version { .. } => vec![
                "Update the emulator or this controller to the same protocol revision",
                "Relax the version check in the link configuration",
            ],
            LinkError::LockUnavailable { .. } => vec![
                "Restart the emulator so it recreates its GameLink mutex",
                "Check the configured lock name",
            ],
            LinkError::LockTimedOut { .. } | LinkError::LockFailed { .. } => vec![
                "Retry the operation on the next tick",
                "Check whether the emulator is stalled",
            ],
            LinkError::LockAbandoned => vec![
                "Retry the operation; the lock has been released",
                "Re-read any lock-guarded state before trusting it",
            ],
            LinkError::PayloadTooLarge { .. } | LinkError::CommandTooLong { .. } => vec![
                "Split the batch into several smaller writes",
                "Process each write before sending the next",
            ],
            LinkError::NotReady => vec!["Write a payload before requesting processing"],
            LinkError::ScancodeOutOfRange { .. } => {
                vec!["Translate the key to a scancode below 256 before sending it"]
            }
            LinkError::Config { .. } | LinkError::Io { .. } | LinkError::Yaml(_) => vec![
                "Check the configuration file path and permissions",
                "Compare the configuration against the documented defaults",
            ],
            #[cfg(windows)]
            LinkError::WindowsApi { .. } => vec![
                "Check Windows API permissions",
                "Verify the emulator process is still alive",
            ],
        }
    }

    /// Helper constructor for connection errors.
    pub fn connection_failed(reason: impl Into<String>) -> Self {
        LinkError::Connection { reason: reason.into(), source: None }
    }

    /// Helper constructor for connection errors with source.
    pub fn connection_failed_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        LinkError::Connection { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for configuration errors.
    pub fn config(reason: impl Into<String>) -> Self {
        LinkError::Config { reason: reason.into() }
    }

    /// Helper constructor for Windows API errors.
    #[cfg(windows)]
    pub fn windows_api_error(operation: impl Into<String>, source: core::Error) -> Self {
        LinkError::WindowsApi { operation: operation.into(), source }
    }
}

#[cfg(windows)]
impl From<core::Error> for LinkError {
    fn from(err: core::Error) -> Self {
        LinkError::WindowsApi { operation: "Unknown Windows operation".to_string(), source: err }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
          #[test]
          fn error_messages_carry_their_context(
            reason in ".*",
            expected in any::<u8>(),
            found in any::<u8>(),
            payload_len in 0usize..1_000_000usize,
          ) {
            let connection = LinkError::connection_failed(reason.clone());
            prop_assert!(connection.to_string().contains(&reason));

            let version = LinkError::Version { expected, found };
            let msg = version.to_string();
            prop_assert!(msg.contains(&expected.to_string()));
            prop_assert!(msg.contains(&found.to_string()));

            let too_large = LinkError::PayloadTooLarge { payload_len, max_payload: 65_520 };
            prop_assert!(too_large.to_string().contains(&payload_len.to_string()));
          }

          #[test]
          fn connection_source_chain_is_preserved(base in "[a-z]{1,16}") {
            let err = LinkError::connection_failed_with_source(
              "mapping",
              Box::new(std::io::Error::other(base.clone())),
            );
            let source = std::error::Error::source(&err).map(ToString::to_string);
            prop_assert_eq!(source, Some(base));
          }
        }
    }

    #[test]
    fn error_traits_validation() {
        fn assert_send_sync_static<T: Send + Sync + 'static>() {}
        assert_send_sync_static::<LinkError>();

        let error = LinkError::NotConnected;
        let _: &dyn std::error::Error = &error;
    }

    #[test]
    fn lock_outcomes_are_retryable_but_framing_is_not() {
        assert!(LinkError::LockTimedOut { timeout: Duration::from_secs(3) }.is_retryable());
        assert!(LinkError::LockAbandoned.is_retryable());
        assert!(LinkError::NotConnected.is_retryable());
        assert!(!LinkError::PayloadTooLarge { payload_len: 70_000, max_payload: 65_520 }
            .is_retryable());
        assert!(!LinkError::Version { expected: 4, found: 3 }.is_retryable());
        assert!(!LinkError::NotReady.is_retryable());
    }

    #[test]
    fn every_variant_has_suggestions() {
        let errors = [
            LinkError::connection_failed("x"),
            LinkError::NotConnected,
            LinkError::Version { expected: 4, found: 2 },
            LinkError::LockUnavailable { lock: "L".into() },
            LinkError::LockTimedOut { timeout: Duration::from_millis(1) },
            LinkError::LockAbandoned,
            LinkError::LockFailed { reason: "x".into() },
            LinkError::PayloadTooLarge { payload_len: 1, max_payload: 0 },
            LinkError::CommandTooLong { len: 1, max: 0 },
            LinkError::NotReady,
            LinkError::ScancodeOutOfRange { scancode: 256 },
            LinkError::config("x"),
        ];
        for error in &errors {
            let suggestions = error.recovery_suggestions();
            assert!(!suggestions.is_empty(), "{error} has no suggestions");
            assert!(suggestions.iter().all(|s| s.len() > 5));
        }
    }
}
