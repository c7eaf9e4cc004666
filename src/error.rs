//! Error types for the telemetry pipeline.
//!
//! All errors implement the `std::error::Error` trait and carry structured
//! context. The pipeline distinguishes two channels of failure:
//!
//! - **Transport errors**: network/file I/O failures. These are retryable and
//!   are recovered inside the worker via bounded retry + reconnect; they are
//!   surfaced to collaborators only through status counters.
//! - **Configuration errors**: missing or malformed settings. These fail fast
//!   at pipeline construction, before any worker thread starts.
//!
//! ## Retry classification
//!
//! ```rust
//! use telegraph::TelemetryError;
//!
//! let error = TelemetryError::transport("tcp send to sink:9000", None);
//! assert!(error.is_retryable());
//!
//! let error = TelemetryError::config("file transport requires file_path");
//! assert!(!error.is_retryable());
//! ```

use std::time::Duration;
use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T, E = TelemetryError> = std::result::Result<T, E>;

/// Main error type for the telemetry pipeline.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TelemetryError {
    #[error("invalid telemetry configuration: {reason}")]
    Config { reason: String },

    #[error("invalid endpoint '{endpoint}': {reason}")]
    Endpoint { endpoint: String, reason: String },

    #[error("transport error: {context}")]
    Transport {
        context: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("payload serialization failed")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },

    #[error("worker fault: {reason}")]
    WorkerFault { reason: String },

    #[error("operation timed out after {duration:?}")]
    Timeout { duration: Duration },
}

impl TelemetryError {
    /// Returns whether this error is potentially recoverable through retry.
    ///
    /// Transport and timeout failures are retried by the worker; configuration
    /// and serialization failures are not — retrying them cannot succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            TelemetryError::Transport { .. } => true,
            TelemetryError::Timeout { .. } => true,
            TelemetryError::Config { .. } => false,
            TelemetryError::Endpoint { .. } => false,
            TelemetryError::Serialize { .. } => false,
            TelemetryError::WorkerFault { .. } => false,
        }
    }

    /// Helper constructor for configuration errors.
    pub fn config(reason: impl Into<String>) -> Self {
        TelemetryError::Config { reason: reason.into() }
    }

    /// Helper constructor for endpoint parse errors.
    pub fn endpoint(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        TelemetryError::Endpoint { endpoint: endpoint.into(), reason: reason.into() }
    }

    /// Helper constructor for transport errors with optional I/O source.
    pub fn transport(context: impl Into<String>, source: Option<std::io::Error>) -> Self {
        TelemetryError::Transport { context: context.into(), source }
    }

    /// Helper constructor for worker faults.
    pub fn worker_fault(reason: impl Into<String>) -> Self {
        TelemetryError::WorkerFault { reason: reason.into() }
    }
}

impl From<std::io::Error> for TelemetryError {
    fn from(err: std::io::Error) -> Self {
        TelemetryError::Transport { context: "i/o".to_string(), source: Some(err) }
    }
}

impl From<serde_json::Error> for TelemetryError {
    fn from(err: serde_json::Error) -> Self {
        TelemetryError::Serialize { source: err }
    }
}
