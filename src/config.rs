//! Typed configuration surface for the telemetry pipeline.
//!
//! The platform's configuration collaborator owns file discovery and loading;
//! this module owns the shape of the settings the pipeline consumes. Every
//! field has a documented default, and the whole surface is validated once at
//! pipeline construction — never per call.
//!
//! ```rust
//! use telegraph::StreamConfig;
//!
//! let config = StreamConfig::from_yaml(
//!     "transport:\n  type: tcp\n  endpoint: \"sink.local:9000\"\nbackpressure: block\n",
//! ).unwrap();
//! config.validate().unwrap();
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Result, TelemetryError};

/// Sink variant selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Raw bytes to the process's standard output stream.
    #[default]
    Stdout,
    /// Append to a local file, creating parent directories.
    File,
    /// Blocking writes to a `host:port` endpoint.
    Tcp,
}

/// Policy applied when the buffer exceeds its byte capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressureMode {
    /// Evict the oldest payloads until under capacity. Never blocks.
    #[default]
    DropOldest,
    /// Block the enqueuing thread (bounded) until the worker frees space,
    /// then fall back to `DropOldest` as an escape valve.
    Block,
    /// Send overflow payloads synchronously from the enqueuing thread,
    /// bypassing the queue. A failed send on this path counts as a drop.
    FanOut,
}

/// Sink settings consumed by the transport factory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Which sink variant to use. Default: `stdout`.
    #[serde(rename = "type")]
    pub kind: TransportKind,
    /// Target path for the `file` transport. Required for that kind.
    pub file_path: Option<PathBuf>,
    /// `host:port` for the `tcp` transport. Required for that kind.
    pub endpoint: Option<String>,
    /// TCP connect timeout in seconds. Default: 5.0.
    pub connect_timeout_seconds: f64,
    /// TCP send (socket write) timeout in seconds. Default: 5.0.
    pub send_timeout_seconds: f64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::Stdout,
            file_path: None,
            endpoint: None,
            connect_timeout_seconds: 5.0,
            send_timeout_seconds: 5.0,
        }
    }
}

impl TransportConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.connect_timeout_seconds)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.send_timeout_seconds)
    }
}

/// Full pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Sink selection and timeouts.
    pub transport: TransportConfig,
    /// Maximum payloads delivered per flush pass; 0 drains the whole buffer.
    /// Default: 32.
    pub max_batch_size: usize,
    /// Byte capacity of the transport buffer. Default: 2 MiB.
    pub max_buffer_bytes: usize,
    /// Flush once this many ticks have been enqueued since the last flush;
    /// values <= 1 flush whenever the buffer is non-empty. Default: 1.
    pub flush_interval_ticks: u64,
    /// Retries per payload after the first attempt. Default: 3.
    pub max_attempts: u32,
    /// Fixed sleep between send attempts, in seconds. Default: 0.25.
    pub backoff_seconds: f64,
    /// Overflow policy. Default: `drop_oldest`.
    pub backpressure: BackpressureMode,
    /// Base wait for the `block` strategy, in seconds; the enqueuing thread
    /// waits up to 3x this value before falling back to eviction.
    /// Default: 1.0.
    pub block_timeout_seconds: f64,
    /// Worker relaunches allowed after internal faults. Default: 3.
    pub restart_limit: u32,
    /// Worker wake interval when idle, in seconds. Default: 0.5.
    pub worker_poll_seconds: f64,
    /// Emit diff payloads after the first snapshot. Default: true.
    pub diff_enabled: bool,
    /// Version tag carried by every record. Default: "1.0".
    pub schema_version: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            max_batch_size: 32,
            max_buffer_bytes: 2 * 1024 * 1024,
            flush_interval_ticks: 1,
            max_attempts: 3,
            backoff_seconds: 0.25,
            backpressure: BackpressureMode::DropOldest,
            block_timeout_seconds: 1.0,
            restart_limit: 3,
            worker_poll_seconds: 0.5,
            diff_enabled: true,
            schema_version: "1.0".to_string(),
        }
    }
}

impl StreamConfig {
    /// Parse the configuration surface handed over by the config collaborator.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml_ng::from_str(yaml)
            .map_err(|err| TelemetryError::config(format!("yaml parse error: {err}")))
    }

    /// Validate the numeric surface. Run once at pipeline construction.
    ///
    /// Transport-specific field checks (missing `file_path`, malformed
    /// `endpoint`) happen when the transport factory is built, also at
    /// construction time.
    pub fn validate(&self) -> Result<()> {
        if self.max_buffer_bytes == 0 {
            return Err(TelemetryError::config("max_buffer_bytes must be positive"));
        }
        Self::require_non_negative("backoff_seconds", self.backoff_seconds)?;
        Self::require_positive("worker_poll_seconds", self.worker_poll_seconds)?;
        Self::require_positive("connect_timeout_seconds", self.transport.connect_timeout_seconds)?;
        Self::require_positive("send_timeout_seconds", self.transport.send_timeout_seconds)?;
        if self.backpressure == BackpressureMode::Block {
            Self::require_positive("block_timeout_seconds", self.block_timeout_seconds)?;
        }
        Ok(())
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_secs_f64(self.backoff_seconds)
    }

    pub fn block_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.block_timeout_seconds)
    }

    pub fn worker_poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.worker_poll_seconds)
    }

    fn require_positive(name: &str, value: f64) -> Result<()> {
        if !value.is_finite() || value <= 0.0 {
            return Err(TelemetryError::config(format!("{name} must be a positive number")));
        }
        Ok(())
    }

    fn require_non_negative(name: &str, value: f64) -> Result<()> {
        if !value.is_finite() || value < 0.0 {
            return Err(TelemetryError::config(format!("{name} must be non-negative")));
        }
        Ok(())
    }
}
