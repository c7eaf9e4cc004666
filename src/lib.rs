//! Durable, ordered, backpressure-aware telemetry streaming.
//!
//! Telegraph is the outbound telemetry pipeline of a multi-agent simulation
//! platform: it turns per-tick simulation snapshots into newline-delimited
//! JSON records and delivers them to an external sink (stdout, a local file,
//! or a TCP endpoint) with bounded memory, automatic retry/reconnect, and
//! crash-resilient worker supervision.
//!
//! # Features
//!
//! - **Bounded memory**: a byte-budgeted FIFO buffer with three overflow
//!   strategies (`drop_oldest`, `block`, `fan_out`)
//! - **Best-effort delivery, quantified loss**: every dropped payload is
//!   counted; nothing is lost silently
//! - **Diff protocol**: repeated snapshots shrink to per-field deltas
//! - **Supervised worker**: one background flush thread per pipeline,
//!   relaunched after internal faults up to a configured restart budget
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use serde_json::json;
//! use telegraph::{StreamConfig, Telegraph};
//!
//! fn main() -> telegraph::Result<()> {
//!     let mut publisher = Telegraph::publish(StreamConfig::default())?;
//!
//!     publisher.emit(1, [
//!         ("agents", json!({"alice": {"energy": 0.9}})),
//!         ("world", json!({"weather": "clear"})),
//!     ]);
//!
//!     let status = publisher.status();
//!     assert_eq!(status.latest_enqueue_tick, 1);
//!
//!     publisher.close();
//!     Ok(())
//! }
//! ```

// Core types and error handling
pub mod buffer;
pub mod config;
mod error;
pub mod payload;
pub mod status;
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;

// Delivery pipeline
pub mod publisher;
pub mod transport;
pub mod worker;

// Core exports
pub use buffer::TransportBuffer;
pub use config::{BackpressureMode, StreamConfig, TransportConfig, TransportKind};
pub use error::{Result, TelemetryError};
pub use payload::{Payload, PayloadKind, StreamPayloadBuilder, TelemetryRecord};
pub use status::TransportStatus;

// Pipeline exports
pub use publisher::TelemetryPublisher;
pub use transport::{
    ConfigTransportFactory, FileTransport, StdoutTransport, TcpTransport, Transport,
    TransportFactory,
};
pub use worker::WorkerManager;

/// Unified entry point for telemetry pipelines.
///
/// # Examples
///
/// ```rust,no_run
/// use telegraph::{StreamConfig, Telegraph};
///
/// fn main() -> telegraph::Result<()> {
///     let publisher = Telegraph::publish(StreamConfig::default())?;
///     // hand the publisher to the simulation loop...
///     # drop(publisher);
///     Ok(())
/// }
/// ```
pub struct Telegraph;

impl Telegraph {
    /// Build and start a publisher for the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error only for construction-time misconfiguration
    /// (missing `file_path` for a file sink, malformed `endpoint`, invalid
    /// numeric settings). An unreachable endpoint does not fail here; it
    /// surfaces through the status counters once the worker retries.
    pub fn publish(config: StreamConfig) -> Result<TelemetryPublisher> {
        TelemetryPublisher::new(config)
    }

    /// Build and start a publisher with a caller-supplied transport factory.
    pub fn publish_with_factory(
        config: StreamConfig,
        factory: Box<dyn TransportFactory>,
    ) -> Result<TelemetryPublisher> {
        TelemetryPublisher::with_factory(config, factory)
    }
}
