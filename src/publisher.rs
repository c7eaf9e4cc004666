//! The boundary object simulation collaborators hold.
//!
//! [`TelemetryPublisher`] wires the payload builder to the worker: `emit`
//! builds one record per tick (diff computation happens in the calling
//! thread, so diff-sequence order always matches enqueue order), serializes
//! it, and enqueues it for background delivery. Delivery problems are never
//! raised to the caller; they show up in the [`TransportStatus`] snapshot
//! read through [`status`](TelemetryPublisher::status).

use serde_json::Value;
use tracing::{error, info};

use crate::config::StreamConfig;
use crate::payload::StreamPayloadBuilder;
use crate::status::TransportStatus;
use crate::transport::{ConfigTransportFactory, TransportFactory};
use crate::worker::WorkerManager;
use crate::Result;

/// Emits per-tick telemetry snapshots to a background delivery pipeline.
pub struct TelemetryPublisher {
    builder: StreamPayloadBuilder,
    worker: WorkerManager,
}

impl TelemetryPublisher {
    /// Validate `config`, build the configured transport factory, and start
    /// the worker. Misconfiguration is the only startup abort; an unreachable
    /// sink becomes a retryable send fault once the worker runs.
    pub fn new(config: StreamConfig) -> Result<Self> {
        let factory = ConfigTransportFactory::from_config(&config.transport)?;
        Self::with_factory(config, Box::new(factory))
    }

    /// Like [`new`](Self::new), with a caller-supplied transport factory.
    /// Used by tests and by embedders with custom sinks.
    pub fn with_factory(config: StreamConfig, factory: Box<dyn TransportFactory>) -> Result<Self> {
        config.validate()?;
        let builder =
            StreamPayloadBuilder::new(config.schema_version.clone(), config.diff_enabled);
        let worker = WorkerManager::new(&config, factory)?;
        worker.start()?;
        info!(
            diff_enabled = config.diff_enabled,
            schema_version = %config.schema_version,
            "telemetry publisher started"
        );
        Ok(Self { builder, worker })
    }

    /// Build and enqueue one record for `tick` from the named signal groups.
    ///
    /// Never blocks beyond the configured backpressure policy and never
    /// fails; a record that cannot be serialized is counted as dropped.
    pub fn emit<I, K>(&mut self, tick: u64, signals: I)
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let record = self.builder.build(tick, signals);
        match record.to_payload() {
            Ok(payload) => self.worker.enqueue(payload),
            Err(err) => {
                error!(tick, error = %err, "failed to serialize telemetry record");
                self.worker.record_drop(&err.to_string());
            }
        }
    }

    /// Read-only health snapshot. Never blocks on in-flight sends.
    pub fn status(&self) -> TransportStatus {
        self.worker.status()
    }

    /// Forget the cached diff baseline so the next `emit` sends a full
    /// snapshot. Call after importing external state.
    pub fn reset_stream_state(&mut self) {
        self.builder.reset();
    }

    /// Stop the worker, drain anything still buffered, and release the
    /// transport. Also runs on drop.
    pub fn close(&mut self) {
        self.worker.close();
    }
}

impl std::fmt::Debug for TelemetryPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryPublisher").finish_non_exhaustive()
    }
}

impl Drop for TelemetryPublisher {
    fn drop(&mut self) {
        self.worker.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockTransport;
    use serde_json::json;

    fn test_config() -> StreamConfig {
        StreamConfig {
            worker_poll_seconds: 0.02,
            backoff_seconds: 0.0,
            ..StreamConfig::default()
        }
    }

    #[test]
    fn emit_builds_snapshot_then_diffs() {
        let mock = MockTransport::new();
        let mut publisher =
            TelemetryPublisher::with_factory(test_config(), Box::new(mock.clone())).unwrap();

        publisher.emit(1, [("agents", json!({"alice": 1}))]);
        publisher.emit(2, [("agents", json!({"alice": 2}))]);
        publisher.close();

        let lines = mock.sent_lines();
        assert_eq!(lines.len(), 2);
        let first: Value = serde_json::from_str(&lines[0]).unwrap();
        let second: Value = serde_json::from_str(&lines[1]).unwrap();
        assert_eq!(first["payload_type"], json!("snapshot"));
        assert_eq!(second["payload_type"], json!("diff"));
        assert_eq!(second["changes"]["agents"]["alice"], json!(2));
    }

    #[test]
    fn reset_stream_state_forces_snapshot() {
        let mock = MockTransport::new();
        let mut publisher =
            TelemetryPublisher::with_factory(test_config(), Box::new(mock.clone())).unwrap();

        publisher.emit(1, [("a", json!(1))]);
        publisher.reset_stream_state();
        publisher.emit(2, [("a", json!(1))]);
        publisher.close();

        let lines = mock.sent_lines();
        let second: Value = serde_json::from_str(&lines[1]).unwrap();
        assert_eq!(second["payload_type"], json!("snapshot"));
    }

    #[test]
    fn status_reflects_delivery() {
        let mock = MockTransport::new();
        let mut publisher =
            TelemetryPublisher::with_factory(test_config(), Box::new(mock)).unwrap();

        publisher.emit(3, [("a", json!(1))]);
        publisher.close();

        let status = publisher.status();
        assert_eq!(status.payloads_flushed_total, 1);
        assert_eq!(status.latest_enqueue_tick, 3);
        assert_eq!(status.queue_length, 0);
        assert!(!status.worker_alive);
    }
}
