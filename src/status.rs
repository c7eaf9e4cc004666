//! Shared pipeline health counters.
//!
//! One [`TransportStatus`] record exists per pipeline. It is created at
//! construction, mutated continuously while the worker runs, and read at any
//! time by health-check collaborators via a cloned snapshot — reads never
//! wait on in-flight sends because the status lock is never held across I/O.
//! Counters are never reset except by constructing a new pipeline.

use serde::{Deserialize, Serialize};

/// Health and delivery counters shared between producers and the worker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransportStatus {
    /// Whether the last send attempt reached the sink.
    pub connected: bool,
    /// Payloads currently buffered.
    pub queue_length: usize,
    /// High-water mark of `queue_length`.
    pub queue_length_peak: usize,
    /// Payloads lost to backpressure or retry exhaustion.
    pub dropped_messages: u64,
    /// Duration of the most recent flush pass, in milliseconds.
    pub last_flush_duration_ms: f64,
    /// Payloads delivered by the most recent flush pass.
    pub last_batch_count: u64,
    /// Bytes delivered by the most recent flush pass.
    pub last_flush_payload_bytes: u64,
    /// Payloads delivered since construction.
    pub payloads_flushed_total: u64,
    /// Bytes delivered since construction.
    pub bytes_flushed_total: u64,
    /// Whether the background worker is currently running.
    pub worker_alive: bool,
    /// The fault that took the worker down, if it is currently down.
    pub worker_error: Option<String>,
    /// The most recent worker fault, sticky across restarts.
    pub last_worker_error: Option<String>,
    /// Times the worker has been relaunched after a fault.
    pub worker_restart_count: u32,
    /// Send failures since the last successful send.
    pub consecutive_send_failures: u32,
    /// Send failures since construction.
    pub send_failures_total: u64,
    /// Tick of the most recently enqueued payload.
    pub latest_enqueue_tick: u64,
    /// Tick of the last payload delivered successfully.
    pub last_success_tick: Option<u64>,
    /// Tick of the last payload whose send attempt failed.
    pub last_failure_tick: Option<u64>,
    /// Message of the most recent transport error.
    pub last_error: Option<String>,
}

impl TransportStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an enqueue, maintaining the queue high-water mark.
    pub(crate) fn record_enqueue(&mut self, tick: u64, queue_length: usize) {
        self.latest_enqueue_tick = tick;
        self.queue_length = queue_length;
        self.queue_length_peak = self.queue_length_peak.max(queue_length);
    }

    /// Record a delivered payload.
    pub(crate) fn record_send_success(&mut self, tick: u64, bytes: usize) {
        self.connected = true;
        self.consecutive_send_failures = 0;
        self.last_success_tick = Some(tick);
        self.payloads_flushed_total += 1;
        self.bytes_flushed_total += bytes as u64;
    }

    /// Record a failed send attempt.
    pub(crate) fn record_send_failure(&mut self, tick: u64, error: &str) {
        self.connected = false;
        self.consecutive_send_failures += 1;
        self.send_failures_total += 1;
        self.last_failure_tick = Some(tick);
        self.last_error = Some(error.to_string());
    }

    /// Record payloads lost to backpressure or retry exhaustion.
    pub(crate) fn record_dropped(&mut self, count: u64) {
        self.dropped_messages += count;
    }
}
