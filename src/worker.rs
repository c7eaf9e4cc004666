//! Background flush worker: batching, backpressure, retry, and supervision.
//!
//! One worker thread exists per pipeline. Producers and the worker share the
//! transport buffer and status record under a single mutex, with two condition
//! variables layered on top: `flush_signal` wakes the worker when payloads
//! arrive, `space_signal` wakes producers blocked on backpressure when the
//! worker frees space. Stop is an independent atomic flag so a shutdown
//! request can never be conflated with (or masked by) a flush wake-up.
//!
//! The worker owns the transport; the only other code path that touches it is
//! `fan_out` backpressure, which serializes through the transport lock.
//!
//! Failure handling uses two separate channels:
//! - transport send failures are `Result`s handled inline with bounded
//!   retry + reconnect, and
//! - unexpected worker faults are panics caught by the supervisor, which
//!   relaunches the loop until the restart budget is exhausted.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, trace, warn};

use crate::buffer::TransportBuffer;
use crate::config::{BackpressureMode, StreamConfig};
use crate::payload::Payload;
use crate::status::TransportStatus;
use crate::transport::TransportFactory;
use crate::{Result, TelemetryError};

/// Join bound for `close`; a non-responsive worker is detached, never killed.
const CLOSE_JOIN_TIMEOUT: Duration = Duration::from_secs(5);
/// Poll granularity while waiting for the worker thread to finish.
const JOIN_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
struct WorkerSettings {
    max_batch_size: u64,
    flush_interval_ticks: u64,
    max_attempts: u32,
    backoff: Duration,
    backpressure: BackpressureMode,
    block_timeout: Duration,
    restart_limit: u32,
    poll_interval: Duration,
}

impl WorkerSettings {
    fn from_config(config: &StreamConfig) -> Self {
        Self {
            max_batch_size: config.max_batch_size as u64,
            flush_interval_ticks: config.flush_interval_ticks,
            max_attempts: config.max_attempts,
            backoff: config.backoff(),
            backpressure: config.backpressure,
            block_timeout: config.block_timeout(),
            restart_limit: config.restart_limit,
            poll_interval: config.worker_poll_interval(),
        }
    }
}

struct PipelineState {
    buffer: TransportBuffer,
    status: TransportStatus,
    last_flush_tick: u64,
}

struct TransportSlot {
    factory: Box<dyn TransportFactory>,
    active: Option<Box<dyn crate::transport::Transport>>,
}

impl TransportSlot {
    /// Send through the active transport, creating it on first use so that
    /// connect failures flow through the same retry path as send failures.
    fn send(&mut self, payload: &[u8]) -> Result<()> {
        if self.active.is_none() {
            self.active = Some(self.factory.create()?);
        }
        match self.active.as_mut() {
            Some(transport) => transport.send(payload),
            None => Err(TelemetryError::transport("transport unavailable", None)),
        }
    }

    fn reset(&mut self) {
        if let Some(transport) = self.active.as_mut() {
            transport.reset();
        }
    }

    fn close(&mut self) {
        if let Some(mut transport) = self.active.take() {
            transport.close();
        }
    }
}

struct Shared {
    state: Mutex<PipelineState>,
    flush_signal: Condvar,
    space_signal: Condvar,
    stop: AtomicBool,
    failed: AtomicBool,
    transport: Mutex<TransportSlot>,
}

impl Shared {
    // the worker must keep running after a caller panics mid-update
    fn lock_state(&self) -> MutexGuard<'_, PipelineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_transport(&self) -> MutexGuard<'_, TransportSlot> {
        self.transport.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

/// Owns the background flush thread and the shared buffer/status pair.
///
/// `enqueue` is callable from any thread; the transport itself is touched
/// only by the worker (and the `fan_out` overflow path, under the transport
/// lock). See the module docs for the full concurrency model.
pub struct WorkerManager {
    shared: Arc<Shared>,
    settings: WorkerSettings,
    handle: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl WorkerManager {
    /// Build a manager around a validated configuration and a transport
    /// factory. Does not spawn the worker; call [`start`](Self::start).
    pub fn new(config: &StreamConfig, factory: Box<dyn TransportFactory>) -> Result<Self> {
        config.validate()?;
        let shared = Arc::new(Shared {
            state: Mutex::new(PipelineState {
                buffer: TransportBuffer::new(config.max_buffer_bytes),
                status: TransportStatus::new(),
                last_flush_tick: 0,
            }),
            flush_signal: Condvar::new(),
            space_signal: Condvar::new(),
            stop: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            transport: Mutex::new(TransportSlot { factory, active: None }),
        });
        Ok(Self {
            shared,
            settings: WorkerSettings::from_config(config),
            handle: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    /// Spawn the worker thread if none is alive. Idempotent.
    ///
    /// Fails once the restart budget is exhausted; a permanently halted
    /// worker requires constructing a new pipeline.
    pub fn start(&self) -> Result<()> {
        if self.shared.failed.load(Ordering::SeqCst) {
            return Err(TelemetryError::worker_fault(
                "restart budget exhausted, worker permanently stopped",
            ));
        }
        let mut handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = handle.as_ref()
            && !existing.is_finished()
        {
            return Ok(());
        }
        if let Some(finished) = handle.take() {
            let _ = finished.join();
        }

        self.shared.stop.store(false, Ordering::SeqCst);
        {
            let mut state = self.shared.lock_state();
            state.status.worker_alive = true;
            state.status.worker_error = None;
        }

        let shared = Arc::clone(&self.shared);
        let settings = self.settings.clone();
        let spawned = thread::Builder::new()
            .name("telegraph-flush".to_string())
            .spawn(move || supervise(&shared, &settings))
            .map_err(|err| {
                TelemetryError::worker_fault(format!("failed to spawn worker thread: {err}"))
            })?;
        *handle = Some(spawned);
        info!("flush worker started");
        Ok(())
    }

    /// Signal termination and optionally join the worker, bounded by
    /// `timeout`. A worker that fails to stop in time is detached, not
    /// force-killed.
    pub fn stop(&self, wait: bool, timeout: Duration) {
        self.shared.stop.store(true, Ordering::SeqCst);
        self.shared.flush_signal.notify_all();
        self.shared.space_signal.notify_all();
        if !wait {
            return;
        }
        let handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            let deadline = Instant::now() + timeout;
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(JOIN_POLL);
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                warn!(?timeout, "flush worker did not stop in time, detaching");
            }
        }
    }

    /// Stop the worker, then synchronously drain anything still buffered and
    /// release the transport. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop(true, CLOSE_JOIN_TIMEOUT);
        self.drain_remaining();
        self.shared.lock_transport().close();
        info!("telemetry pipeline closed");
    }

    /// Append a payload, applying the configured backpressure strategy if the
    /// buffer goes over its byte capacity. Callable from any thread.
    pub fn enqueue(&self, payload: Payload) {
        let tick = payload.tick();
        let mut state = self.shared.lock_state();
        state.buffer.append(payload);
        let queue_length = state.buffer.len();
        state.status.record_enqueue(tick, queue_length);

        if state.buffer.is_over_capacity() {
            match self.settings.backpressure {
                BackpressureMode::DropOldest => {
                    let dropped = state.buffer.drop_until_within_capacity();
                    state.status.record_dropped(dropped as u64);
                    state.status.queue_length = state.buffer.len();
                    debug!(dropped, "buffer over capacity, dropped oldest payloads");
                }
                BackpressureMode::Block => {
                    // let the worker drain while we wait
                    self.shared.flush_signal.notify_one();
                    state = self.block_until_space(state);
                }
                BackpressureMode::FanOut => {
                    self.fan_out_overflow(state);
                    self.shared.flush_signal.notify_one();
                    return;
                }
            }
        }
        drop(state);
        self.shared.flush_signal.notify_one();
    }

    /// Non-blocking snapshot of the shared status record.
    pub fn status(&self) -> TransportStatus {
        self.shared.lock_state().status.clone()
    }

    /// Bytes currently buffered.
    pub fn buffered_bytes(&self) -> usize {
        self.shared.lock_state().buffer.total_bytes()
    }

    /// Count a payload lost before it reached the buffer.
    pub(crate) fn record_drop(&self, reason: &str) {
        let mut state = self.shared.lock_state();
        state.status.record_dropped(1);
        state.status.last_error = Some(reason.to_string());
    }

    /// Wait (bounded to 3x the configured block timeout) for the worker to
    /// free space, then fall back to dropping the oldest payloads.
    fn block_until_space<'a>(
        &self,
        mut state: MutexGuard<'a, PipelineState>,
    ) -> MutexGuard<'a, PipelineState> {
        let deadline = Instant::now() + 3 * self.settings.block_timeout;
        while state.buffer.is_over_capacity() && !self.shared.stop_requested() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let (guard, _) = self
                .shared
                .space_signal
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
        if state.buffer.is_over_capacity() {
            let dropped = state.buffer.drop_until_within_capacity();
            state.status.record_dropped(dropped as u64);
            state.status.queue_length = state.buffer.len();
            warn!(dropped, "block backpressure deadline passed, dropped oldest payloads");
        }
        state
    }

    /// Pop overflow payloads and send them from the calling thread, bypassing
    /// the queue. Consumes the state guard; sends happen outside the lock.
    fn fan_out_overflow(&self, mut state: MutexGuard<'_, PipelineState>) {
        let mut overflow = Vec::new();
        while state.buffer.is_over_capacity() {
            match state.buffer.pop_front() {
                Some(payload) => overflow.push(payload),
                None => break,
            }
        }
        state.status.queue_length = state.buffer.len();
        drop(state);

        trace!(count = overflow.len(), "fan-out sending overflow from caller thread");
        for payload in overflow {
            let result = self.shared.lock_transport().send(payload.as_bytes());
            let mut state = self.shared.lock_state();
            match result {
                Ok(()) => state.status.record_send_success(payload.tick(), payload.len()),
                Err(err) => {
                    state.status.record_send_failure(payload.tick(), &err.to_string());
                    state.status.record_dropped(1);
                    warn!(error = %err, tick = payload.tick(), "fan-out send failed, payload dropped");
                }
            }
        }
    }

    fn drain_remaining(&self) {
        loop {
            let payload = {
                let mut state = self.shared.lock_state();
                let payload = state.buffer.pop_front();
                state.status.queue_length = state.buffer.len();
                payload
            };
            let Some(payload) = payload else { break };
            let result = self.shared.lock_transport().send(payload.as_bytes());
            let mut state = self.shared.lock_state();
            match result {
                Ok(()) => state.status.record_send_success(payload.tick(), payload.len()),
                Err(err) => {
                    state.status.record_send_failure(payload.tick(), &err.to_string());
                    let discarded = state.buffer.clear() as u64;
                    state.status.record_dropped(1 + discarded);
                    state.status.queue_length = 0;
                    warn!(error = %err, discarded, "drain send failed, discarding remainder");
                    break;
                }
            }
        }
    }
}

impl Drop for WorkerManager {
    fn drop(&mut self) {
        self.close();
    }
}

/// Relaunch the worker loop after faults until the restart budget runs out.
fn supervise(shared: &Arc<Shared>, settings: &WorkerSettings) {
    loop {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| run_loop(shared, settings)));
        match outcome {
            Ok(()) => {
                shared.lock_state().status.worker_alive = false;
                debug!("flush worker stopped");
                break;
            }
            Err(payload) => {
                let reason = panic_reason(payload.as_ref());
                error!(reason = %reason, "flush worker fault");
                let mut state = shared.lock_state();
                state.status.worker_alive = false;
                state.status.worker_error = Some(reason.clone());
                state.status.last_worker_error = Some(reason);
                if state.status.worker_restart_count >= settings.restart_limit {
                    shared.failed.store(true, Ordering::SeqCst);
                    error!(
                        restarts = state.status.worker_restart_count,
                        "restart budget exhausted, worker permanently stopped"
                    );
                    break;
                }
                state.status.worker_restart_count += 1;
                state.status.worker_alive = true;
                state.status.worker_error = None;
                let attempt = state.status.worker_restart_count;
                drop(state);
                warn!(attempt, limit = settings.restart_limit, "relaunching flush worker");
            }
        }
    }
    // wake anything blocked on a worker that is no longer running
    shared.space_signal.notify_all();
}

fn panic_reason(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "worker panicked".to_string()
    }
}

fn run_loop(shared: &Shared, settings: &WorkerSettings) {
    debug!("flush worker loop running");
    loop {
        let ready = {
            let mut state = shared.lock_state();
            if !shared.stop_requested() && !ready_to_flush(&state, settings) {
                let (guard, _) = shared
                    .flush_signal
                    .wait_timeout(state, settings.poll_interval)
                    .unwrap_or_else(PoisonError::into_inner);
                state = guard;
            }
            ready_to_flush(&state, settings)
        };
        if shared.stop_requested() {
            // one final best-effort flush before exiting
            flush_pending(shared, settings);
            return;
        }
        if ready {
            flush_pending(shared, settings);
        }
    }
}

/// Whether the buffer should be flushed now.
///
/// With `flush_interval_ticks <= 1` any non-empty buffer is flushable;
/// otherwise flush only once enough ticks have been enqueued since the last
/// flush.
fn ready_to_flush(state: &PipelineState, settings: &WorkerSettings) -> bool {
    if state.buffer.is_empty() {
        return false;
    }
    if settings.flush_interval_ticks <= 1 {
        return true;
    }
    state.status.latest_enqueue_tick.saturating_sub(state.last_flush_tick)
        >= settings.flush_interval_ticks
}

/// Pop and send until the buffer is empty or the batch cap is hit. The state
/// lock is held only for each pop, never across a send.
fn flush_pending(shared: &Shared, settings: &WorkerSettings) {
    let started = Instant::now();
    let mut batch_count: u64 = 0;
    let mut batch_bytes: u64 = 0;
    let mut did_work = false;

    loop {
        if settings.max_batch_size > 0 && batch_count >= settings.max_batch_size {
            break;
        }
        let payload = {
            let mut state = shared.lock_state();
            let payload = state.buffer.pop_front();
            state.status.queue_length = state.buffer.len();
            payload
        };
        let Some(payload) = payload else { break };
        did_work = true;
        shared.space_signal.notify_all();

        if send_with_retry(shared, settings, &payload) {
            batch_count += 1;
            batch_bytes += payload.len() as u64;
            trace!(tick = payload.tick(), bytes = payload.len(), "payload flushed");
        } else {
            // systemic failure: this payload is lost and the rest of the
            // buffered batch is discarded rather than retried one by one
            let mut state = shared.lock_state();
            let discarded = state.buffer.clear() as u64;
            state.status.record_dropped(1 + discarded);
            state.status.queue_length = 0;
            drop(state);
            shared.space_signal.notify_all();
            warn!(
                tick = payload.tick(),
                discarded, "retries exhausted, discarding buffered batch"
            );
            break;
        }
    }

    if did_work {
        let mut state = shared.lock_state();
        state.status.last_flush_duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        state.status.last_batch_count = batch_count;
        state.status.last_flush_payload_bytes = batch_bytes;
        state.last_flush_tick = state.status.latest_enqueue_tick;
    }
}

/// Deliver one payload with up to `max_attempts + 1` attempts and a fixed
/// backoff between them, resetting the transport after each failure so the
/// next attempt reconnects.
fn send_with_retry(shared: &Shared, settings: &WorkerSettings, payload: &Payload) -> bool {
    for attempt in 0..=settings.max_attempts {
        let result = shared.lock_transport().send(payload.as_bytes());
        match result {
            Ok(()) => {
                let mut state = shared.lock_state();
                state.status.record_send_success(payload.tick(), payload.len());
                return true;
            }
            Err(err) => {
                {
                    let mut state = shared.lock_state();
                    state.status.record_send_failure(payload.tick(), &err.to_string());
                }
                warn!(
                    attempt,
                    max_attempts = settings.max_attempts,
                    error = %err,
                    "telemetry send failed"
                );
                shared.lock_transport().reset();
                if attempt < settings.max_attempts {
                    thread::sleep(settings.backoff);
                }
            }
        }
    }
    false
}
