//! Test doubles for pipeline tests and benchmarks.
//!
//! [`MockTransport`] is a shared-handle sink: clones share one inner record,
//! so a test can hold a handle while the worker owns another. It also acts as
//! its own [`TransportFactory`], handing the worker a fresh clone on demand.

use std::sync::{Arc, Mutex, PoisonError};

use crate::transport::{Transport, TransportFactory};
use crate::{Result, TelemetryError};

#[derive(Debug, Default)]
struct MockInner {
    sent: Vec<Vec<u8>>,
    remaining_failures: usize,
    fail_always: bool,
    panic_on_send: bool,
    resets: usize,
    creates: usize,
    closed: bool,
}

/// Scriptable in-memory transport recording everything sent through it.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockInner>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail the next `count` sends, then succeed.
    pub fn fail_times(&self, count: usize) {
        self.lock().remaining_failures = count;
    }

    /// Fail every send.
    pub fn fail_always(&self) {
        self.lock().fail_always = true;
    }

    /// Panic on send, simulating an internal worker fault rather than an
    /// expected transport failure.
    pub fn panic_on_send(&self) {
        self.lock().panic_on_send = true;
    }

    /// Every payload delivered, in order.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.lock().sent.clone()
    }

    /// Delivered payloads as trimmed UTF-8 lines.
    pub fn sent_lines(&self) -> Vec<String> {
        self.lock()
            .sent
            .iter()
            .map(|bytes| String::from_utf8_lossy(bytes).trim_end().to_string())
            .collect()
    }

    pub fn send_count(&self) -> usize {
        self.lock().sent.len()
    }

    pub fn reset_count(&self) -> usize {
        self.lock().resets
    }

    /// Times the factory handed out a transport instance.
    pub fn create_count(&self) -> usize {
        self.lock().creates
    }

    pub fn closed(&self) -> bool {
        self.lock().closed
    }
}

impl Transport for MockTransport {
    fn send(&mut self, payload: &[u8]) -> Result<()> {
        let mut inner = self.lock();
        if inner.panic_on_send {
            panic!("mock transport fault");
        }
        if inner.fail_always {
            return Err(TelemetryError::transport("mock send failure", None));
        }
        if inner.remaining_failures > 0 {
            inner.remaining_failures -= 1;
            return Err(TelemetryError::transport("mock send failure", None));
        }
        inner.sent.push(payload.to_vec());
        Ok(())
    }

    fn reset(&mut self) {
        self.lock().resets += 1;
    }

    fn close(&mut self) {
        self.lock().closed = true;
    }
}

impl TransportFactory for MockTransport {
    fn create(&self) -> Result<Box<dyn Transport>> {
        let mut inner = self.lock();
        inner.creates += 1;
        drop(inner);
        Ok(Box::new(self.clone()))
    }
}
