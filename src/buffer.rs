//! Bounded FIFO payload buffer shared between producers and the flush worker.
//!
//! The buffer tracks its total byte footprint incrementally so capacity checks
//! are O(1). It never blocks and never drops on its own; overflow policy is
//! the worker's responsibility (see [`crate::worker`]).

use std::collections::VecDeque;

use crate::payload::Payload;

/// In-memory FIFO byte-payload queue with a cached byte total.
///
/// Invariant: `total_bytes` equals the sum of the lengths of all queued
/// payloads after every operation.
#[derive(Debug)]
pub struct TransportBuffer {
    queue: VecDeque<Payload>,
    total_bytes: usize,
    max_buffer_bytes: usize,
}

impl TransportBuffer {
    pub fn new(max_buffer_bytes: usize) -> Self {
        Self { queue: VecDeque::new(), total_bytes: 0, max_buffer_bytes }
    }

    /// Append a payload to the tail. O(1).
    pub fn append(&mut self, payload: Payload) {
        self.total_bytes += payload.len();
        self.queue.push_back(payload);
    }

    /// Pop the oldest payload, or `None` if the buffer is empty.
    pub fn pop_front(&mut self) -> Option<Payload> {
        let payload = self.queue.pop_front()?;
        self.total_bytes -= payload.len();
        Some(payload)
    }

    /// Whether the buffered bytes exceed the configured capacity.
    pub fn is_over_capacity(&self) -> bool {
        self.total_bytes > self.max_buffer_bytes
    }

    /// Pop the oldest payloads until within capacity or empty.
    ///
    /// Returns the exact number of payloads dropped.
    pub fn drop_until_within_capacity(&mut self) -> usize {
        let mut dropped = 0;
        while self.is_over_capacity() && self.pop_front().is_some() {
            dropped += 1;
        }
        dropped
    }

    /// Discard everything, returning the number of payloads removed.
    pub fn clear(&mut self) -> usize {
        let removed = self.queue.len();
        self.queue.clear();
        self.total_bytes = 0;
        removed
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Current buffered byte total.
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    /// Configured byte capacity.
    pub fn max_buffer_bytes(&self) -> usize {
        self.max_buffer_bytes
    }
}
