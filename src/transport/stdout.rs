//! Stdout sink.

use std::io::Write;

use super::Transport;
use crate::{Result, TelemetryError};

/// Writes raw payload bytes to the process's standard output stream and
/// flushes immediately, so records interleave cleanly with other writers.
#[derive(Debug, Default)]
pub struct StdoutTransport;

impl StdoutTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for StdoutTransport {
    fn send(&mut self, payload: &[u8]) -> Result<()> {
        let mut out = std::io::stdout().lock();
        out.write_all(payload)
            .and_then(|()| out.flush())
            .map_err(|err| TelemetryError::transport("stdout write", Some(err)))
    }

    fn reset(&mut self) {
        // stdout has no connection state
    }

    fn close(&mut self) {
        let _ = std::io::stdout().lock().flush();
    }
}
