//! Pluggable sinks for serialized telemetry payloads.
//!
//! A [`Transport`] is a blocking byte sink touched only by the flush worker
//! (the `fan_out` backpressure path is the one exception, and it serializes
//! access through the worker's transport lock). Transports do not retry:
//! a failed send surfaces a [`TelemetryError::Transport`] and retry/reconnect
//! policy stays with the worker.
//!
//! [`ConfigTransportFactory`] validates the transport configuration eagerly —
//! missing or malformed fields fail pipeline construction — but creates the
//! sink itself on demand inside the worker, so an unreachable endpoint is a
//! retryable send fault rather than a startup abort.

mod file;
mod stdout;
mod tcp;

pub use file::FileTransport;
pub use stdout::StdoutTransport;
pub use tcp::TcpTransport;

use crate::config::{TransportConfig, TransportKind};
use crate::{Result, TelemetryError};

/// Blocking byte sink for telemetry payloads.
pub trait Transport: Send {
    /// Deliver one payload. Blocks until the sink accepts the full write.
    fn send(&mut self, payload: &[u8]) -> Result<()>;

    /// Drop connection state so the next send reconnects.
    fn reset(&mut self);

    /// Release the sink. Further sends are undefined.
    fn close(&mut self);
}

/// Creates transport instances for the worker.
///
/// The worker recreates the transport after `reset` tears connection state
/// down, so creation failures (e.g. a refused TCP connect) flow through the
/// same retry path as send failures.
pub trait TransportFactory: Send {
    fn create(&self) -> Result<Box<dyn Transport>>;
}

/// Factory selecting the sink variant from configuration.
#[derive(Debug, Clone)]
pub struct ConfigTransportFactory {
    config: TransportConfig,
}

impl ConfigTransportFactory {
    /// Validate the configured variant's required fields, failing fast with a
    /// descriptive error before any worker starts.
    pub fn from_config(config: &TransportConfig) -> Result<Self> {
        match config.kind {
            TransportKind::Stdout => {}
            TransportKind::File => {
                if config.file_path.is_none() {
                    return Err(TelemetryError::config(
                        "file transport requires file_path",
                    ));
                }
            }
            TransportKind::Tcp => {
                let endpoint = config.endpoint.as_deref().ok_or_else(|| {
                    TelemetryError::config("tcp transport requires endpoint")
                })?;
                tcp::parse_endpoint(endpoint)?;
            }
        }
        Ok(Self { config: config.clone() })
    }
}

impl TransportFactory for ConfigTransportFactory {
    fn create(&self) -> Result<Box<dyn Transport>> {
        match self.config.kind {
            TransportKind::Stdout => Ok(Box::new(StdoutTransport::new())),
            TransportKind::File => {
                let path = self.config.file_path.as_ref().ok_or_else(|| {
                    TelemetryError::config("file transport requires file_path")
                })?;
                Ok(Box::new(FileTransport::open(path)?))
            }
            TransportKind::Tcp => {
                let endpoint = self.config.endpoint.as_deref().ok_or_else(|| {
                    TelemetryError::config("tcp transport requires endpoint")
                })?;
                Ok(Box::new(TcpTransport::connect(
                    endpoint,
                    self.config.connect_timeout(),
                    self.config.send_timeout(),
                )?))
            }
        }
    }
}
