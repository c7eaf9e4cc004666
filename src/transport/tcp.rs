//! TCP sink.

use std::io::Write;
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, info};

use super::Transport;
use crate::{Result, TelemetryError};

/// Split `host:port`, tolerating bracketed IPv6 hosts.
pub(crate) fn parse_endpoint(endpoint: &str) -> Result<(String, u16)> {
    let (host, port) = endpoint
        .rsplit_once(':')
        .ok_or_else(|| TelemetryError::endpoint(endpoint, "expected host:port"))?;
    if host.is_empty() {
        return Err(TelemetryError::endpoint(endpoint, "missing host"));
    }
    let port: u16 = port
        .parse()
        .map_err(|_| TelemetryError::endpoint(endpoint, format!("invalid port '{port}'")))?;
    let host = host.trim_start_matches('[').trim_end_matches(']').to_string();
    Ok((host, port))
}

/// Blocking TCP sink with explicit connect and send timeouts.
///
/// A connect or send failure surfaces a transport error without internal
/// retries; the worker owns retry policy. `reset` drops the stream so the
/// next send reconnects.
#[derive(Debug)]
pub struct TcpTransport {
    endpoint: String,
    host: String,
    port: u16,
    connect_timeout: Duration,
    send_timeout: Duration,
    stream: Option<TcpStream>,
}

impl TcpTransport {
    /// Parse `endpoint` and open a connection eagerly.
    pub fn connect(
        endpoint: &str,
        connect_timeout: Duration,
        send_timeout: Duration,
    ) -> Result<Self> {
        let (host, port) = parse_endpoint(endpoint)?;
        let mut transport = Self {
            endpoint: endpoint.to_string(),
            host,
            port,
            connect_timeout,
            send_timeout,
            stream: None,
        };
        transport.stream = Some(transport.open_stream()?);
        info!(endpoint = %transport.endpoint, "telemetry tcp sink connected");
        Ok(transport)
    }

    fn open_stream(&self) -> Result<TcpStream> {
        let addrs: Vec<SocketAddr> = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|err| {
                TelemetryError::transport(format!("resolve {}", self.endpoint), Some(err))
            })?
            .collect();

        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => {
                    stream.set_write_timeout(Some(self.send_timeout)).map_err(|err| {
                        TelemetryError::transport(
                            format!("set send timeout on {}", self.endpoint),
                            Some(err),
                        )
                    })?;
                    debug!(endpoint = %self.endpoint, %addr, "tcp stream established");
                    return Ok(stream);
                }
                Err(err) => last_err = Some(err),
            }
        }
        let context = match last_err {
            Some(_) => format!("connect to {}", self.endpoint),
            None => format!("no addresses resolved for {}", self.endpoint),
        };
        Err(TelemetryError::transport(context, last_err))
    }
}

impl Transport for TcpTransport {
    fn send(&mut self, payload: &[u8]) -> Result<()> {
        if self.stream.is_none() {
            self.stream = Some(self.open_stream()?);
        }
        let result = match self.stream.as_mut() {
            Some(stream) => stream.write_all(payload),
            None => return Err(TelemetryError::transport("tcp stream missing", None)),
        };
        if let Err(err) = result {
            // the connection is broken; drop it so the next send reconnects
            self.stream = None;
            return Err(TelemetryError::transport(
                format!("tcp send to {}", self.endpoint),
                Some(err),
            ));
        }
        Ok(())
    }

    fn reset(&mut self) {
        if self.stream.take().is_some() {
            debug!(endpoint = %self.endpoint, "tcp stream reset");
        }
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn parse_endpoint_accepts_host_port() {
        assert_eq!(parse_endpoint("sink.local:9000").unwrap(), ("sink.local".to_string(), 9000));
        assert_eq!(parse_endpoint("127.0.0.1:80").unwrap(), ("127.0.0.1".to_string(), 80));
        assert_eq!(parse_endpoint("[::1]:9000").unwrap(), ("::1".to_string(), 9000));
    }

    #[test]
    fn parse_endpoint_rejects_malformed_input() {
        assert!(parse_endpoint("no-port-here").is_err());
        assert!(parse_endpoint(":9000").is_err());
        assert!(parse_endpoint("host:notaport").is_err());
        assert!(parse_endpoint("host:70000").is_err());
    }

    #[test]
    fn sends_over_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = listener.local_addr().unwrap().to_string();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut received = Vec::new();
            stream.read_to_end(&mut received).unwrap();
            received
        });

        let mut transport =
            TcpTransport::connect(&endpoint, Duration::from_secs(2), Duration::from_secs(2))
                .unwrap();
        transport.send(b"{\"tick\":1}\n").unwrap();
        transport.close();

        assert_eq!(server.join().unwrap(), b"{\"tick\":1}\n");
    }

    #[test]
    fn reset_forces_reconnect_on_next_send() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = listener.local_addr().unwrap().to_string();
        let server = thread::spawn(move || {
            let mut payloads = Vec::new();
            for _ in 0..2 {
                let (mut stream, _) = listener.accept().unwrap();
                let mut received = Vec::new();
                stream.read_to_end(&mut received).unwrap();
                payloads.push(received);
            }
            payloads
        });

        let mut transport =
            TcpTransport::connect(&endpoint, Duration::from_secs(2), Duration::from_secs(2))
                .unwrap();
        transport.send(b"first\n").unwrap();
        transport.reset();
        transport.send(b"second\n").unwrap();
        transport.close();

        let payloads = server.join().unwrap();
        assert_eq!(payloads[0], b"first\n");
        assert_eq!(payloads[1], b"second\n");
    }

    #[test]
    fn refused_connection_is_a_retryable_transport_error() {
        // bind then drop to get a port with nothing listening
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err =
            TcpTransport::connect(&endpoint, Duration::from_millis(500), Duration::from_secs(1))
                .unwrap_err();
        assert!(matches!(err, TelemetryError::Transport { .. }));
        assert!(err.is_retryable());
    }
}
