use std::net::{Ipv4Addr, SocketAddr, TcpListener, ToSocketAddrs};
use std::os::fd::{AsRawFd, RawFd};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::BuxStream;

/// Listening TCP socket transport, bound to the any-address.
pub struct TcpServerSocket {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TcpServerSocket {
    /// Bind and listen on `0.0.0.0:port`. Port 0 picks an ephemeral port.
    pub fn bind(port: u16) -> Result<Self> {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        let listener = TcpListener::bind(addr).map_err(|e| TransportError::Bind {
            endpoint: addr.to_string(),
            source: e,
        })?;
        let local_addr = listener.local_addr().map_err(|e| TransportError::Bind {
            endpoint: addr.to_string(),
            source: e,
        })?;

        info!(port = local_addr.port(), "listening on tcp socket");

        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Accept an incoming connection.
    ///
    /// When the listener is in nonblocking mode and no connection is
    /// pending this returns a `WouldBlock` accept error.
    pub fn accept(&self) -> Result<BuxStream> {
        let (stream, peer) = self.listener.accept().map_err(TransportError::Accept)?;
        debug!(%peer, "accepted tcp connection");
        Ok(BuxStream::from_tcp(stream))
    }

    /// Switch the listener between blocking and nonblocking accept.
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        self.listener.set_nonblocking(nonblocking).map_err(Into::into)
    }

    /// The port this socket is actually bound to.
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }
}

impl AsRawFd for TcpServerSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.listener.as_raw_fd()
    }
}

/// Resolve `host` and connect to the first reachable address on `port`.
///
/// Name resolution failures are reported separately from connection
/// failures so callers can distinguish them.
pub fn connect(host: &str, port: u16) -> Result<BuxStream> {
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| TransportError::Resolve {
            host: host.to_string(),
            source: e,
        })?
        .collect();

    if addrs.is_empty() {
        return Err(TransportError::Resolve {
            host: host.to_string(),
            source: std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "hostname resolved to no addresses",
            ),
        });
    }

    let mut last_error = None;
    for addr in &addrs {
        match std::net::TcpStream::connect(addr) {
            Ok(stream) => {
                debug!(%addr, "connected to tcp socket");
                return Ok(BuxStream::from_tcp(stream));
            }
            Err(e) => last_error = Some(e),
        }
    }

    Err(TransportError::Connect {
        endpoint: format!("{host}:{port}"),
        source: last_error.unwrap_or_else(|| std::io::Error::other("no address tried")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    #[test]
    fn bind_connect_accept() {
        let listener = TcpServerSocket::bind(0).unwrap();
        let port = listener.port();
        assert_ne!(port, 0);

        let handle = std::thread::spawn(move || {
            let mut client = connect("localhost", port).unwrap();
            client.write_all(b"ping").unwrap();
        });

        let mut server = listener.accept().unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");

        handle.join().unwrap();
    }

    #[test]
    fn resolve_failure_is_distinct() {
        let result = connect("definitely-not-a-real-host.invalid", 1637);
        assert!(matches!(result, Err(TransportError::Resolve { .. })));
    }

    #[test]
    fn connect_failure_reports_endpoint() {
        // Bind then immediately drop to find a port nothing listens on.
        let port = {
            let listener = TcpServerSocket::bind(0).unwrap();
            listener.port()
        };
        match connect("127.0.0.1", port) {
            Err(TransportError::Connect { endpoint, .. }) => {
                assert!(endpoint.contains(&port.to_string()));
            }
            other => panic!("expected connect failure, got {other:?}"),
        }
    }

    #[test]
    fn nonblocking_accept_would_block() {
        let listener = TcpServerSocket::bind(0).unwrap();
        listener.set_nonblocking(true).unwrap();
        match listener.accept() {
            Err(TransportError::Accept(e)) => {
                assert_eq!(e.kind(), std::io::ErrorKind::WouldBlock);
            }
            other => panic!("expected WouldBlock accept, got {other:?}"),
        }
    }
}
