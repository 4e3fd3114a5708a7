use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;

use crate::error::Result;

/// Which socket family a connected stream belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    /// A filesystem-path Unix domain socket.
    Local,
    /// An internet-domain TCP socket.
    Tcp,
}

impl SocketKind {
    /// Transport name for diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            SocketKind::Local => "local",
            SocketKind::Tcp => "tcp",
        }
    }
}

/// A connected byte stream — implements Read + Write.
///
/// This is the fundamental I/O type returned by transport operations.
/// It wraps either a Unix domain socket stream or a TCP stream; both
/// carry the identical length-prefixed message framing.
pub struct BuxStream {
    inner: StreamInner,
}

enum StreamInner {
    Unix(UnixStream),
    Tcp(TcpStream),
}

impl Read for BuxStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            StreamInner::Unix(stream) => stream.read(buf),
            StreamInner::Tcp(stream) => stream.read(buf),
        }
    }
}

impl Write for BuxStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            StreamInner::Unix(stream) => stream.write(buf),
            StreamInner::Tcp(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            StreamInner::Unix(stream) => stream.flush(),
            StreamInner::Tcp(stream) => stream.flush(),
        }
    }
}

impl BuxStream {
    pub(crate) fn from_unix(stream: UnixStream) -> Self {
        Self {
            inner: StreamInner::Unix(stream),
        }
    }

    pub(crate) fn from_tcp(stream: TcpStream) -> Self {
        Self {
            inner: StreamInner::Tcp(stream),
        }
    }

    /// The socket family of this stream.
    pub fn kind(&self) -> SocketKind {
        match &self.inner {
            StreamInner::Unix(_) => SocketKind::Local,
            StreamInner::Tcp(_) => SocketKind::Tcp,
        }
    }

    /// Switch the underlying socket between blocking and nonblocking mode.
    ///
    /// The mode is a property of the open file description, so it is
    /// shared with any clone of this stream.
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        match &self.inner {
            StreamInner::Unix(stream) => stream.set_nonblocking(nonblocking).map_err(Into::into),
            StreamInner::Tcp(stream) => stream.set_nonblocking(nonblocking).map_err(Into::into),
        }
    }

    /// Try to clone this stream (creates a new file descriptor).
    pub fn try_clone(&self) -> Result<Self> {
        match &self.inner {
            StreamInner::Unix(stream) => Ok(Self::from_unix(stream.try_clone()?)),
            StreamInner::Tcp(stream) => Ok(Self::from_tcp(stream.try_clone()?)),
        }
    }

    /// Shut down both halves of the connection.
    ///
    /// The peer observes end-of-stream on its next read even while clones
    /// of the descriptor are still alive.
    pub fn shutdown(&self) -> Result<()> {
        match &self.inner {
            StreamInner::Unix(stream) => stream.shutdown(Shutdown::Both).map_err(Into::into),
            StreamInner::Tcp(stream) => stream.shutdown(Shutdown::Both).map_err(Into::into),
        }
    }
}

impl AsRawFd for BuxStream {
    fn as_raw_fd(&self) -> RawFd {
        match &self.inner {
            StreamInner::Unix(stream) => stream.as_raw_fd(),
            StreamInner::Tcp(stream) => stream.as_raw_fd(),
        }
    }
}

impl std::fmt::Debug for BuxStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuxStream")
            .field("kind", &self.kind().name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_pair_roundtrip() {
        let (left, right) = UnixStream::pair().unwrap();
        let mut writer = BuxStream::from_unix(left);
        let mut reader = BuxStream::from_unix(right);

        writer.write_all(b"chorale").unwrap();
        let mut buf = [0u8; 7];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"chorale");
    }

    #[test]
    fn kind_reports_family() {
        let (left, _right) = UnixStream::pair().unwrap();
        let stream = BuxStream::from_unix(left);
        assert_eq!(stream.kind(), SocketKind::Local);
        assert_eq!(stream.kind().name(), "local");
    }

    #[test]
    fn clone_shares_connection() {
        let (left, right) = UnixStream::pair().unwrap();
        let writer = BuxStream::from_unix(left);
        let mut reader = BuxStream::from_unix(right);

        let mut clone = writer.try_clone().unwrap();
        clone.write_all(b"x").unwrap();

        let mut buf = [0u8; 1];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"x");
    }

    #[test]
    fn shutdown_signals_eof_to_peer() {
        let (left, right) = UnixStream::pair().unwrap();
        let writer = BuxStream::from_unix(left);
        let mut reader = BuxStream::from_unix(right);

        writer.shutdown().unwrap();
        let mut buf = [0u8; 1];
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }
}
