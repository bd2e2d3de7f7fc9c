//! Plain sockets: TCP and Unix-domain streams.
//!
//! Every I/O primitive here is non-blocking. A would-block outcome comes back
//! as `io::ErrorKind::WouldBlock` and the caller decides whether to wait for
//! readiness with [`Socket::wait_readable`] / [`Socket::wait_writable`].

use crate::error::{Error, Result};
use crate::timeout::Timeout;
use bytes::BufMut;
use socket2::{SockRef, TcpKeepalive};
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::{lookup_host, TcpSocket, TcpStream, UnixStream};
use tracing::trace;

/// Idle time before the first keep-alive probe.
const KEEPALIVE_IDLE: Duration = Duration::from_secs(15);

/// Where a connection goes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// A TCP host (name or address) and port.
    Tcp { host: String, port: u16 },
    /// A Unix-domain socket path.
    Unix(PathBuf),
}

impl Endpoint {
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Endpoint::Tcp {
            host: host.into(),
            port,
        }
    }

    pub fn unix(path: impl Into<PathBuf>) -> Self {
        Endpoint::Unix(path.into())
    }

    /// The TCP host, if this is a network endpoint.
    pub fn host(&self) -> Option<&str> {
        match self {
            Endpoint::Tcp { host, .. } => Some(host),
            Endpoint::Unix(_) => None,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp { host, port } => write!(f, "{}:{}", host, port),
            Endpoint::Unix(path) => write!(f, "{}", path.display()),
        }
    }
}

/// A connected, non-blocking stream.
#[derive(Debug)]
pub(crate) enum Socket {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl Socket {
    /// Opens a stream to `endpoint`, bounded by `timeout` as a whole.
    ///
    /// Every failure is reported as `CannotConnect`; a half-opened socket is
    /// dropped (and so closed) before returning.
    pub(crate) async fn connect(endpoint: &Endpoint, timeout: Timeout) -> Result<Socket> {
        let attempt = async {
            match endpoint {
                Endpoint::Tcp { host, port } => connect_tcp(host, *port).await.map(Socket::Tcp),
                Endpoint::Unix(path) => UnixStream::connect(path).await.map(Socket::Unix),
            }
        };

        let socket = match timeout.run(attempt).await {
            Some(Ok(socket)) => socket,
            Some(Err(e)) => return Err(Error::cannot_connect(endpoint, e)),
            None => return Err(Error::cannot_connect(endpoint, "Connection timed out")),
        };

        if let Socket::Tcp(stream) = &socket {
            configure_tcp(stream).map_err(|e| Error::cannot_connect(endpoint, e))?;
        }

        Ok(socket)
    }

    /// Waits until the stream is readable. `Ok(false)` means the timeout
    /// elapsed first.
    pub(crate) async fn wait_readable(&self, timeout: Timeout) -> io::Result<bool> {
        let ready = match self {
            Socket::Tcp(s) => timeout.run(s.readable()).await,
            Socket::Unix(s) => timeout.run(s.readable()).await,
        };
        ready.map_or(Ok(false), |r| r.map(|()| true))
    }

    /// Waits until the stream is writable. `Ok(false)` means the timeout
    /// elapsed first.
    pub(crate) async fn wait_writable(&self, timeout: Timeout) -> io::Result<bool> {
        let ready = match self {
            Socket::Tcp(s) => timeout.run(s.writable()).await,
            Socket::Unix(s) => timeout.run(s.writable()).await,
        };
        ready.map_or(Ok(false), |r| r.map(|()| true))
    }

    pub(crate) fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let n = match self {
            Socket::Tcp(s) => s.try_read(buf)?,
            Socket::Unix(s) => s.try_read(buf)?,
        };
        trace!(bytes = n, "Socket read");
        Ok(n)
    }

    /// Reads into the spare capacity of `buf`, growing nothing.
    pub(crate) fn try_read_buf<B: BufMut>(&self, buf: &mut B) -> io::Result<usize> {
        let n = match self {
            Socket::Tcp(s) => s.try_read_buf(buf)?,
            Socket::Unix(s) => s.try_read_buf(buf)?,
        };
        trace!(bytes = n, "Socket read");
        Ok(n)
    }

    pub(crate) fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
        let n = match self {
            Socket::Tcp(s) => s.try_write(buf)?,
            Socket::Unix(s) => s.try_write(buf)?,
        };
        trace!(bytes = n, "Socket write");
        Ok(n)
    }
}

/// Tries every resolved address in turn and keeps the last failure.
async fn connect_tcp(host: &str, port: u16) -> io::Result<TcpStream> {
    let mut last_error = None;
    for addr in lookup_host((host, port)).await? {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        match socket.connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                trace!(addr = %addr, error = %e, "Connect attempt failed");
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("{}:{} did not resolve to any address", host, port),
        )
    }))
}

fn configure_tcp(stream: &TcpStream) -> io::Result<()> {
    stream.set_nodelay(true)?;
    let keepalive = TcpKeepalive::new().with_time(KEEPALIVE_IDLE);
    SockRef::from(stream).set_tcp_keepalive(&keepalive)
}

/// Blocking-style `Read`/`Write` over a non-blocking socket, for the TLS
/// engine. Would-block surfaces as `io::ErrorKind::WouldBlock`.
pub(crate) struct SyncIo<'a>(pub(crate) &'a Socket);

impl io::Read for SyncIo<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.try_read(buf)
    }
}

impl io::Write for SyncIo<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.try_write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
