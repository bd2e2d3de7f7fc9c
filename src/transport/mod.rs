//! Transport Module
//!
//! Byte pipes underneath a connection: a plain TCP or Unix-domain socket,
//! optionally wrapped in TLS.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                  Transport                   │
//! │                                              │
//! │   raw_write / raw_read      wait_* (timed)   │
//! │          │                        │          │
//! │          ▼                        │          │
//! │   ┌─────────────┐                 │          │
//! │   │ TlsSession? │  (rustls)       │          │
//! │   └──────┬──────┘                 │          │
//! │          ▼                        ▼          │
//! │   ┌──────────────────────────────────────┐   │
//! │   │      Socket (TcpStream / Unix)       │   │
//! │   └──────────────────────────────────────┘   │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Raw I/O never waits: "would block" is reported as [`IoStatus::WouldBlock`]
//! and the caller chooses which timeout to wait with.

pub mod socket;
pub mod tls;

pub use socket::Endpoint;
pub use tls::{TlsContext, TlsContextError, TlsOptions};

use crate::error::{Error, Result};
use crate::timeout::Timeout;
use bytes::{Buf, BufMut, BytesMut};
use socket::Socket;
use std::io;
use tls::TlsSession;
use tracing::debug;

/// Most bytes pulled from a plain socket per read.
const READ_CHUNK: usize = 16 * 1024;

/// Outcome of a non-blocking I/O attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IoStatus<T> {
    Ready(T),
    WouldBlock,
}

/// An open socket and, once upgraded, its TLS session.
pub(crate) struct Transport {
    endpoint: Endpoint,
    socket: Option<Socket>,
    tls: Option<TlsSession>,
}

impl Transport {
    /// Opens a plain socket to `endpoint`.
    pub(crate) async fn connect(endpoint: &Endpoint, timeout: Timeout) -> Result<Self> {
        let socket = Socket::connect(endpoint, timeout).await?;
        debug!(endpoint = %endpoint, "Socket connected");
        Ok(Self {
            endpoint: endpoint.clone(),
            socket: Some(socket),
            tls: None,
        })
    }

    /// Upgrades the socket to TLS. On failure the socket is closed.
    pub(crate) async fn start_tls(
        &mut self,
        context: &TlsContext,
        read_timeout: Timeout,
        write_timeout: Timeout,
    ) -> Result<()> {
        let socket = self.socket.as_ref().ok_or(Error::NotConnected)?;
        match TlsSession::handshake(socket, &self.endpoint, context, read_timeout, write_timeout).await {
            Ok(session) => {
                self.tls = Some(session);
                Ok(())
            }
            Err(e) => {
                self.close();
                Err(e)
            }
        }
    }

    pub(crate) fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub(crate) fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    pub(crate) fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// Waits for readability. `Ok(false)` when `timeout` elapsed first.
    pub(crate) async fn wait_readable(&self, timeout: Timeout) -> io::Result<bool> {
        self.socket()?.wait_readable(timeout).await
    }

    /// Waits for writability. `Ok(false)` when `timeout` elapsed first.
    pub(crate) async fn wait_writable(&self, timeout: Timeout) -> io::Result<bool> {
        self.socket()?.wait_writable(timeout).await
    }

    /// One non-blocking write attempt from the front of `pending`.
    ///
    /// Returns `Ready(done)`, where `done` means nothing is left to send.
    pub(crate) fn raw_write(&mut self, pending: &mut BytesMut) -> io::Result<IoStatus<bool>> {
        let socket = self.socket.as_ref().ok_or_else(not_open)?;
        if let Some(tls) = self.tls.as_mut() {
            return tls.write(socket, pending);
        }
        if pending.is_empty() {
            return Ok(IoStatus::Ready(true));
        }
        match socket.try_write(pending) {
            Ok(0) => Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => {
                pending.advance(n);
                Ok(IoStatus::Ready(pending.is_empty()))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(IoStatus::WouldBlock),
            Err(e) => Err(e),
        }
    }

    /// One non-blocking read attempt, appending to `out`.
    ///
    /// `Ready(0)` means the peer closed the stream.
    pub(crate) fn raw_read(&mut self, out: &mut BytesMut) -> io::Result<IoStatus<usize>> {
        let socket = self.socket.as_ref().ok_or_else(not_open)?;
        if let Some(tls) = self.tls.as_mut() {
            return tls.read(socket, out);
        }
        out.reserve(READ_CHUNK);
        match socket.try_read_buf(&mut (&mut *out).limit(READ_CHUNK)) {
            Ok(n) => Ok(IoStatus::Ready(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(IoStatus::WouldBlock),
            Err(e) => Err(e),
        }
    }

    /// Releases the socket. Safe to call more than once.
    pub(crate) fn close(&mut self) {
        if let (Some(tls), Some(socket)) = (self.tls.as_mut(), self.socket.as_ref()) {
            tls.shutdown(socket);
        }
        self.tls = None;
        if self.socket.take().is_some() {
            debug!(endpoint = %self.endpoint, "Socket closed");
        }
    }

    fn socket(&self) -> io::Result<&Socket> {
        self.socket.as_ref().ok_or_else(not_open)
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.close();
    }
}

fn not_open() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "socket is closed")
}
