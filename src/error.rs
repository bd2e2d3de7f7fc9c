//! Error taxonomy and fault classification.
//!
//! Every fault the driver can hit is classified exactly once, where it is
//! detected, into one of five kinds:
//!
//! | Kind           | Raised when                                   | Disconnects |
//! |----------------|-----------------------------------------------|-------------|
//! | `CannotConnect`| connect, reconnect or TLS handshake failed    | always      |
//! | `Connection`   | non-timeout I/O failure on a live connection  | always      |
//! | `Protocol`     | the byte stream violates the RESP grammar     | always      |
//! | `ReadTimeout`  | a readability wait ran out                    | depends     |
//! | `WriteTimeout` | a writability wait ran out                    | depends     |
//!
//! Whether a timeout tears the connection down is decided by the call site,
//! which is why classification yields a [`Fault`] that carries the verdict
//! alongside the error.

use std::io;

use thiserror::Error;

use crate::protocol::ParseError;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by a [`Connection`](crate::Connection).
#[derive(Debug, Error)]
pub enum Error {
    /// Connect-phase failure. The connection is left unconnected.
    #[error("cannot connect to {endpoint}: {reason}")]
    CannotConnect { endpoint: String, reason: String },

    /// Fatal I/O fault on an established connection.
    #[error("connection error: {0}")]
    Connection(String),

    /// The peer sent bytes that are not valid RESP.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A readability wait exceeded the read timeout.
    #[error("read timeout: {0}")]
    ReadTimeout(String),

    /// A writability wait exceeded the write timeout.
    #[error("write timeout: {0}")]
    WriteTimeout(String),

    /// The operation needs a connected socket.
    #[error("not connected")]
    NotConnected,

    /// `connect` was called on a connection that already holds a socket.
    #[error("already connected")]
    AlreadyConnected,
}

/// The five fault kinds callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    CannotConnect,
    Connection,
    Protocol,
    ReadTimeout,
    WriteTimeout,
}

impl Error {
    /// Returns the taxonomy kind of this error.
    ///
    /// `NotConnected` and `AlreadyConnected` are connection errors.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::CannotConnect { .. } => ErrorKind::CannotConnect,
            Error::Connection(_) | Error::NotConnected | Error::AlreadyConnected => {
                ErrorKind::Connection
            }
            Error::Protocol(_) => ErrorKind::Protocol,
            Error::ReadTimeout(_) => ErrorKind::ReadTimeout,
            Error::WriteTimeout(_) => ErrorKind::WriteTimeout,
        }
    }

    /// True for read and write timeouts.
    pub fn is_timeout(&self) -> bool {
        matches!(self.kind(), ErrorKind::ReadTimeout | ErrorKind::WriteTimeout)
    }

    pub(crate) fn cannot_connect(endpoint: impl ToString, reason: impl ToString) -> Self {
        Error::CannotConnect {
            endpoint: endpoint.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<ParseError> for Error {
    fn from(err: ParseError) -> Self {
        Error::Protocol(err.to_string())
    }
}

/// Which timeout error a would-block condition maps to at a call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimeoutKind {
    Read,
    Write,
}

impl TimeoutKind {
    pub(crate) fn error(self, message: impl Into<String>) -> Error {
        match self {
            TimeoutKind::Read => Error::ReadTimeout(message.into()),
            TimeoutKind::Write => Error::WriteTimeout(message.into()),
        }
    }
}

/// A classified fault and whether it must tear the connection down.
#[derive(Debug)]
pub(crate) enum Fault {
    /// Close the socket, then report.
    Fatal(Error),
    /// Report and leave the socket open; the caller decides.
    Timeout(Error),
}

impl Fault {
    pub(crate) fn into_error(self) -> Error {
        match self {
            Fault::Fatal(err) | Fault::Timeout(err) => err,
        }
    }
}

impl From<ParseError> for Fault {
    fn from(err: ParseError) -> Self {
        Fault::Fatal(err.into())
    }
}

/// Maps a low-level I/O failure to the taxonomy.
///
/// Would-block and timed-out conditions become the call site's timeout kind.
/// `UnexpectedEof` only comes out of the TLS layer (a peer that dropped TCP
/// without `close_notify`) and is reported as a timeout as well. Anything
/// else is a connection error.
pub(crate) fn classify_io(err: &io::Error, timeout: TimeoutKind) -> Error {
    match err.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::UnexpectedEof => {
            timeout.error("Resource temporarily unavailable")
        }
        _ => Error::Connection(err.to_string()),
    }
}
