//! # respwire - An Async RESP2/RESP3 Client Connection Driver
//!
//! respwire drives a single connection to a Redis-compatible server over
//! TCP, Unix-domain sockets or TLS. It serializes commands, pushes them out
//! under a write timeout, and rebuilds replies of any nesting depth from a
//! byte stream that may arrive in arbitrarily small pieces.
//!
//! ## Features
//!
//! - **Full RESP3 type set**: status, error, integer, bulk, array, null,
//!   double, boolean, big number, verbatim, map, set and push
//! - **Streaming reader**: pauses at any byte boundary and resumes without
//!   re-parsing finished values
//! - **Pipelining**: buffered commands go out with one flush; buffered
//!   replies are returned without touching the socket
//! - **Timeouts**: independent connect, read and write bounds
//! - **TLS**: rustls, with file-based or bring-your-own configuration
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              respwire                                   │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────────────────────┐  │
//! │  │   encode_   │───>│ Connection  │───>│         Transport           │  │
//! │  │   command   │    │  (driver)   │    │  ┌───────────┐ ┌─────────┐  │  │
//! │  └─────────────┘    └──────┬──────┘    │  │TlsSession?│>│ Socket  │  │  │
//! │                            │           │  └───────────┘ └─────────┘  │  │
//! │                            ▼           └─────────────────────────────┘  │
//! │                     ┌─────────────┐                                     │
//! │                     │ ReplyReader │  task stack of open aggregates      │
//! │                     └─────────────┘                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use respwire::{Connection, ConnectionConfig, Endpoint, ReplyValue};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> respwire::Result<()> {
//!     let config = ConnectionConfig::default()
//!         .with_connect_timeout(Duration::from_secs(1))
//!         .with_read_timeout(Duration::from_secs(1))
//!         .with_write_timeout(Duration::from_secs(1));
//!
//!     let mut conn = Connection::open(Endpoint::tcp("127.0.0.1", 6379), None, config).await?;
//!
//!     conn.write(&["SET", "name", "Ariz"])?;
//!     conn.write(&["GET", "name"])?;
//!     conn.flush().await?;
//!
//!     assert_eq!(conn.read().await?, ReplyValue::status("OK"));
//!     assert_eq!(conn.read().await?, ReplyValue::text("Ariz"));
//!
//!     println!("latency: {:.3} ms", conn.measure_round_trip(None).await?);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`protocol`]: Reply types, the streaming reader and the command encoder
//! - [`transport`]: Sockets and TLS
//! - [`connection`]: The connection state machine
//! - [`error`]: The error taxonomy
//!
//! ## Error Taxonomy
//!
//! Every failure is one of five [`ErrorKind`]s. Connection and protocol
//! errors close the socket before they are returned; a read timeout during
//! [`Connection::read`] does not, so callers waiting on push messages can
//! simply read again.

pub mod connection;
pub mod error;
pub mod protocol;
pub mod timeout;
pub mod transport;

// Re-export commonly used types for convenience
pub use connection::{Connection, ConnectionConfig, ConnectionState};
pub use error::{Error, ErrorKind, Result};
pub use protocol::{encode_command, CommandError, ErrorParser, ParseError, ReplyReader, ReplyValue};
pub use timeout::Timeout;
pub use transport::{Endpoint, TlsContext, TlsContextError, TlsOptions};

/// The default port Redis-compatible servers listen on
pub const DEFAULT_PORT: u16 = 6379;

/// The default host to connect to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of respwire
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
