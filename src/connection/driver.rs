//! Connection Driver
//!
//! A [`Connection`] owns one socket, the pending-write buffer and the reply
//! reader, and walks them through this lifecycle:
//!
//! ```text
//!   Disconnected ──connect──> Connecting ──(tls)──> Handshaking
//!        ▲                        │                      │
//!        │ connect failed         └──────────┬───────────┘
//!        │                                   ▼
//!        └───────────────────────────────  Ready ──fatal error / close──> Closed
//!                                            ▲                              │
//!                                            └─────────── reconnect ────────┘
//! ```
//!
//! ## Fault Policy
//!
//! Every fault is classified once, where it is detected. Faults that make
//! the byte stream untrustworthy (I/O errors, EOF, protocol violations)
//! close the socket *before* the error is returned, so a caller never holds
//! a connection that reported a fatal error yet still has a live socket.
//!
//! Timeouts inside [`Connection::read`] are the exception: a caller polling
//! for push messages expects them, so the socket stays open and the next
//! `read` picks up where this one stopped.
//!
//! ## Cancellation
//!
//! The write buffer, read buffer and parser state live in the connection,
//! not in the futures, so dropping a `read` or `flush` future mid-way loses
//! nothing but the wait itself.

use crate::connection::config::ConnectionConfig;
use crate::error::{classify_io, Error, Fault, Result, TimeoutKind};
use crate::protocol::command::{encode_command, PING_INLINE, PONG_REPLY};
use crate::protocol::{ReplyReader, ReplyValue};
use crate::timeout::Timeout;
use crate::transport::{Endpoint, IoStatus, TlsContext, Transport};
use bytes::BytesMut;
use std::fmt;
use std::time::Instant;
use tracing::{debug, trace, warn};

/// Message for a readiness wait that ran out.
const WOULD_BLOCK: &str = "Resource temporarily unavailable";

const PEER_CLOSED: &str = "server closed the connection";

/// Initial capacity of the pending-write buffer.
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Where a [`Connection`] is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never connected, or the last connect attempt failed.
    Disconnected,
    /// Opening the socket.
    Connecting,
    /// Running the TLS handshake.
    Handshaking,
    /// Usable for commands.
    Ready,
    /// Closed explicitly or after a fatal error.
    Closed,
}

/// Everything that belongs to one live socket.
struct Context {
    transport: Transport,
    reader: ReplyReader,
    pending: BytesMut,
}

impl Context {
    /// Writes until `pending` is empty.
    async fn drain(&mut self, write_timeout: Timeout) -> std::result::Result<(), Fault> {
        loop {
            match self.transport.raw_write(&mut self.pending) {
                Ok(IoStatus::Ready(true)) => return Ok(()),
                Ok(IoStatus::Ready(false)) => {}
                Ok(IoStatus::WouldBlock) => match self.transport.wait_writable(write_timeout).await {
                    Ok(true) => {}
                    Ok(false) => return Err(Fault::Timeout(TimeoutKind::Write.error(WOULD_BLOCK))),
                    Err(e) => return Err(Fault::Fatal(classify_io(&e, TimeoutKind::Write))),
                },
                Err(e) => return Err(Fault::Fatal(classify_io(&e, TimeoutKind::Write))),
            }
        }
    }

    /// Produces the next reply: from buffered bytes if one is complete,
    /// otherwise after flushing pending commands and reading more.
    async fn next_reply(
        &mut self,
        read_timeout: Timeout,
        write_timeout: Timeout,
    ) -> std::result::Result<ReplyValue, Fault> {
        if let Some(reply) = self.reader.get_reply()? {
            return Ok(reply);
        }

        self.drain(write_timeout).await?;

        loop {
            match self.transport.raw_read(self.reader.buffer_mut()) {
                Ok(IoStatus::Ready(0)) => {
                    return Err(Fault::Fatal(Error::Connection(PEER_CLOSED.to_string())));
                }
                Ok(IoStatus::Ready(n)) => {
                    trace!(bytes = n, buffered = self.reader.buffered_len(), "Read data");
                    if let Some(reply) = self.reader.get_reply()? {
                        return Ok(reply);
                    }
                }
                Ok(IoStatus::WouldBlock) => match self.transport.wait_readable(read_timeout).await {
                    Ok(true) => {}
                    Ok(false) => return Err(Fault::Timeout(TimeoutKind::Read.error(WOULD_BLOCK))),
                    Err(e) => return Err(Fault::Timeout(TimeoutKind::Read.error(e.to_string()))),
                },
                Err(e) => return Err(Fault::Fatal(classify_io(&e, TimeoutKind::Read))),
            }
        }
    }

    /// Sends an inline PING and times the exact `+PONG\r\n` answer.
    async fn ping(&mut self, timeout: Timeout, write_timeout: Timeout) -> Result<f64> {
        if self.reader.buffered_len() != 0 || self.reader.has_partial_reply() {
            return Err(Error::Protocol(
                "cannot measure round trip with unread reply data".to_string(),
            ));
        }

        let start = Instant::now();
        self.pending.extend_from_slice(PING_INLINE);
        self.drain(write_timeout).await.map_err(Fault::into_error)?;

        while self.reader.buffered_len() < PONG_REPLY.len() {
            match self.transport.raw_read(self.reader.buffer_mut()) {
                Ok(IoStatus::Ready(0)) => return Err(Error::Connection(PEER_CLOSED.to_string())),
                Ok(IoStatus::Ready(_)) => {}
                Ok(IoStatus::WouldBlock) => match self.transport.wait_readable(timeout).await {
                    Ok(true) => {}
                    Ok(false) => return Err(Error::ReadTimeout(WOULD_BLOCK.to_string())),
                    Err(e) => return Err(Error::ReadTimeout(e.to_string())),
                },
                Err(e) => return Err(classify_io(&e, TimeoutKind::Read)),
            }
        }

        if !self.reader.take_exact(PONG_REPLY) {
            return Err(Error::Protocol(format!(
                "unexpected PING reply ({} bytes buffered)",
                self.reader.buffered_len()
            )));
        }
        Ok(start.elapsed().as_secs_f64() * 1000.0)
    }
}

/// A connect in progress. Dropped before [`finish`](Self::finish), whether
/// by an error return or a cancelled future, it leaves `Disconnected`.
struct Transition<'a> {
    state: &'a mut ConnectionState,
    finished: bool,
}

impl<'a> Transition<'a> {
    fn begin(state: &'a mut ConnectionState) -> Self {
        *state = ConnectionState::Connecting;
        Self {
            state,
            finished: false,
        }
    }

    fn set(&mut self, state: ConnectionState) {
        *self.state = state;
    }

    fn finish(mut self) {
        *self.state = ConnectionState::Ready;
        self.finished = true;
    }
}

impl Drop for Transition<'_> {
    fn drop(&mut self) {
        if !self.finished {
            *self.state = ConnectionState::Disconnected;
        }
    }
}

/// A single client connection.
///
/// One task drives a connection at a time; it is `Send` but offers no
/// internal locking.
///
/// # Example
///
/// ```no_run
/// use respwire::{Connection, ConnectionConfig, Endpoint};
/// use std::time::Duration;
///
/// # async fn run() -> respwire::Result<()> {
/// let config = ConnectionConfig::default().with_read_timeout(Duration::from_secs(1));
/// let mut conn = Connection::open(Endpoint::tcp("127.0.0.1", 6379), None, config).await?;
///
/// conn.write(&["SET", "name", "Ariz"])?;
/// conn.write(&["GET", "name"])?;
/// conn.flush().await?;
///
/// let ok = conn.read().await?;
/// let name = conn.read().await?;
/// println!("{} {}", ok, name);
/// # Ok(())
/// # }
/// ```
pub struct Connection {
    config: ConnectionConfig,
    state: ConnectionState,
    endpoint: Option<Endpoint>,
    context: Option<Context>,
}

impl Connection {
    /// Creates an unconnected connection.
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            state: ConnectionState::Disconnected,
            endpoint: None,
            context: None,
        }
    }

    /// Creates a connection and connects it.
    pub async fn open(
        endpoint: Endpoint,
        tls: Option<TlsContext>,
        config: ConnectionConfig,
    ) -> Result<Self> {
        let mut conn = Self::new(config);
        conn.connect(endpoint, tls).await?;
        Ok(conn)
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// The endpoint of the last connect attempt.
    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    pub fn set_connect_timeout(&mut self, timeout: impl Into<Timeout>) {
        self.config.connect_timeout = timeout.into();
    }

    pub fn set_read_timeout(&mut self, timeout: impl Into<Timeout>) {
        self.config.read_timeout = timeout.into();
    }

    pub fn set_write_timeout(&mut self, timeout: impl Into<Timeout>) {
        self.config.write_timeout = timeout.into();
    }

    /// True only while a context with an open socket exists.
    pub fn is_connected(&self) -> bool {
        self.context
            .as_ref()
            .is_some_and(|ctx| ctx.transport.is_open())
    }

    /// Opens a socket to `endpoint`, then runs the TLS handshake if `tls`
    /// is given.
    ///
    /// # Errors
    ///
    /// `AlreadyConnected` if a socket is open; `CannotConnect` (or
    /// `ReadTimeout` for a stalled handshake) otherwise. A failed attempt
    /// leaves the connection `Disconnected`.
    pub async fn connect(&mut self, endpoint: Endpoint, tls: Option<TlsContext>) -> Result<()> {
        if self.is_connected() {
            return Err(Error::AlreadyConnected);
        }
        self.context = None;
        self.endpoint = Some(endpoint.clone());

        let context = self.establish(&endpoint, tls.as_ref()).await?;
        self.context = Some(context);
        Ok(())
    }

    /// Replaces the socket with a fresh one to the same endpoint.
    ///
    /// The old context is torn down before anything else happens, so a
    /// failure part-way leaves no context at all rather than a
    /// half-initialized one. Works after a fatal error too, as long as an
    /// endpoint was ever given.
    pub async fn reconnect(&mut self, tls: Option<TlsContext>) -> Result<()> {
        let endpoint = match (&self.context, &self.endpoint) {
            (Some(ctx), _) => ctx.transport.endpoint().clone(),
            (None, Some(endpoint)) => endpoint.clone(),
            (None, None) => return Err(Error::NotConnected),
        };

        if let Some(mut old) = self.context.take() {
            old.transport.close();
        }
        debug!(endpoint = %endpoint, "Reconnecting");

        let context = self.establish(&endpoint, tls.as_ref()).await?;
        self.context = Some(context);
        Ok(())
    }

    /// Opens the transport and runs the handshake. `state` is `Ready` once
    /// this returns `Ok`, and `Disconnected` if it fails or is cancelled.
    async fn establish(&mut self, endpoint: &Endpoint, tls: Option<&TlsContext>) -> Result<Context> {
        let mut transition = Transition::begin(&mut self.state);
        let mut transport = match Transport::connect(endpoint, self.config.connect_timeout).await {
            Ok(transport) => transport,
            Err(e) => {
                debug!(endpoint = %endpoint, error = %e, "Connect failed");
                return Err(e);
            }
        };

        if let Some(tls) = tls {
            transition.set(ConnectionState::Handshaking);
            if let Err(e) = transport
                .start_tls(tls, self.config.read_timeout, self.config.write_timeout)
                .await
            {
                debug!(endpoint = %endpoint, error = %e, "TLS handshake failed");
                return Err(e);
            }
        }

        debug!(endpoint = %endpoint, tls = transport.is_tls(), "Connected");
        transition.finish();
        Ok(Context {
            transport,
            reader: ReplyReader::with_error_parser(self.config.error_parser.clone()),
            pending: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
        })
    }

    /// Serializes one command into the pending-write buffer. No I/O.
    pub fn write<A: AsRef<[u8]>>(&mut self, args: &[A]) -> Result<()> {
        let ctx = self.ready_context()?;
        encode_command(args, &mut ctx.pending);
        trace!(pending = ctx.pending.len(), "Command buffered");
        Ok(())
    }

    /// Sends every buffered command.
    ///
    /// Any failure here is fatal: a half-written command leaves the stream
    /// at an unknown position.
    pub async fn flush(&mut self) -> Result<()> {
        let write_timeout = self.config.write_timeout;
        let ctx = self.ready_context()?;
        match ctx.drain(write_timeout).await {
            Ok(()) => Ok(()),
            Err(fault) => Err(self.fail(fault.into_error())),
        }
    }

    /// Buffers and sends one command.
    pub async fn send_command<A: AsRef<[u8]>>(&mut self, args: &[A]) -> Result<()> {
        self.write(args)?;
        self.flush().await
    }

    /// Buffers several commands and sends them with one flush.
    pub async fn send_pipeline<C, A>(&mut self, commands: &[C]) -> Result<()>
    where
        C: AsRef<[A]>,
        A: AsRef<[u8]>,
    {
        for command in commands {
            self.write(command.as_ref())?;
        }
        self.flush().await
    }

    /// Buffers one command and reads its reply.
    pub async fn call<A: AsRef<[u8]>>(&mut self, args: &[A]) -> Result<ReplyValue> {
        self.write(args)?;
        self.read().await
    }

    /// Returns the next reply.
    ///
    /// A reply that is already buffered is returned without touching the
    /// socket. Otherwise pending commands are flushed and the socket is read
    /// until a whole reply arrives.
    ///
    /// # Errors
    ///
    /// - `ReadTimeout` / `WriteTimeout` when a wait ran out; the connection
    ///   stays open.
    /// - `Connection` / `Protocol` for anything else; the connection is
    ///   closed first.
    pub async fn read(&mut self) -> Result<ReplyValue> {
        self.read_inner(self.config.read_timeout).await
    }

    /// Like [`read`](Self::read) with a one-off read timeout. The configured
    /// read timeout is left untouched.
    pub async fn read_with_timeout(&mut self, timeout: impl Into<Timeout>) -> Result<ReplyValue> {
        self.read_inner(timeout.into()).await
    }

    async fn read_inner(&mut self, read_timeout: Timeout) -> Result<ReplyValue> {
        let write_timeout = self.config.write_timeout;
        let ctx = self.ready_context()?;
        match ctx.next_reply(read_timeout, write_timeout).await {
            Ok(reply) => Ok(reply),
            Err(Fault::Timeout(e)) => Err(e),
            Err(Fault::Fatal(e)) => Err(self.fail(e)),
        }
    }

    /// Measures one PING round trip in milliseconds.
    ///
    /// Waits up to `timeout`, or the read timeout when `None`. Refuses with a
    /// protocol error while reply bytes are still unread. Any failure closes
    /// the connection.
    pub async fn measure_round_trip(&mut self, timeout: Option<Timeout>) -> Result<f64> {
        let timeout = timeout.unwrap_or(self.config.read_timeout);
        let write_timeout = self.config.write_timeout;
        let ctx = self.ready_context()?;
        match ctx.ping(timeout, write_timeout).await {
            Ok(millis) => {
                trace!(millis, "Round trip measured");
                Ok(millis)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Closes the socket. Safe to call in any state, any number of times.
    pub fn close(&mut self) {
        if let Some(ctx) = self.context.as_mut() {
            ctx.transport.close();
        }
        if self.state != ConnectionState::Disconnected {
            self.state = ConnectionState::Closed;
        }
    }

    fn ready_context(&mut self) -> Result<&mut Context> {
        match self.context.as_mut() {
            Some(ctx) if ctx.transport.is_open() => Ok(ctx),
            _ => Err(Error::NotConnected),
        }
    }

    /// Tears the connection down and hands the error back for reporting.
    fn fail(&mut self, err: Error) -> Error {
        if let Some(mut ctx) = self.context.take() {
            warn!(endpoint = %ctx.transport.endpoint(), error = %err, "Closing connection after fatal error");
            ctx.transport.close();
        }
        self.state = ConnectionState::Closed;
        err
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state)
            .field("endpoint", &self.endpoint)
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::transport::tls::tests::{generate_pki, spawn_tls_peer, spawn_truncating_tls_peer};
    use std::future::Future;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream, UnixListener};
    use tokio::sync::oneshot;
    use tokio_test::{assert_err, assert_ok};

    /// Spawns a peer that runs `script` on each accepted stream, in order.
    async fn scripted_peer<F, Fut>(accepts: usize, script: F) -> Endpoint
    where
        F: Fn(usize, TcpStream) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            for i in 0..accepts {
                let (stream, _) = listener.accept().await.unwrap();
                script(i, stream).await;
            }
        });
        Endpoint::tcp("127.0.0.1", port)
    }

    async fn read_exactly(stream: &mut TcpStream, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        stream.read_exact(&mut buf).await.unwrap();
        buf
    }

    fn quick(millis: u64) -> ConnectionConfig {
        ConnectionConfig::default()
            .with_connect_timeout(Duration::from_secs(5))
            .with_read_timeout(Duration::from_millis(millis))
            .with_write_timeout(Duration::from_millis(millis))
    }

    #[tokio::test]
    async fn test_command_round_trip() {
        let (tx, rx) = oneshot::channel();
        let tx = std::sync::Mutex::new(Some(tx));
        let endpoint = scripted_peer(1, move |_, mut stream| {
            let tx = tx.lock().unwrap().take();
            async move {
                let received = read_exactly(&mut stream, 33).await;
                stream.write_all(b"+OK\r\n").await.unwrap();
                if let Some(tx) = tx {
                    let _ = tx.send(received);
                }
            }
        })
        .await;

        let mut conn = Connection::open(endpoint, None, quick(5_000)).await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Ready);
        assert!(conn.is_connected());

        let reply = conn.call(&["SET", "name", "Ariz"]).await.unwrap();
        assert_eq!(reply, ReplyValue::status("OK"));
        assert_eq!(
            rx.await.unwrap(),
            b"*3\r\n$3\r\nSET\r\n$4\r\nname\r\n$4\r\nAriz\r\n".to_vec()
        );
    }

    #[tokio::test]
    async fn test_pipelined_replies_drain_in_order() {
        let endpoint = scripted_peer(1, |_, mut stream| async move {
            let mut seen = Vec::new();
            let mut buf = [0u8; 256];
            while seen.len() < 105 {
                let n = stream.read(&mut buf).await.unwrap();
                if n == 0 {
                    return;
                }
                seen.extend_from_slice(&buf[..n]);
            }
            stream
                .write_all(b"+OK\r\n$1\r\n1\r\n:1\r\n#f\r\n")
                .await
                .unwrap();
            let _ = stream.read(&mut buf).await;
        })
        .await;

        let mut conn = Connection::open(endpoint, None, quick(5_000)).await.unwrap();
        let commands = [
            vec!["SET", "a", "1"],
            vec!["GET", "a"],
            vec!["EXISTS", "a"],
            vec!["SISMEMBER", "set", "x"],
        ];
        let expected_len: usize = commands
            .iter()
            .map(|c| crate::protocol::encoded_len(c.as_slice()))
            .sum();
        assert_eq!(expected_len, 105);
        conn.send_pipeline(&commands).await.unwrap();

        assert_eq!(conn.read().await.unwrap(), ReplyValue::status("OK"));
        assert_eq!(conn.read().await.unwrap(), ReplyValue::text("1"));
        assert_eq!(conn.read().await.unwrap(), ReplyValue::Integer(1));
        assert_eq!(conn.read().await.unwrap(), ReplyValue::Boolean(false));
    }

    #[tokio::test]
    async fn test_read_timeout_keeps_connection() {
        let (tx, rx) = oneshot::channel::<()>();
        let rx = std::sync::Mutex::new(Some(rx));
        let endpoint = scripted_peer(1, move |_, mut stream| {
            let rx = rx.lock().unwrap().take();
            async move {
                read_exactly(&mut stream, 14).await;
                if let Some(rx) = rx {
                    let _ = rx.await;
                }
                stream.write_all(b"+PONG\r\n").await.unwrap();
                let mut buf = [0u8; 16];
                let _ = stream.read(&mut buf).await;
            }
        })
        .await;

        let mut conn = Connection::open(endpoint, None, quick(50)).await.unwrap();
        conn.write(&["PING"]).unwrap();

        let err = conn.read().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReadTimeout);
        assert!(conn.is_connected());
        assert_eq!(conn.state(), ConnectionState::Ready);

        tx.send(()).unwrap();
        let reply = conn.read_with_timeout(Duration::from_secs(5)).await.unwrap();
        assert_eq!(reply, ReplyValue::status("PONG"));
        assert_eq!(conn.config().read_timeout.as_millis(), 50);
    }

    #[tokio::test]
    async fn test_eof_is_fatal() {
        let endpoint = scripted_peer(1, |_, stream| async move {
            drop(stream);
        })
        .await;

        let mut conn = Connection::open(endpoint, None, quick(5_000)).await.unwrap();
        let err = conn.read().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert!(err.to_string().contains("server closed the connection"));
        assert!(!conn.is_connected());
        assert_eq!(conn.state(), ConnectionState::Closed);

        assert!(matches!(conn.read().await, Err(Error::NotConnected)));
        assert!(matches!(conn.write(&["PING"]), Err(Error::NotConnected)));
        assert!(matches!(conn.flush().await, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn test_protocol_error_disconnects() {
        let endpoint = scripted_peer(1, |_, mut stream| async move {
            stream.write_all(b"?oops\r\n").await.unwrap();
            let mut buf = [0u8; 16];
            let _ = stream.read(&mut buf).await;
        })
        .await;

        let mut conn = Connection::open(endpoint, None, quick(5_000)).await.unwrap();
        let err = conn.read().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn test_measure_round_trip() {
        let endpoint = scripted_peer(1, |_, mut stream| async move {
            for _ in 0..2 {
                assert_eq!(read_exactly(&mut stream, 6).await, b"PING\r\n");
                stream.write_all(b"+PONG\r\n").await.unwrap();
            }
            let mut buf = [0u8; 16];
            let _ = stream.read(&mut buf).await;
        })
        .await;

        let mut conn = Connection::open(endpoint, None, quick(5_000)).await.unwrap();
        let first = conn.measure_round_trip(None).await.unwrap();
        assert!(first >= 0.0);
        let second = conn
            .measure_round_trip(Some(Timeout::from_micros(5_000_000)))
            .await
            .unwrap();
        assert!(second >= 0.0);
        assert!(conn.is_connected());
    }

    #[tokio::test]
    async fn test_measure_round_trip_with_unread_bytes() {
        let endpoint = scripted_peer(1, |_, mut stream| async move {
            stream.write_all(b"*2\r\n:1\r\n").await.unwrap();
            let mut buf = [0u8; 16];
            let _ = stream.read(&mut buf).await;
        })
        .await;

        let mut conn = Connection::open(endpoint, None, quick(200)).await.unwrap();
        let err = conn.read().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReadTimeout);

        let err = conn.measure_round_trip(None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn test_measure_round_trip_wrong_reply() {
        let endpoint = scripted_peer(1, |_, mut stream| async move {
            read_exactly(&mut stream, 6).await;
            stream.write_all(b"-NOAUTH\r\n").await.unwrap();
            let mut buf = [0u8; 16];
            let _ = stream.read(&mut buf).await;
        })
        .await;

        let mut conn = Connection::open(endpoint, None, quick(5_000)).await.unwrap();
        let err = conn.measure_round_trip(None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut conn = Connection::new(quick(1_000));
        let err = conn
            .connect(Endpoint::tcp("127.0.0.1", port), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CannotConnect);
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn test_connect_twice_is_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = Endpoint::tcp("127.0.0.1", listener.local_addr().unwrap().port());

        let mut conn = Connection::open(endpoint.clone(), None, quick(1_000)).await.unwrap();
        let err = conn.connect(endpoint, None).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyConnected));
        assert!(conn.is_connected());
    }

    #[tokio::test]
    async fn test_failed_tls_reconnect_leaves_no_context() {
        let endpoint = scripted_peer(2, |_, mut stream| async move {
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await;
            let _ = stream.write_all(b"-ERR this is not TLS\r\n").await;
        })
        .await;

        let mut conn = Connection::open(endpoint, None, quick(5_000)).await.unwrap();
        let pki = generate_pki();

        let err = conn.reconnect(Some(pki.client_context())).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CannotConnect);
        assert!(conn.context.is_none());
        assert!(!conn.is_connected());
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_reconnect_after_fatal_error() {
        let endpoint = scripted_peer(2, |i, mut stream| async move {
            if i == 0 {
                return;
            }
            read_exactly(&mut stream, 14).await;
            stream.write_all(b"+PONG\r\n").await.unwrap();
            let mut buf = [0u8; 16];
            let _ = stream.read(&mut buf).await;
        })
        .await;

        let mut conn = Connection::open(endpoint, None, quick(5_000)).await.unwrap();
        assert_err!(conn.read().await);
        assert!(!conn.is_connected());

        assert_ok!(conn.reconnect(None).await);
        assert_eq!(conn.state(), ConnectionState::Ready);
        assert_eq!(conn.call(&["PING"]).await.unwrap(), ReplyValue::status("PONG"));
    }

    #[tokio::test]
    async fn test_reconnect_needs_an_endpoint() {
        let mut conn = Connection::new(ConnectionConfig::default());
        assert!(matches!(conn.reconnect(None).await, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn test_unix_socket() {
        let path = std::env::temp_dir().join(format!("respwire-conn-{}.sock", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let listener = UnixListener::bind(&path).unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let _ = stream.read(&mut buf).await.unwrap();
            stream
                .write_all(b"%1\r\n+proto\r\n:3\r\n")
                .await
                .unwrap();
            let _ = stream.read(&mut buf).await;
        });

        let mut conn = Connection::open(Endpoint::unix(&path), None, quick(5_000))
            .await
            .unwrap();
        let reply = conn.call(&["HELLO", "3"]).await.unwrap();
        assert_eq!(
            reply,
            ReplyValue::Map(vec![(ReplyValue::status("proto"), ReplyValue::Integer(3))])
        );
        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn test_tls_connection() {
        let pki = generate_pki();
        let port = spawn_tls_peer(pki.server_config(), b"+PONG\r\n");

        let mut conn = Connection::open(
            Endpoint::tcp("127.0.0.1", port),
            Some(pki.client_context()),
            quick(5_000),
        )
        .await
        .unwrap();

        assert_eq!(conn.call(&["PING"]).await.unwrap(), ReplyValue::status("PONG"));
        assert!(conn.measure_round_trip(None).await.unwrap() >= 0.0);
        conn.close();
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn test_tls_truncation_is_fatal_read_timeout() {
        let pki = generate_pki();
        let port = spawn_truncating_tls_peer(pki.server_config());

        let mut conn = Connection::open(
            Endpoint::tcp("127.0.0.1", port),
            Some(pki.client_context()),
            quick(5_000),
        )
        .await
        .unwrap();

        let err = conn.call(&["PING"]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReadTimeout);
        assert!(!conn.is_connected());
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(matches!(conn.read().await, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn test_cancelled_read_with_timeout_keeps_configured_timeout() {
        let endpoint = scripted_peer(1, |_, stream| async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            drop(stream);
        })
        .await;

        let mut conn = Connection::open(endpoint, None, quick(50)).await.unwrap();
        conn.write(&["PING"]).unwrap();

        let cancelled = tokio::time::timeout(
            Duration::from_millis(100),
            conn.read_with_timeout(Duration::from_secs(20)),
        )
        .await;
        assert!(cancelled.is_err());
        assert_eq!(conn.config().read_timeout.as_millis(), 50);

        let err = conn.read().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReadTimeout);
        assert!(conn.is_connected());
    }

    #[tokio::test]
    async fn test_cancelled_connect_leaves_disconnected() {
        // A plain peer that never answers the TLS hello.
        let endpoint = scripted_peer(1, |_, stream| async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            drop(stream);
        })
        .await;

        let pki = generate_pki();
        let mut conn = Connection::new(ConnectionConfig::default());
        let cancelled = tokio::time::timeout(
            Duration::from_millis(100),
            conn.connect(endpoint, Some(pki.client_context())),
        )
        .await;
        assert!(cancelled.is_err());
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(!conn.is_connected());
        assert!(matches!(conn.write(&["PING"]), Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn test_write_timeout_in_flush_is_fatal() {
        let endpoint = scripted_peer(1, |_, stream| async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            drop(stream);
        })
        .await;

        let mut conn = Connection::open(endpoint, None, quick(100)).await.unwrap();
        let payload = vec![b'x'; 32 * 1024 * 1024];
        let args: [&[u8]; 3] = [b"SET", b"big", &payload];
        let err = conn
            .send_command(&args)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WriteTimeout);
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn test_write_timeout_in_read_keeps_connection() {
        let endpoint = scripted_peer(1, |_, stream| async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            drop(stream);
        })
        .await;

        let mut conn = Connection::open(endpoint, None, quick(100)).await.unwrap();
        let payload = vec![b'x'; 32 * 1024 * 1024];
        let args: [&[u8]; 3] = [b"SET", b"big", &payload];
        conn.write(&args).unwrap();
        let err = conn.read().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WriteTimeout);
        assert!(conn.is_connected());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = Endpoint::tcp("127.0.0.1", listener.local_addr().unwrap().port());

        let mut conn = Connection::new(ConnectionConfig::default());
        conn.close();
        assert_eq!(conn.state(), ConnectionState::Disconnected);

        conn.connect(endpoint, None).await.unwrap();
        conn.close();
        conn.close();
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(!conn.is_connected());
        assert!(matches!(conn.read().await, Err(Error::NotConnected)));

        assert_ok!(conn.reconnect(None).await);
        assert!(conn.is_connected());
    }
}
