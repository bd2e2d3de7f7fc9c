//! TLS over the non-blocking socket.
//!
//! The rustls state machine is driven by hand: ciphertext moves between the
//! socket and the session through [`SyncIo`], so a TLS stream has the same
//! would-block contract as a plain one and the connection can wait for
//! readiness with its own timeouts.
//!
//! ```text
//!   plaintext ──> writer() ──> [session] ──> write_tls ──> socket
//!   plaintext <── reader() <── [session] <── read_tls  <── socket
//! ```

use crate::error::{Error, Result};
use crate::timeout::Timeout;
use crate::transport::socket::{Endpoint, Socket, SyncIo};
use crate::transport::IoStatus;
use bytes::{Buf, BytesMut};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, ClientConnection, RootCertStore};
use std::fmt;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace};

/// CA bundle files tried, in order, when no CA is configured.
const SYSTEM_CA_FILES: &[&str] = &[
    "/etc/ssl/certs/ca-certificates.crt",
    "/etc/pki/tls/certs/ca-bundle.crt",
    "/etc/ssl/ca-bundle.pem",
    "/etc/pki/tls/cacert.pem",
    "/etc/ssl/cert.pem",
];

/// CA directory used when none of [`SYSTEM_CA_FILES`] is readable.
const SYSTEM_CA_DIR: &str = "/etc/ssl/certs";

const READ_CHUNK: usize = 16 * 1024;

/// Where a TLS context gets its trust anchors and client identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsOptions {
    /// PEM file with one or more CA certificates.
    pub ca_file: Option<PathBuf>,
    /// Directory of PEM CA certificates.
    pub ca_path: Option<PathBuf>,
    /// PEM client certificate chain.
    pub cert: Option<PathBuf>,
    /// PEM private key for `cert`.
    pub key: Option<PathBuf>,
    /// Name to verify the server certificate against, and to send as SNI.
    pub hostname: Option<String>,
}

/// Why a [`TlsContext`] could not be built.
#[derive(Debug, Error)]
pub enum TlsContextError {
    #[error("failed to load CA certificates from {path}: {reason}")]
    CaFile { path: PathBuf, reason: String },

    #[error("failed to read CA directory {path}: {source}")]
    CaPath {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no usable CA certificates found")]
    NoTrustAnchors,

    #[error("client certificate and private key must be given together")]
    IncompleteIdentity,

    #[error("failed to load client certificate from {path}: {reason}")]
    Certificate { path: PathBuf, reason: String },

    #[error("failed to load private key from {path}: {reason}")]
    PrivateKey { path: PathBuf, reason: String },

    #[error("invalid TLS configuration: {0}")]
    Config(#[from] rustls::Error),
}

/// A reusable client TLS configuration.
#[derive(Clone)]
pub struct TlsContext {
    config: Arc<ClientConfig>,
    hostname: Option<String>,
}

impl TlsContext {
    /// Builds a context from certificate and key files.
    ///
    /// With neither `ca_file` nor `ca_path` set, the system CA bundle is
    /// used. Certificates in `ca_path` that fail to parse are skipped.
    pub fn new(options: &TlsOptions) -> std::result::Result<Self, TlsContextError> {
        let roots = load_roots(options)?;

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let builder = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .with_root_certificates(roots);

        let config = match (&options.cert, &options.key) {
            (Some(cert), Some(key)) => {
                builder.with_client_auth_cert(load_chain(cert)?, load_key(key)?)?
            }
            (None, None) => builder.with_no_client_auth(),
            _ => return Err(TlsContextError::IncompleteIdentity),
        };

        Ok(Self {
            config: Arc::new(config),
            hostname: options.hostname.clone(),
        })
    }

    /// Wraps a caller-built rustls configuration.
    pub fn from_client_config(config: Arc<ClientConfig>, hostname: Option<String>) -> Self {
        Self { config, hostname }
    }

    /// The configured verification name, if any.
    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    /// The name the server certificate is checked against: the configured
    /// hostname, else the TCP host.
    fn server_name(&self, endpoint: &Endpoint) -> Result<ServerName<'static>> {
        let name = self
            .hostname
            .as_deref()
            .or_else(|| endpoint.host())
            .ok_or_else(|| {
                Error::cannot_connect(endpoint, "TLS over a Unix socket needs a hostname")
            })?;
        ServerName::try_from(name.to_string())
            .map_err(|e| Error::cannot_connect(endpoint, format!("invalid TLS hostname {:?}: {}", name, e)))
    }
}

impl fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsContext")
            .field("hostname", &self.hostname)
            .finish_non_exhaustive()
    }
}

fn load_roots(options: &TlsOptions) -> std::result::Result<RootCertStore, TlsContextError> {
    let mut roots = RootCertStore::empty();

    if options.ca_file.is_none() && options.ca_path.is_none() {
        match SYSTEM_CA_FILES.iter().map(Path::new).find(|p| p.is_file()) {
            Some(bundle) => add_ca_file(&mut roots, bundle)?,
            None => add_ca_dir(&mut roots, Path::new(SYSTEM_CA_DIR))?,
        }
    }
    if let Some(file) = &options.ca_file {
        add_ca_file(&mut roots, file)?;
    }
    if let Some(dir) = &options.ca_path {
        add_ca_dir(&mut roots, dir)?;
    }

    if roots.is_empty() {
        return Err(TlsContextError::NoTrustAnchors);
    }
    Ok(roots)
}

fn add_ca_file(roots: &mut RootCertStore, path: &Path) -> std::result::Result<(), TlsContextError> {
    let ca_error = |reason: String| TlsContextError::CaFile {
        path: path.to_path_buf(),
        reason,
    };
    let certs = CertificateDer::pem_file_iter(path)
        .and_then(|iter| iter.collect::<std::result::Result<Vec<_>, _>>())
        .map_err(|e| ca_error(e.to_string()))?;
    if certs.is_empty() {
        return Err(ca_error("no certificates found".to_string()));
    }
    for cert in certs {
        roots.add(cert).map_err(|e| ca_error(e.to_string()))?;
    }
    Ok(())
}

fn add_ca_dir(roots: &mut RootCertStore, dir: &Path) -> std::result::Result<(), TlsContextError> {
    let ca_path_error = |source| TlsContextError::CaPath {
        path: dir.to_path_buf(),
        source,
    };
    for entry in std::fs::read_dir(dir).map_err(ca_path_error)? {
        let path = entry.map_err(ca_path_error)?.path();
        if !path.is_file() {
            continue;
        }
        let Ok(iter) = CertificateDer::pem_file_iter(&path) else {
            continue;
        };
        let (added, ignored) = roots.add_parsable_certificates(iter.filter_map(|c| c.ok()));
        trace!(path = %path.display(), added, ignored, "Loaded CA file");
    }
    Ok(())
}

fn load_chain(path: &Path) -> std::result::Result<Vec<CertificateDer<'static>>, TlsContextError> {
    let cert_error = |reason: String| TlsContextError::Certificate {
        path: path.to_path_buf(),
        reason,
    };
    let chain = CertificateDer::pem_file_iter(path)
        .and_then(|iter| iter.collect::<std::result::Result<Vec<_>, _>>())
        .map_err(|e| cert_error(e.to_string()))?;
    if chain.is_empty() {
        return Err(cert_error("no certificates found".to_string()));
    }
    Ok(chain)
}

fn load_key(path: &Path) -> std::result::Result<PrivateKeyDer<'static>, TlsContextError> {
    PrivateKeyDer::from_pem_file(path).map_err(|e| TlsContextError::PrivateKey {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// An established client session.
pub(crate) struct TlsSession {
    conn: ClientConnection,
}

impl TlsSession {
    /// Runs the client handshake over a connected socket.
    ///
    /// Waits for writability use `write_timeout`, waits for readability use
    /// `read_timeout`. A readability timeout is `ReadTimeout`; every other
    /// failure is `CannotConnect`.
    pub(crate) async fn handshake(
        socket: &Socket,
        endpoint: &Endpoint,
        context: &TlsContext,
        read_timeout: Timeout,
        write_timeout: Timeout,
    ) -> Result<TlsSession> {
        let server_name = context.server_name(endpoint)?;
        let mut conn = ClientConnection::new(Arc::clone(&context.config), server_name)
            .map_err(|e| Error::cannot_connect(endpoint, e))?;
        let failed = |reason: &dyn fmt::Display| Error::cannot_connect(endpoint, format!("TLS handshake failed: {}", reason));

        loop {
            while conn.wants_write() {
                match conn.write_tls(&mut SyncIo(socket)) {
                    Ok(_) => {}
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        match socket.wait_writable(write_timeout).await {
                            Ok(true) => {}
                            Ok(false) => return Err(failed(&"SSL connection timeout")),
                            Err(e) => return Err(failed(&e)),
                        }
                    }
                    Err(e) => return Err(failed(&e)),
                }
            }

            if !conn.is_handshaking() {
                break;
            }

            match conn.read_tls(&mut SyncIo(socket)) {
                Ok(0) => return Err(failed(&"server closed the connection")),
                Ok(_) => {
                    if let Err(e) = conn.process_new_packets() {
                        // Best effort: let the server see our alert.
                        let _ = conn.write_tls(&mut SyncIo(socket));
                        return Err(failed(&e));
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    match socket.wait_readable(read_timeout).await {
                        Ok(true) => {}
                        Ok(false) => return Err(Error::ReadTimeout("SSL connection timeout".to_string())),
                        Err(e) => return Err(failed(&e)),
                    }
                }
                Err(e) => return Err(failed(&e)),
            }
        }

        debug!(
            endpoint = %endpoint,
            version = ?conn.protocol_version(),
            "TLS handshake complete"
        );
        Ok(TlsSession { conn })
    }

    /// Decrypts whatever the socket has into `out`.
    ///
    /// `Ready(0)` is a clean `close_notify` or EOF. A peer that dropped TCP
    /// without `close_notify` fails with `UnexpectedEof`.
    pub(crate) fn read(&mut self, socket: &Socket, out: &mut BytesMut) -> io::Result<IoStatus<usize>> {
        loop {
            let start = out.len();
            out.resize(start + READ_CHUNK, 0);
            let plaintext = self.conn.reader().read(&mut out[start..]);
            let filled = match &plaintext {
                Ok(n) => *n,
                Err(_) => 0,
            };
            out.truncate(start + filled);
            match plaintext {
                Ok(n) => return Ok(IoStatus::Ready(n)),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }

            match self.conn.read_tls(&mut SyncIo(socket)) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(IoStatus::WouldBlock),
                Err(e) => return Err(e),
            }
            self.conn
                .process_new_packets()
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

            // Post-handshake messages (key updates) may queue records.
            match self.flush(socket) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }
        }
    }

    /// Encrypts as much of `pending` as the session accepts and pushes the
    /// records out. `Ready(true)` once `pending` is empty and every record
    /// reached the socket.
    pub(crate) fn write(&mut self, socket: &Socket, pending: &mut BytesMut) -> io::Result<IoStatus<bool>> {
        if !pending.is_empty() {
            let accepted = self.conn.writer().write(pending)?;
            pending.advance(accepted);
        }
        match self.flush(socket) {
            Ok(()) => Ok(IoStatus::Ready(pending.is_empty())),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(IoStatus::WouldBlock),
            Err(e) => Err(e),
        }
    }

    /// Queues `close_notify` and sends it if the socket takes it right away.
    pub(crate) fn shutdown(&mut self, socket: &Socket) {
        self.conn.send_close_notify();
        let _ = self.flush(socket);
    }

    fn flush(&mut self, socket: &Socket) -> io::Result<()> {
        while self.conn.wants_write() {
            if self.conn.write_tls(&mut SyncIo(socket))? == 0 {
                return Err(io::ErrorKind::WriteZero.into());
            }
        }
        Ok(())
    }
}
