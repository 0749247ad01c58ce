//! TCP and TLS session plumbing.

use std::{
    io,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use stream_core::{ConfigError, SessionTarget, StreamError, StreamErrorCategory};
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    net::TcpStream,
};
use tokio_rustls::{
    TlsConnector,
    client::TlsStream,
    rustls::{self, ClientConfig, RootCertStore, pki_types::ServerName},
};

/// Upper bound on TCP connect plus TLS handshake.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors raised while opening or driving a transport session.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect to {host}:{port} failed: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("connect to {host}:{port} timed out")]
    ConnectTimeout { host: String, port: u16 },
    #[error("invalid TLS server name '{0}'")]
    InvalidServerName(String),
    #[error("TLS handshake failed: {0}")]
    Handshake(#[source] io::Error),
    #[error("TLS is required but no connector is configured")]
    TlsUnavailable,
    #[error("TLS configuration failed: {0}")]
    TlsConfig(#[from] rustls::Error),
    #[error("session I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("session task failed: {0}")]
    Task(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl TransportError {
    /// Stable code used in logs and in the controller's close reason.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect_failed",
            Self::ConnectTimeout { .. } => "connect_timeout",
            Self::InvalidServerName(_) => "invalid_server_name",
            Self::Handshake(_) => "tls_handshake_failed",
            Self::TlsUnavailable => "tls_unavailable",
            Self::TlsConfig(_) => "tls_config_invalid",
            Self::Io(_) => "session_io_failed",
            Self::Task(_) => "session_task_failed",
            Self::Config(_) => "invalid_config",
        }
    }

    pub fn to_stream_error(&self) -> StreamError {
        let category = match self {
            Self::Config(_) | Self::TlsConfig(_) | Self::TlsUnavailable => {
                StreamErrorCategory::Config
            }
            Self::Task(_) => StreamErrorCategory::Internal,
            _ => StreamErrorCategory::Network,
        };
        StreamError::new(category, self.code(), self.to_string())
    }
}

/// One open transport session, plain or TLS.
pub enum SessionStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl std::fmt::Debug for SessionStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plain(_) => f.write_str("SessionStream::Plain"),
            Self::Tls(_) => f.write_str("SessionStream::Tls"),
        }
    }
}

impl AsyncRead for SessionStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Tls(stream) => Pin::new(&mut **stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for SessionStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Tls(stream) => Pin::new(&mut **stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Self::Tls(stream) => Pin::new(&mut **stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Tls(stream) => Pin::new(&mut **stream).poll_shutdown(cx),
        }
    }
}

/// TLS connector trusting the bundled webpki roots.
pub fn default_tls_connector() -> Result<TlsConnector, TransportError> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    tls_connector_with_roots(roots)
}

/// TLS connector trusting only `roots`.
pub fn tls_connector_with_roots(roots: RootCertStore) -> Result<TlsConnector, TransportError> {
    let config =
        ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()?
            .with_root_certificates(roots)
            .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(config)))
}

/// Open a session to `target`, upgrading to TLS when it is secure.
pub async fn connect(
    target: SessionTarget,
    tls: Option<TlsConnector>,
) -> Result<SessionStream, TransportError> {
    let host = target.host.clone();
    let port = target.port;
    tokio::time::timeout(CONNECT_TIMEOUT, open(target, tls))
        .await
        .map_err(|_| TransportError::ConnectTimeout { host, port })?
}

async fn open(
    target: SessionTarget,
    tls: Option<TlsConnector>,
) -> Result<SessionStream, TransportError> {
    let tcp = TcpStream::connect((target.host.as_str(), target.port))
        .await
        .map_err(|source| TransportError::Connect {
            host: target.host.clone(),
            port: target.port,
            source,
        })?;
    tcp.set_nodelay(true)?;

    if !target.secure {
        return Ok(SessionStream::Plain(tcp));
    }

    let connector = tls.ok_or(TransportError::TlsUnavailable)?;
    let server_name = ServerName::try_from(target.host.clone())
        .map_err(|_| TransportError::InvalidServerName(target.host.clone()))?;
    let stream = connector
        .connect(server_name, tcp)
        .await
        .map_err(TransportError::Handshake)?;
    Ok(SessionStream::Tls(Box::new(stream)))
}
