//! Byte transport under a connection: plain TCP or TLS.
//!
//! Trust configuration is the caller's business. A [`TransportSecurity`]
//! wraps an already configured `tokio_rustls::TlsConnector` and the name to
//! verify the server against.

use crate::error::ClientError;
use pin_project_lite::pin_project;
use rustls::pki_types::ServerName;
use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

/// Opaque transport-security handle supplied by the caller.
#[derive(Clone)]
pub struct TransportSecurity {
    connector: TlsConnector,
    server_name: ServerName<'static>,
}

impl TransportSecurity {
    pub fn new(connector: TlsConnector, server_name: ServerName<'static>) -> Self {
        Self {
            connector,
            server_name,
        }
    }

    /// Parses `server_name` as a DNS name or IP address.
    pub fn with_server_name(connector: TlsConnector, server_name: &str) -> Result<Self, ClientError> {
        let server_name = ServerName::try_from(server_name.to_string())
            .map_err(|_| ClientError::TlsHandshake(format!("invalid server name: {}", server_name)))?;
        Ok(Self::new(connector, server_name))
    }
}

impl fmt::Debug for TransportSecurity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportSecurity")
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}

pin_project! {
    /// An established byte stream to the server.
    #[project = TransportProj]
    pub enum Transport {
        Plain { #[pin] stream: TcpStream },
        Tls { #[pin] stream: TlsStream<TcpStream> },
    }
}

impl Transport {
    /// Opens a TCP connection and, with `security`, performs the TLS handshake.
    pub async fn connect(
        address: &str,
        connect_timeout: Duration,
        tcp_nodelay: bool,
        security: Option<&TransportSecurity>,
    ) -> Result<Self, ClientError> {
        tracing::debug!("Connecting to {}", address);
        let tcp = tokio::time::timeout(connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| {
                tracing::debug!("Connect to {} timed out", address);
                ClientError::Timeout
            })??;

        if tcp_nodelay {
            tcp.set_nodelay(true).ok();
        }

        let Some(security) = security else {
            return Ok(Transport::Plain { stream: tcp });
        };

        tracing::debug!("Performing TLS handshake with {}", address);
        let stream = tokio::time::timeout(
            connect_timeout,
            security.connector.connect(security.server_name.clone(), tcp),
        )
        .await
        .map_err(|_| ClientError::Timeout)?
        .map_err(|e| ClientError::TlsHandshake(e.to_string()))?;
        tracing::debug!("TLS handshake complete");

        Ok(Transport::Tls { stream })
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, Transport::Tls { .. })
    }

    pub fn peer_addr(&self) -> io::Result<std::net::SocketAddr> {
        match self {
            Transport::Plain { stream } => stream.peer_addr(),
            Transport::Tls { stream } => stream.get_ref().0.peer_addr(),
        }
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_tls() { "tls" } else { "plain" };
        let mut out = f.debug_struct("Transport");
        out.field("kind", &kind);
        if let Ok(peer) = self.peer_addr() {
            out.field("peer", &peer);
        }
        out.finish()
    }
}

/// Object-safe view of either stream variant.
trait Io: AsyncRead + AsyncWrite {}

impl<T: AsyncRead + AsyncWrite> Io for T {}

impl Transport {
    fn io(self: Pin<&mut Self>) -> Pin<&mut dyn Io> {
        match self.project() {
            TransportProj::Plain { stream } => stream,
            TransportProj::Tls { stream } => stream,
        }
    }
}

impl AsyncRead for Transport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.io().poll_read(cx, buf)
    }
}

impl AsyncWrite for Transport {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        self.io().poll_write(cx, buf)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        self.io().poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        match self {
            Transport::Plain { stream } => stream.is_write_vectored(),
            Transport::Tls { stream } => stream.is_write_vectored(),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.io().poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.io().poll_shutdown(cx)
    }
}
