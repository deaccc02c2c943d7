//! Transport abstraction.
//!
//! # Responsibilities
//! - `Dialer`: establish a connection to a backend address
//! - `Connection`: open a logical stream on an established connection
//! - `TcpDialer`: TCP transport, optionally wrapped in TLS
//!
//! # Design Decisions
//! - Streams are type-erased (`BoxedStream`) so sessions do not care which
//!   transport produced them
//! - A TCP connection carries exactly one logical stream; opening a second
//!   one fails instead of silently sharing bytes

use async_trait::async_trait;
use parking_lot::Mutex;
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use super::connection::ConnectionId;
use super::tls::ClientTls;

/// Byte stream usable by a peer session.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

pub type BoxedStream = Box<dyn AsyncStream>;

/// Error type for transport operations.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("failed to dial {addr}: {source}")]
    Dial {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("TLS handshake with {addr} failed: {source}")]
    Tls {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to open stream on {conn}: {reason}")]
    OpenStream { conn: ConnectionId, reason: String },
}

/// Establishes connections to backends.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, addr: &str) -> Result<Box<dyn Connection>, TransportError>;
}

/// An established connection to one backend.
#[async_trait]
pub trait Connection: Send + Sync {
    fn id(&self) -> ConnectionId;

    /// Address this connection was dialed to.
    fn remote_addr(&self) -> &str;

    async fn open_stream(&self) -> Result<BoxedStream, TransportError>;
}

/// A connection whose transport yields a single stream.
pub struct SingleStreamConnection {
    id: ConnectionId,
    addr: String,
    stream: Mutex<Option<BoxedStream>>,
}

impl SingleStreamConnection {
    pub fn new(addr: impl Into<String>, stream: BoxedStream) -> Self {
        Self {
            id: ConnectionId::new(),
            addr: addr.into(),
            stream: Mutex::new(Some(stream)),
        }
    }
}

#[async_trait]
impl Connection for SingleStreamConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn remote_addr(&self) -> &str {
        &self.addr
    }

    async fn open_stream(&self) -> Result<BoxedStream, TransportError> {
        self.stream
            .lock()
            .take()
            .ok_or_else(|| TransportError::OpenStream {
                conn: self.id,
                reason: "stream already opened".to_string(),
            })
    }
}

/// TCP dialer, with TLS when a certificate is configured.
#[derive(Default)]
pub struct TcpDialer {
    tls: Option<ClientTls>,
}

impl TcpDialer {
    pub fn new(tls: Option<ClientTls>) -> Self {
        Self { tls }
    }

    pub fn plaintext() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, addr: &str) -> Result<Box<dyn Connection>, TransportError> {
        let tcp = TcpStream::connect(addr)
            .await
            .map_err(|source| TransportError::Dial {
                addr: addr.to_string(),
                source,
            })?;
        if let Err(e) = tcp.set_nodelay(true) {
            tracing::debug!(addr = %addr, error = %e, "Failed to set TCP_NODELAY");
        }

        let stream: BoxedStream = match &self.tls {
            Some(tls) => {
                let tls_stream = tls
                    .connect(tcp)
                    .await
                    .map_err(|source| TransportError::Tls {
                        addr: addr.to_string(),
                        source,
                    })?;
                Box::new(tls_stream)
            }
            None => Box::new(tcp),
        };

        Ok(Box::new(SingleStreamConnection::new(addr, stream)))
    }
}
