//! Peer session subsystem.
//!
//! # States
//! ```text
//! Connecting → Handshaking → Active(healthy) ⇄ Active(degraded) → Terminated
//! ```
//!
//! # Data Flow
//! ```text
//! handshake.rs:
//!     dial → open stream → HELLO → ACK → backend identity + check interval
//!
//! peer.rs (Active):
//!     every check interval: HEALTH_REQUEST → read reply → classify
//!         HEALTH_RESPONSE → registry.mark_healthy
//!         ERROR / read or write failure → registry.mark_unhealthy
//!         CONFIG_ACK → logged, keep reading
//!         garbled frame → logged, not counted
//!     threshold crossed → Terminated (stream closed)
//!     cancellation → TERMINATE → TERMINATE_ACK → Terminated
//! ```
//!
//! # Design Decisions
//! - A session owns its stream; the only other writer is config broadcast,
//!   which goes through the same `SessionHandle` writer lock
//! - A session only ever touches its own registry record
//! - Sessions are never reused; every reconnect builds a new one

pub mod handshake;
pub mod peer;

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::WriteHalf;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::net::{BoxedStream, ConnectionId, TransportError};
use crate::protocol::{Message, MessageType, Pdu, PduError, PduWriter};
use crate::resilience::{with_timeout, TimeoutError};

pub use handshake::{connect, Established};
pub use peer::{PeerSession, SessionEnd};

/// Lifecycle state of a peer session, used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Handshaking,
    /// Handshake done; `healthy` is false while failures are accumulating.
    Active { healthy: bool },
    Terminated,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Handshaking => write!(f, "handshaking"),
            SessionState::Active { healthy: true } => write!(f, "active"),
            SessionState::Active { healthy: false } => write!(f, "degraded"),
            SessionState::Terminated => write!(f, "terminated"),
        }
    }
}

/// Why a handshake did not produce an active session.
#[derive(Error, Debug)]
pub enum HandshakeError {
    #[error("dial failed: {0}")]
    Dial(#[source] TransportError),

    #[error("stream open failed: {0}")]
    OpenStream(#[source] TransportError),

    #[error("failed to encode HELLO: {0}")]
    Encode(#[source] PduError),

    #[error("failed to write HELLO: {0}")]
    Write(#[source] PduError),

    #[error("failed to read ACK: {0}")]
    Read(#[source] PduError),

    #[error("failed to decode ACK: {0}")]
    Decode(#[source] PduError),

    #[error("expected ACK, got {0}")]
    UnexpectedReply(MessageType),

    #[error("ACK carried an empty server_id")]
    EmptyIdentity,

    #[error(transparent)]
    Timeout(#[from] TimeoutError),

    #[error("cancelled")]
    Cancelled,
}

impl HandshakeError {
    /// True when no connection was ever established.
    pub fn is_dial_failure(&self) -> bool {
        match self {
            HandshakeError::Dial(_) => true,
            HandshakeError::Timeout(t) => t.operation == handshake::DIAL_OPERATION,
            _ => false,
        }
    }
}

/// Failure to deliver a message on a session stream.
#[derive(Error, Debug)]
pub enum SendError {
    #[error("failed to encode {mtype}: {source}")]
    Encode {
        mtype: MessageType,
        #[source]
        source: PduError,
    },

    #[error("failed to write {mtype}: {source}")]
    Write {
        mtype: MessageType,
        #[source]
        source: PduError,
    },

    #[error(transparent)]
    Timeout(#[from] TimeoutError),
}

type SharedWriter = Arc<Mutex<PduWriter<WriteHalf<BoxedStream>>>>;

/// Clonable handle to a live session.
///
/// Writes through the handle are serialized with the session's own
/// health-check writes.
#[derive(Clone)]
pub struct SessionHandle {
    identity: Arc<str>,
    addr: Arc<str>,
    conn: ConnectionId,
    writer: SharedWriter,
    io_timeout: Duration,
    cancel: CancellationToken,
}

impl SessionHandle {
    pub(crate) fn new(
        identity: &str,
        addr: &str,
        conn: ConnectionId,
        writer: PduWriter<WriteHalf<BoxedStream>>,
        io_timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            identity: Arc::from(identity),
            addr: Arc::from(addr),
            conn,
            writer: Arc::new(Mutex::new(writer)),
            io_timeout,
            cancel,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.conn
    }

    pub async fn send(&self, message: &Message) -> Result<(), SendError> {
        let pdu = message.to_pdu().map_err(|source| SendError::Encode {
            mtype: message.message_type(),
            source,
        })?;
        self.send_pdu(&pdu).await
    }

    /// Write one frame. Waiting for the writer lock counts against the deadline.
    pub async fn send_pdu(&self, pdu: &Pdu) -> Result<(), SendError> {
        let write = async {
            let mut writer = self.writer.lock().await;
            writer.write_pdu(pdu).await
        };
        with_timeout("write", self.io_timeout, write)
            .await?
            .map_err(|source| SendError::Write {
                mtype: pdu.mtype,
                source,
            })
    }

    /// Ask the session to terminate. It sends TERMINATE and exits.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) async fn shutdown_stream(&self) {
        let mut writer = self.writer.lock().await;
        if let Err(e) = with_timeout("shutdown", self.io_timeout, writer.shutdown()).await {
            tracing::debug!(identity = %self.identity, error = %e, "Stream shutdown timed out");
        }
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("identity", &self.identity)
            .field("addr", &self.addr)
            .field("conn", &self.conn)
            .field("closed", &self.cancel.is_cancelled())
            .finish()
    }
}
