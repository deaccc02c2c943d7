//! HELLO / ACK handshake.

use std::time::Duration;
use tokio::io::{ReadHalf, WriteHalf};

use super::HandshakeError;
use crate::config::{SessionConfig, TimeoutConfig};
use crate::net::{BoxedStream, Connection, Dialer};
use crate::protocol::{Hello, HelloAck, Message, PduReader, PduWriter};
use crate::resilience::with_timeout;

pub(crate) const DIAL_OPERATION: &str = "dial";

/// A connection whose handshake completed.
pub struct Established {
    /// Identity assigned by the backend in its ACK.
    pub identity: String,
    pub addr: String,
    /// Health-check interval confirmed by the backend.
    pub check_interval: Duration,
    pub ack: HelloAck,
    pub(crate) connection: Box<dyn Connection>,
    pub(crate) reader: PduReader<ReadHalf<BoxedStream>>,
    pub(crate) writer: PduWriter<WriteHalf<BoxedStream>>,
}

impl std::fmt::Debug for Established {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Established")
            .field("identity", &self.identity)
            .field("addr", &self.addr)
            .field("conn", &self.connection.id())
            .field("check_interval", &self.check_interval)
            .finish()
    }
}

pub(crate) fn hello_for(session: &SessionConfig) -> Hello {
    Hello {
        supported_metrics: session.supported_metrics.clone(),
        check_interval: session.check_interval_secs,
        auth_token: session.auth_token.clone(),
        version: session.protocol_version,
    }
}

/// Dial `addr`, open a stream and run the HELLO exchange.
pub async fn connect(
    dialer: &dyn Dialer,
    addr: &str,
    session: &SessionConfig,
    timeouts: &TimeoutConfig,
) -> Result<Established, HandshakeError> {
    let io = timeouts.io();

    let connection = with_timeout(DIAL_OPERATION, timeouts.connect(), dialer.dial(addr))
        .await?
        .map_err(HandshakeError::Dial)?;
    let conn_id = connection.id();
    tracing::debug!(addr = %addr, conn = %conn_id, "Connected, handshaking");

    let stream = with_timeout("open stream", io, connection.open_stream())
        .await?
        .map_err(HandshakeError::OpenStream)?;
    let (read_half, write_half) = tokio::io::split(stream);
    let mut reader = PduReader::new(read_half);
    let mut writer = PduWriter::new(write_half);

    let hello = hello_for(session);
    let proposed = hello.check_interval;
    let pdu = Message::Hello(hello)
        .to_pdu()
        .map_err(HandshakeError::Encode)?;
    with_timeout("write HELLO", io, writer.write_pdu(&pdu))
        .await?
        .map_err(HandshakeError::Write)?;

    let reply = with_timeout("read ACK", io, reader.read_pdu())
        .await?
        .map_err(|e| {
            if e.is_transport() {
                HandshakeError::Read(e)
            } else {
                HandshakeError::Decode(e)
            }
        })?;

    let ack = match Message::from_pdu(&reply).map_err(HandshakeError::Decode)? {
        Message::Ack(ack) => ack,
        other => return Err(HandshakeError::UnexpectedReply(other.message_type())),
    };
    if ack.server_id.is_empty() {
        return Err(HandshakeError::EmptyIdentity);
    }

    let interval_secs = if ack.check_interval > 0 {
        ack.check_interval
    } else {
        proposed
    };

    tracing::info!(
        addr = %addr,
        conn = %conn_id,
        identity = %ack.server_id,
        check_interval_secs = interval_secs,
        confirmed_metrics = ?ack.confirmed_metrics,
        "Handshake complete"
    );

    Ok(Established {
        identity: ack.server_id.clone(),
        addr: addr.to_string(),
        check_interval: Duration::from_secs(interval_secs.max(1)),
        ack,
        connection,
        reader,
        writer,
    })
}
