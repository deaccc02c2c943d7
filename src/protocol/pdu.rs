//! PDU envelope and framing.
//!
//! # Wire Format
//!
//! ```text
//! +---------------+----------------+--------------------+
//! | Type (1 byte) | Length (2 BE)  | Payload (N bytes)  |
//! +---------------+----------------+--------------------+
//! ```
//!
//! - **Type**: `MessageType` discriminator
//! - **Length**: payload length in bytes, big-endian u16
//! - **Payload**: type-specific document, interpreted by `message.rs`
//!
//! A whole frame never exceeds [`MAX_PDU_SIZE`] bytes.

use bytes::{BufMut, Bytes, BytesMut};
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum size of an encoded frame, header included.
pub const MAX_PDU_SIZE: usize = 1024;

/// Size of the `type` + `length` header.
pub const HEADER_SIZE: usize = 3;

/// Largest payload that fits in a frame.
pub const MAX_PAYLOAD_SIZE: usize = MAX_PDU_SIZE - HEADER_SIZE;

/// Codec errors.
#[derive(Error, Debug)]
pub enum PduError {
    #[error("frame too large: {size} bytes (max: {max})")]
    Oversize { size: usize, max: usize },

    #[error("truncated frame: {0} bytes is shorter than the header")]
    Truncated(usize),

    #[error("declared length {declared} does not match payload size {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("unknown message type: {0}")]
    UnknownType(u8),

    #[error("failed to encode {mtype} payload: {source}")]
    Encoding {
        mtype: MessageType,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to decode {mtype} payload: {source}")]
    Decoding {
        mtype: MessageType,
        #[source]
        source: serde_json::Error,
    },

    #[error("connection closed")]
    Closed,

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl PduError {
    /// True when the error came from the transport rather than from the bytes
    /// that were read. Transport errors end an exchange; the others only
    /// invalidate a single frame.
    pub fn is_transport(&self) -> bool {
        matches!(self, PduError::Io(_) | PduError::Closed)
    }
}

/// Message type tags.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Data = 0,
    Ack = 1,
    Hello = 2,
    ConfigUpdate = 3,
    ConfigAck = 4,
    HealthData = 5,
    HealthRequest = 6,
    HealthResponse = 7,
    Error = 8,
    Terminate = 9,
    TerminateAck = 10,
}

impl MessageType {
    pub const ALL: [MessageType; 11] = [
        MessageType::Data,
        MessageType::Ack,
        MessageType::Hello,
        MessageType::ConfigUpdate,
        MessageType::ConfigAck,
        MessageType::HealthData,
        MessageType::HealthRequest,
        MessageType::HealthResponse,
        MessageType::Error,
        MessageType::Terminate,
        MessageType::TerminateAck,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Data => "DATA",
            MessageType::Ack => "ACK",
            MessageType::Hello => "HELLO",
            MessageType::ConfigUpdate => "CONFIG_UPDATE",
            MessageType::ConfigAck => "CONFIG_ACK",
            MessageType::HealthData => "HEALTH_DATA",
            MessageType::HealthRequest => "HEALTH_REQUEST",
            MessageType::HealthResponse => "HEALTH_RESPONSE",
            MessageType::Error => "ERROR",
            MessageType::Terminate => "TERMINATE",
            MessageType::TerminateAck => "TERMINATE_ACK",
        }
    }
}

impl TryFrom<u8> for MessageType {
    type Error = PduError;

    fn try_from(value: u8) -> Result<Self, PduError> {
        MessageType::ALL
            .get(value as usize)
            .copied()
            .ok_or(PduError::UnknownType(value))
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A protocol data unit: type tag plus opaque payload.
///
/// The length field is not stored; it is always `payload.len()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pdu {
    pub mtype: MessageType,
    pub payload: Bytes,
}

impl Pdu {
    pub fn new(mtype: MessageType, payload: impl Into<Bytes>) -> Self {
        Self {
            mtype,
            payload: payload.into(),
        }
    }

    /// A frame with no payload (HEALTH_REQUEST, TERMINATE).
    pub fn empty(mtype: MessageType) -> Self {
        Self::new(mtype, Bytes::new())
    }

    /// Declared payload length.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Encode to wire bytes. Fails rather than truncating an oversize payload.
    pub fn encode(&self) -> Result<Bytes, PduError> {
        let total = HEADER_SIZE + self.payload.len();
        if total > MAX_PDU_SIZE {
            return Err(PduError::Oversize {
                size: total,
                max: MAX_PDU_SIZE,
            });
        }

        let mut buf = BytesMut::with_capacity(total);
        buf.put_u8(self.mtype as u8);
        buf.put_u16(self.payload.len() as u16);
        buf.put_slice(&self.payload);
        Ok(buf.freeze())
    }

    /// Decode one complete frame.
    ///
    /// `raw` must hold exactly one frame: the declared length has to match
    /// the bytes that follow the header.
    pub fn decode(raw: &[u8]) -> Result<Self, PduError> {
        if raw.len() > MAX_PDU_SIZE {
            return Err(PduError::Oversize {
                size: raw.len(),
                max: MAX_PDU_SIZE,
            });
        }
        if raw.len() < HEADER_SIZE {
            return Err(PduError::Truncated(raw.len()));
        }

        let mtype = MessageType::try_from(raw[0])?;
        let declared = u16::from_be_bytes([raw[1], raw[2]]) as usize;
        let actual = raw.len() - HEADER_SIZE;
        if declared != actual {
            return Err(PduError::LengthMismatch { declared, actual });
        }

        Ok(Self {
            mtype,
            payload: Bytes::copy_from_slice(&raw[HEADER_SIZE..]),
        })
    }
}

/// Reads frames from a byte stream into a fixed-size receive buffer.
///
/// A partially received frame stays in the buffer between calls, so a
/// `read_pdu` future dropped on a deadline resumes where it stopped instead
/// of losing its place in the stream.
pub struct PduReader<R> {
    inner: R,
    buf: Box<[u8; MAX_PDU_SIZE]>,
    filled: usize,
    discard: Option<Discard>,
}

/// An oversize frame being skipped.
#[derive(Debug, Clone, Copy)]
struct Discard {
    remaining: usize,
    size: usize,
}

impl<R: AsyncRead + Unpin> PduReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Box::new([0u8; MAX_PDU_SIZE]),
            filled: 0,
            discard: None,
        }
    }

    /// Read the next frame.
    ///
    /// Cancel-safe: bytes already taken off the stream are kept until the
    /// frame completes. An oversize frame or an unknown type tag is consumed
    /// from the stream before the error is returned, so the caller may keep
    /// reading.
    pub async fn read_pdu(&mut self) -> Result<Pdu, PduError> {
        if self.discard.is_none() {
            self.fill_to(HEADER_SIZE).await?;
            let declared = u16::from_be_bytes([self.buf[1], self.buf[2]]) as usize;
            if declared <= MAX_PAYLOAD_SIZE {
                let end = HEADER_SIZE + declared;
                self.fill_to(end).await?;
                self.filled = 0;
                tracing::trace!(bytes = end, "frame received");
                return Pdu::decode(&self.buf[..end]);
            }
            self.filled = 0;
            self.discard = Some(Discard {
                remaining: declared,
                size: HEADER_SIZE + declared,
            });
        }

        let size = self.drain().await?;
        Err(PduError::Oversize {
            size,
            max: MAX_PDU_SIZE,
        })
    }

    /// Pending partial frame length, zero between frames.
    pub fn buffered(&self) -> usize {
        self.filled
    }

    async fn fill_to(&mut self, want: usize) -> Result<(), PduError> {
        while self.filled < want {
            let n = self.inner.read(&mut self.buf[self.filled..want]).await?;
            if n == 0 {
                let at_boundary = self.filled < HEADER_SIZE;
                self.filled = 0;
                return Err(if at_boundary {
                    PduError::Closed
                } else {
                    PduError::Io(io::ErrorKind::UnexpectedEof.into())
                });
            }
            self.filled += n;
        }
        Ok(())
    }

    /// Skip the rest of an oversize frame and return its total size.
    async fn drain(&mut self) -> Result<usize, PduError> {
        while let Some(discard) = self.discard {
            if discard.remaining == 0 {
                self.discard = None;
                return Ok(discard.size);
            }
            let chunk = discard.remaining.min(MAX_PDU_SIZE);
            let n = self.inner.read(&mut self.buf[..chunk]).await?;
            if n == 0 {
                self.discard = None;
                return Err(PduError::Closed);
            }
            self.discard = Some(Discard {
                remaining: discard.remaining - n,
                ..discard
            });
        }
        Ok(0)
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// Writes whole frames to a byte stream.
pub struct PduWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> PduWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub async fn write_pdu(&mut self, pdu: &Pdu) -> Result<(), PduError> {
        let encoded = pdu.encode()?;
        self.inner.write_all(&encoded).await?;
        self.inner.flush().await?;
        tracing::trace!(mtype = %pdu.mtype, bytes = encoded.len(), "frame sent");
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), PduError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;

    #[test]
    fn encodes_header_big_endian() {
        let pdu = Pdu::new(MessageType::Hello, &b"{}"[..]);
        let raw = pdu.encode().unwrap();
        assert_eq!(&raw[..], &[2, 0, 2, b'{', b'}']);
    }

    #[test]
    fn empty_payload_frame() {
        let raw = Pdu::empty(MessageType::HealthRequest).encode().unwrap();
        assert_eq!(&raw[..], &[6, 0, 0]);
        let back = Pdu::decode(&raw).unwrap();
        assert_eq!(back.mtype, MessageType::HealthRequest);
        assert!(back.is_empty());
    }

    #[test]
    fn rejects_length_mismatch() {
        let err = Pdu::decode(&[7, 0, 5, b'a', b'b']).unwrap_err();
        assert!(matches!(
            err,
            PduError::LengthMismatch {
                declared: 5,
                actual: 2
            }
        ));
    }

    #[test]
    fn rejects_unknown_type() {
        assert!(matches!(
            Pdu::decode(&[42, 0, 0]).unwrap_err(),
            PduError::UnknownType(42)
        ));
    }

    #[test]
    fn rejects_truncated_header() {
        assert!(matches!(
            Pdu::decode(&[1]).unwrap_err(),
            PduError::Truncated(1)
        ));
    }

    #[test]
    fn payload_at_limit_fits() {
        let pdu = Pdu::new(MessageType::Data, vec![b'x'; MAX_PAYLOAD_SIZE]);
        let raw = pdu.encode().unwrap();
        assert_eq!(raw.len(), MAX_PDU_SIZE);
        assert_eq!(Pdu::decode(&raw).unwrap(), pdu);
    }

    #[tokio::test]
    async fn reader_skips_oversize_frame_and_continues() {
        let (mut client, server) = tokio::io::duplex(4096);

        let mut oversize = vec![MessageType::Data as u8];
        oversize.extend_from_slice(&(2000u16).to_be_bytes());
        oversize.extend(std::iter::repeat(b'z').take(2000));
        client.write_all(&oversize).await.unwrap();
        let ok = Pdu::new(MessageType::Ack, &b"{}"[..]).encode().unwrap();
        client.write_all(&ok).await.unwrap();

        let mut reader = PduReader::new(server);
        assert!(matches!(
            reader.read_pdu().await.unwrap_err(),
            PduError::Oversize { size: 2003, .. }
        ));
        let next = reader.read_pdu().await.unwrap();
        assert_eq!(next.mtype, MessageType::Ack);
    }

    #[tokio::test]
    async fn reader_reports_closed_stream() {
        let (client, server) = tokio::io::duplex(64);
        drop(client);
        let mut reader = PduReader::new(server);
        let err = reader.read_pdu().await.unwrap_err();
        assert!(matches!(err, PduError::Closed));
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn writer_and_reader_agree() {
        let (client, server) = tokio::io::duplex(4096);
        let mut writer = PduWriter::new(client);
        let mut reader = PduReader::new(server);

        let sent = Pdu::new(MessageType::HealthResponse, &b"{\"metrics\":{}}"[..]);
        writer.write_pdu(&sent).await.unwrap();
        writer.write_pdu(&Pdu::empty(MessageType::Terminate)).await.unwrap();

        assert_eq!(reader.read_pdu().await.unwrap(), sent);
        assert_eq!(
            reader.read_pdu().await.unwrap().mtype,
            MessageType::Terminate
        );
    }

    #[tokio::test(start_paused = true)]
    async fn reader_resumes_frame_after_deadline() {
        let (mut client, server) = tokio::io::duplex(4096);
        let mut reader = PduReader::new(server);
        let sent = Pdu::new(MessageType::HealthResponse, &b"{\"metrics\":{}}"[..]);
        let raw = sent.encode().unwrap();

        client.write_all(&raw[..2]).await.unwrap();
        let first = tokio::time::timeout(Duration::from_secs(1), reader.read_pdu()).await;
        assert!(first.is_err());
        assert_eq!(reader.buffered(), 2);

        client.write_all(&raw[2..7]).await.unwrap();
        let second = tokio::time::timeout(Duration::from_secs(1), reader.read_pdu()).await;
        assert!(second.is_err());
        assert_eq!(reader.buffered(), 7);

        client.write_all(&raw[7..]).await.unwrap();
        let follow = Pdu::empty(MessageType::TerminateAck).encode().unwrap();
        client.write_all(&follow).await.unwrap();

        assert_eq!(reader.read_pdu().await.unwrap(), sent);
        assert_eq!(reader.buffered(), 0);
        assert_eq!(
            reader.read_pdu().await.unwrap().mtype,
            MessageType::TerminateAck
        );
    }

    #[tokio::test(start_paused = true)]
    async fn reader_resumes_discard_after_deadline() {
        let (mut client, server) = tokio::io::duplex(4096);
        let mut reader = PduReader::new(server);

        let mut oversize = vec![MessageType::Data as u8];
        oversize.extend_from_slice(&(1500u16).to_be_bytes());
        oversize.extend(std::iter::repeat(b'z').take(1500));
        client.write_all(&oversize[..800]).await.unwrap();
        let first = tokio::time::timeout(Duration::from_secs(1), reader.read_pdu()).await;
        assert!(first.is_err());

        client.write_all(&oversize[800..]).await.unwrap();
        let ok = Pdu::new(MessageType::Ack, &b"{}"[..]).encode().unwrap();
        client.write_all(&ok).await.unwrap();

        assert!(matches!(
            reader.read_pdu().await.unwrap_err(),
            PduError::Oversize { size: 1503, .. }
        ));
        assert_eq!(reader.read_pdu().await.unwrap().mtype, MessageType::Ack);
    }

    #[tokio::test]
    async fn reader_reports_eof_inside_payload() {
        let (mut client, server) = tokio::io::duplex(64);
        client.write_all(&[7, 0, 10, b'{']).await.unwrap();
        drop(client);
        let mut reader = PduReader::new(server);
        let err = reader.read_pdu().await.unwrap_err();
        assert!(matches!(err, PduError::Io(ref e) if e.kind() == io::ErrorKind::UnexpectedEof));
        assert!(err.is_transport());
    }

    proptest! {
        #[test]
        fn round_trip_any_type(
            tag in 0usize..MessageType::ALL.len(),
            payload in proptest::collection::vec(any::<u8>(), 0..=MAX_PAYLOAD_SIZE),
        ) {
            let pdu = Pdu::new(MessageType::ALL[tag], payload);
            let raw = pdu.encode().unwrap();
            prop_assert_eq!(Pdu::decode(&raw).unwrap(), pdu);
        }

        #[test]
        fn oversize_payload_never_truncates(extra in 1usize..512) {
            let pdu = Pdu::new(MessageType::Data, vec![0u8; MAX_PAYLOAD_SIZE + extra]);
            let is_oversize = matches!(pdu.encode(), Err(PduError::Oversize { .. }));
            prop_assert!(is_oversize);

            let mut raw = vec![MessageType::Data as u8];
            raw.extend_from_slice(&((MAX_PAYLOAD_SIZE + extra) as u16).to_be_bytes());
            raw.extend(std::iter::repeat(0u8).take(MAX_PAYLOAD_SIZE + extra));
            let is_oversize = matches!(Pdu::decode(&raw), Err(PduError::Oversize { .. }));
            prop_assert!(is_oversize);
        }
    }
}
