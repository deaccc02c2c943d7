//! Typed message payloads.
//!
//! Each `MessageType` has its own payload schema. The envelope is decoded
//! first by `pdu.rs`; payloads are interpreted here only once the type tag is
//! known.

use bytes::Bytes;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;

use super::pdu::{MessageType, Pdu, PduError};

/// HELLO: peer → backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hello {
    pub supported_metrics: Vec<String>,
    pub check_interval: u64,
    /// Opaque token. Carried, never verified.
    pub auth_token: String,
    pub version: f64,
}

/// ACK: backend → peer, answer to HELLO.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelloAck {
    #[serde(default)]
    pub confirmed_metrics: Vec<String>,
    #[serde(default)]
    pub check_interval: u64,
    pub server_id: String,
}

/// HEALTH_RESPONSE: backend → peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    /// RFC3339 timestamp of the sample.
    pub timestamp: String,
    #[serde(default)]
    pub metrics: HashMap<String, f64>,
}

/// CONFIG_UPDATE: peer → backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigUpdate {
    pub new_metrics: Vec<String>,
    pub new_check_interval: u64,
}

/// CONFIG_ACK: backend → peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigAck {
    pub update_status: String,
    #[serde(default)]
    pub message: String,
}

/// ERROR: backend → peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub error_code: i64,
    pub error_message: String,
}

/// TERMINATE_ACK: backend → peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminateAck {
    #[serde(default)]
    pub message: String,
}

/// One variant per message type.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Opaque application data.
    Data(Bytes),
    Ack(HelloAck),
    Hello(Hello),
    ConfigUpdate(ConfigUpdate),
    ConfigAck(ConfigAck),
    /// Opaque health data push.
    HealthData(Bytes),
    HealthRequest,
    HealthResponse(HealthReport),
    Error(ErrorReport),
    Terminate,
    TerminateAck(TerminateAck),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Data(_) => MessageType::Data,
            Message::Ack(_) => MessageType::Ack,
            Message::Hello(_) => MessageType::Hello,
            Message::ConfigUpdate(_) => MessageType::ConfigUpdate,
            Message::ConfigAck(_) => MessageType::ConfigAck,
            Message::HealthData(_) => MessageType::HealthData,
            Message::HealthRequest => MessageType::HealthRequest,
            Message::HealthResponse(_) => MessageType::HealthResponse,
            Message::Error(_) => MessageType::Error,
            Message::Terminate => MessageType::Terminate,
            Message::TerminateAck(_) => MessageType::TerminateAck,
        }
    }

    /// Build an ERROR message.
    pub fn error(code: i64, message: impl Into<String>) -> Self {
        Message::Error(ErrorReport {
            error_code: code,
            error_message: message.into(),
        })
    }

    /// Serialize the payload and wrap it in an envelope.
    pub fn to_pdu(&self) -> Result<Pdu, PduError> {
        let mtype = self.message_type();
        let payload = match self {
            Message::Data(raw) | Message::HealthData(raw) => raw.clone(),
            Message::HealthRequest | Message::Terminate => Bytes::new(),
            Message::Ack(p) => to_json(mtype, p)?,
            Message::Hello(p) => to_json(mtype, p)?,
            Message::ConfigUpdate(p) => to_json(mtype, p)?,
            Message::ConfigAck(p) => to_json(mtype, p)?,
            Message::HealthResponse(p) => to_json(mtype, p)?,
            Message::Error(p) => to_json(mtype, p)?,
            Message::TerminateAck(p) => to_json(mtype, p)?,
        };
        Ok(Pdu::new(mtype, payload))
    }

    /// Interpret an envelope's payload according to its type tag.
    pub fn from_pdu(pdu: &Pdu) -> Result<Self, PduError> {
        let mtype = pdu.mtype;
        let raw = &pdu.payload;
        Ok(match mtype {
            MessageType::Data => Message::Data(raw.clone()),
            MessageType::HealthData => Message::HealthData(raw.clone()),
            MessageType::HealthRequest => Message::HealthRequest,
            MessageType::Terminate => Message::Terminate,
            MessageType::Ack => Message::Ack(from_json(mtype, raw)?),
            MessageType::Hello => Message::Hello(from_json(mtype, raw)?),
            MessageType::ConfigUpdate => Message::ConfigUpdate(from_json(mtype, raw)?),
            MessageType::ConfigAck => Message::ConfigAck(from_json(mtype, raw)?),
            MessageType::HealthResponse => Message::HealthResponse(from_json(mtype, raw)?),
            MessageType::Error => Message::Error(from_json(mtype, raw)?),
            MessageType::TerminateAck => Message::TerminateAck(from_json(mtype, raw)?),
        })
    }
}

fn to_json<T: Serialize>(mtype: MessageType, payload: &T) -> Result<Bytes, PduError> {
    serde_json::to_vec(payload)
        .map(Bytes::from)
        .map_err(|source| PduError::Encoding { mtype, source })
}

fn from_json<T: DeserializeOwned>(mtype: MessageType, raw: &[u8]) -> Result<T, PduError> {
    serde_json::from_slice(raw).map_err(|source| PduError::Decoding { mtype, source })
}
