//! Wire protocol subsystem.
//!
//! # Data Flow
//! ```text
//! Outbound:
//!     Message (typed payload)
//!     → message.rs (serialize payload document)
//!     → pdu.rs (envelope: type + length + payload)
//!     → stream
//!
//! Inbound:
//!     stream
//!     → pdu.rs (read header, bound length, read payload)
//!     → message.rs (interpret payload by type tag)
//! ```
//!
//! # Design Decisions
//! - Envelope decoding never looks at the payload
//! - Frames are bounded at 1024 bytes in both directions
//! - Payloads are JSON documents, one schema per message type

pub mod message;
pub mod pdu;

pub use message::{
    ConfigAck, ConfigUpdate, ErrorReport, HealthReport, Hello, HelloAck, Message, TerminateAck,
};
pub use pdu::{MessageType, Pdu, PduError, PduReader, PduWriter, MAX_PDU_SIZE};
