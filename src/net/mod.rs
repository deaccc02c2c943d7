//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Backend address
//!     → transport.rs (Dialer: TCP connect)
//!     → tls.rs (optional TLS handshake)
//!     → connection.rs (connection id for log correlation)
//!     → Connection::open_stream → hand off to a peer session
//!
//! Tests and embedding:
//!     memory.rs (duplex pipes standing in for sockets)
//! ```
//!
//! # Design Decisions
//! - Sessions see only `Dialer` / `Connection`; the transport is pluggable
//! - TLS is optional and handled transparently

pub mod connection;
pub mod memory;
pub mod tls;
pub mod transport;

pub use connection::ConnectionId;
pub use memory::{MemoryListener, MemoryNetwork};
pub use transport::{BoxedStream, Connection, Dialer, TcpDialer, TransportError};
