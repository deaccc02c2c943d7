//! In-process transport.
//!
//! Connections are tokio duplex pipes handed from a `MemoryNetwork` dial to
//! the `MemoryListener` registered at that address. Used to drive whole pools
//! against in-process backends without sockets.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use tokio::io::DuplexStream;
use tokio::sync::mpsc;

use super::transport::{Connection, Dialer, SingleStreamConnection, TransportError};
use crate::protocol::MAX_PDU_SIZE;

/// Pipe capacity per direction.
const PIPE_CAPACITY: usize = 8 * MAX_PDU_SIZE;

/// A set of in-process listeners addressable by name.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    listeners: Arc<Mutex<HashMap<String, mpsc::UnboundedSender<DuplexStream>>>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener at `addr`, replacing any previous one.
    pub fn listen(&self, addr: &str) -> MemoryListener {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.lock().insert(addr.to_string(), tx);
        MemoryListener {
            addr: addr.to_string(),
            incoming: rx,
        }
    }

    /// Stop accepting connections at `addr`. Established pipes stay open.
    pub fn unlisten(&self, addr: &str) {
        self.listeners.lock().remove(addr);
    }
}

#[async_trait]
impl Dialer for MemoryNetwork {
    async fn dial(&self, addr: &str) -> Result<Box<dyn Connection>, TransportError> {
        let refused = || TransportError::Dial {
            addr: addr.to_string(),
            source: io::Error::new(io::ErrorKind::ConnectionRefused, "no listener"),
        };

        let acceptor = self.listeners.lock().get(addr).cloned().ok_or_else(refused)?;
        let (client, server) = tokio::io::duplex(PIPE_CAPACITY);
        acceptor.send(server).map_err(|_| refused())?;

        Ok(Box::new(SingleStreamConnection::new(addr, Box::new(client))))
    }
}

/// Accepting end registered with a `MemoryNetwork`.
pub struct MemoryListener {
    addr: String,
    incoming: mpsc::UnboundedReceiver<DuplexStream>,
}

impl MemoryListener {
    /// Next dialed pipe, or `None` once the network dropped this listener.
    pub async fn accept(&mut self) -> Option<DuplexStream> {
        self.incoming.recv().await
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}
