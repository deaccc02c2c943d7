//! Backend accept loop.
//!
//! # Responsibilities
//! - Accept TCP connections, optionally behind TLS
//! - Serve each connection with the shared `Responder`
//! - Stop accepting and drop live connections on cancellation

use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

use super::responder::Responder;
use crate::net::{ConnectionId, MemoryListener};

pub struct BackendServer {
    responder: Arc<Responder>,
    tls: Option<TlsAcceptor>,
}

impl BackendServer {
    pub fn new(responder: Arc<Responder>, tls: Option<TlsAcceptor>) -> Self {
        Self { responder, tls }
    }

    pub fn responder(&self) -> &Arc<Responder> {
        &self.responder
    }

    /// Accept until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, tls = self.tls.is_some(), "Backend server starting");

        loop {
            let (tcp, peer) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                        continue;
                    }
                },
            };
            if let Err(e) = tcp.set_nodelay(true) {
                tracing::debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
            }

            let conn = ConnectionId::new();
            let responder = self.responder.clone();
            let tls = self.tls.clone();
            let cancel = shutdown.child_token();
            tracing::info!(conn = %conn, peer = %peer, "Accepted connection");

            tokio::spawn(async move {
                let served = async {
                    match tls {
                        Some(acceptor) => match acceptor.accept(tcp).await {
                            Ok(stream) => responder.serve(stream).await,
                            Err(e) => {
                                tracing::warn!(conn = %conn, error = %e, "TLS handshake failed");
                                Ok(())
                            }
                        },
                        None => responder.serve(tcp).await,
                    }
                };
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    result = served => {
                        if let Err(e) = result {
                            tracing::warn!(conn = %conn, error = %e, "Connection ended with error");
                        }
                    }
                }
                tracing::info!(conn = %conn, "Connection closed");
            });
        }

        tracing::info!("Backend server stopped");
        Ok(())
    }

    /// Accept in-memory pipes until `shutdown` fires or the listener is dropped.
    pub async fn run_memory(self, mut listener: MemoryListener, shutdown: CancellationToken) {
        loop {
            let stream = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Some(stream) => stream,
                    None => break,
                },
            };
            let responder = self.responder.clone();
            let cancel = shutdown.child_token();
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = responder.serve(stream) => {}
                }
            });
        }
    }
}
