//! Steady-state peer session.
//!
//! # Responsibilities
//! - Issue HEALTH_REQUEST on the negotiated interval
//! - Classify each reply and report it to the health registry
//! - Tear the stream down once the backend crosses its failure threshold
//! - Say goodbye (TERMINATE / TERMINATE_ACK) when cancelled

use std::time::Duration;
use tokio::io::ReadHalf;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::{Established, SessionHandle, SessionState};
use crate::config::TimeoutConfig;
use crate::health::{HealthRecord, HealthRegistry};
use crate::net::{BoxedStream, Connection};
use crate::observability::metrics;
use crate::protocol::{HealthReport, Message, MessageType, PduReader};
use crate::resilience::with_timeout;

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Failure threshold crossed; stream closed.
    Unhealthy,
    /// TERMINATE acknowledged by the backend.
    Terminated,
    /// Cancelled, but the backend never acknowledged TERMINATE.
    Closed,
}

/// Result of one health-check exchange.
#[derive(Debug)]
pub(crate) enum CheckOutcome {
    Healthy(HealthReport),
    /// ERROR reply, or a transport failure on write or read.
    Failed(String),
    /// Garbled or unexpected frame. Logged, not counted.
    Ignored(String),
}

pub struct PeerSession {
    identity: String,
    addr: String,
    state: SessionState,
    reader: PduReader<ReadHalf<BoxedStream>>,
    handle: SessionHandle,
    registry: HealthRegistry,
    check_interval: Duration,
    io_timeout: Duration,
    terminate_timeout: Duration,
    cancel: CancellationToken,
    _connection: Box<dyn Connection>,
}

impl PeerSession {
    /// Turn a completed handshake into an active session and register it.
    pub fn activate(
        established: Established,
        registry: HealthRegistry,
        max_failures: u32,
        timeouts: &TimeoutConfig,
        cancel: CancellationToken,
    ) -> Self {
        let Established {
            identity,
            addr,
            check_interval,
            connection,
            reader,
            writer,
            ..
        } = established;

        let handle = SessionHandle::new(
            &identity,
            &addr,
            connection.id(),
            writer,
            timeouts.io(),
            cancel.clone(),
        );

        let superseded = registry.upsert(HealthRecord::new(
            identity.clone(),
            addr.clone(),
            max_failures,
            Some(handle.clone()),
        ));
        for old in superseded {
            tracing::info!(addr = %addr, identity = %old, "Superseded backend record dropped");
        }
        metrics::record_backend_health(&identity, true);

        Self {
            identity,
            addr,
            state: SessionState::Active { healthy: true },
            reader,
            handle,
            registry,
            check_interval,
            io_timeout: timeouts.io(),
            terminate_timeout: timeouts.terminate(),
            cancel,
            _connection: connection,
        }
    }

    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run health checks until the backend goes down or the session is cancelled.
    pub async fn run(mut self) -> SessionEnd {
        let cancel = self.cancel.clone();
        let mut ticker = interval_at(Instant::now() + self.check_interval, self.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            identity = %self.identity,
            addr = %self.addr,
            interval_secs = self.check_interval.as_secs(),
            "Health checks started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.terminate().await,
                _ = ticker.tick() => {}
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                outcome = self.check_once() => Some(outcome),
            };
            let Some(outcome) = outcome else {
                return self.terminate().await;
            };

            match outcome {
                CheckOutcome::Healthy(report) => {
                    metrics::record_health_check("healthy");
                    if self.registry.mark_healthy(&self.identity) {
                        tracing::info!(identity = %self.identity, "Backend recovered");
                    }
                    self.transition(SessionState::Active { healthy: true });
                    let metric = |name: &str| report.metrics.get(name).copied().unwrap_or_default();
                    tracing::debug!(
                        identity = %self.identity,
                        timestamp = %report.timestamp,
                        cpu_usage_percent = metric("cpu_usage_percent"),
                        memory_usage_percent = metric("memory_usage_percent"),
                        metrics = ?report.metrics,
                        "Health data received"
                    );
                }
                CheckOutcome::Failed(reason) => {
                    metrics::record_health_check("failed");
                    tracing::warn!(identity = %self.identity, reason = %reason, "Health check failed");
                    let crossed = self.registry.mark_unhealthy(&self.identity);
                    self.transition(SessionState::Active { healthy: false });
                    if crossed {
                        return self.retire().await;
                    }
                }
                CheckOutcome::Ignored(reason) => {
                    metrics::record_health_check("ignored");
                    tracing::warn!(identity = %self.identity, reason = %reason, "Ignoring inbound frame");
                }
            }
        }
    }

    /// One HEALTH_REQUEST / reply exchange.
    pub(crate) async fn check_once(&mut self) -> CheckOutcome {
        if let Err(e) = self.handle.send(&Message::HealthRequest).await {
            return CheckOutcome::Failed(e.to_string());
        }
        tracing::debug!(identity = %self.identity, "Sent health check request");

        // A deadline leaves any partial frame buffered in the reader.
        loop {
            let pdu = match with_timeout("read", self.io_timeout, self.reader.read_pdu()).await {
                Err(timeout) => return CheckOutcome::Failed(timeout.to_string()),
                Ok(Err(e)) if e.is_transport() => return CheckOutcome::Failed(e.to_string()),
                Ok(Err(e)) => return CheckOutcome::Ignored(e.to_string()),
                Ok(Ok(pdu)) => pdu,
            };

            match Message::from_pdu(&pdu) {
                Err(e) => return CheckOutcome::Ignored(e.to_string()),
                Ok(Message::HealthResponse(report)) => return CheckOutcome::Healthy(report),
                Ok(Message::Error(err)) => {
                    return CheckOutcome::Failed(format!(
                        "backend error {}: {}",
                        err.error_code, err.error_message
                    ))
                }
                Ok(Message::ConfigAck(ack)) => {
                    // Reply to a broadcast; the health reply is still coming.
                    tracing::info!(
                        identity = %self.identity,
                        status = %ack.update_status,
                        message = %ack.message,
                        "Configuration update acknowledged"
                    );
                }
                Ok(other) => {
                    return CheckOutcome::Ignored(format!(
                        "unexpected {} during health check",
                        other.message_type()
                    ))
                }
            }
        }
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            tracing::info!(
                identity = %self.identity,
                from = %self.state,
                to = %next,
                "Session state changed"
            );
            self.state = next;
        }
    }

    /// Threshold crossed: detach from the registry and close the stream.
    async fn retire(mut self) -> SessionEnd {
        self.registry.detach(&self.identity);
        metrics::record_backend_health(&self.identity, false);
        self.handle.shutdown_stream().await;
        self.transition(SessionState::Terminated);
        SessionEnd::Unhealthy
    }

    /// Cancelled: drop the record, send TERMINATE and wait a bounded time for the ack.
    async fn terminate(mut self) -> SessionEnd {
        self.registry.remove(&self.identity);

        let acknowledged = match self.handle.send(&Message::Terminate).await {
            Ok(()) => {
                let reader = &mut self.reader;
                let wait_ack = async move {
                    loop {
                        match reader.read_pdu().await {
                            Ok(pdu) if pdu.mtype == MessageType::TerminateAck => return true,
                            Ok(_) => continue,
                            Err(e) if e.is_transport() => return false,
                            Err(_) => continue,
                        }
                    }
                };
                with_timeout("TERMINATE_ACK", self.terminate_timeout, wait_ack)
                    .await
                    .unwrap_or(false)
            }
            Err(e) => {
                tracing::debug!(identity = %self.identity, error = %e, "Failed to send TERMINATE");
                false
            }
        };

        self.handle.shutdown_stream().await;
        self.transition(SessionState::Terminated);
        if acknowledged {
            tracing::info!(identity = %self.identity, "Session terminated");
            SessionEnd::Terminated
        } else {
            tracing::info!(identity = %self.identity, "Session closed without TERMINATE_ACK");
            SessionEnd::Closed
        }
    }
}
