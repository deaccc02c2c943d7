//! Pool manager.
//!
//! # Responsibilities
//! - Dial every configured address at startup
//! - Supervise one task per dial attempt / live session
//! - Run the health-check, status and reconnect cycles
//! - Fan CONFIG_UPDATE out to every healthy backend
//!
//! # Design Decisions
//! - A session task ends with an explicit `SessionExit`; the pool reacts
//!   to it instead of sessions retrying on their own
//! - Pending bookkeeping is shared state, so status snapshots see a
//!   completed handshake immediately
//! - Every task gets a child token; cancelling the pool terminates all
//!   sessions and the pool waits for them

use std::sync::Arc;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::pending::{PendingAddress, PendingSet};
use crate::config::BalancerConfig;
use crate::health::{HealthRegistry, RegistrySnapshot};
use crate::net::Dialer;
use crate::observability::metrics;
use crate::protocol::{ConfigUpdate, Message, PduError};
use crate::session::{self, HandshakeError, PeerSession, SendError, SessionEnd};

/// How one supervised attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// No connection was established.
    DialFailed(String),
    /// Connected, but HELLO / ACK did not complete.
    HandshakeFailed(String),
    /// An active session ended.
    Ended(SessionEnd),
    /// The pool shut down before the handshake completed.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionExit {
    pub addr: String,
    pub outcome: AttemptOutcome,
}

/// Pool-level view for status reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStatus {
    pub healthy: usize,
    pub configured: usize,
    pub registry: RegistrySnapshot,
    /// Sorted by address.
    pub pending: Vec<PendingAddress>,
}

/// Result of one config broadcast.
#[derive(Debug, Default)]
pub struct BroadcastReport {
    /// Identities the update was written to.
    pub delivered: Vec<String>,
    pub failed: Vec<(String, SendError)>,
}

/// Write one CONFIG_UPDATE to every healthy session.
///
/// The update is encoded once up front; an oversize update fails here
/// before any backend is touched. Writes go out to every session at once;
/// a failed or stalled write to one backend is logged and reported, and
/// does not hold up delivery to the rest.
pub async fn broadcast_config(
    registry: &HealthRegistry,
    update: &ConfigUpdate,
) -> Result<BroadcastReport, PduError> {
    let pdu = Message::ConfigUpdate(update.clone()).to_pdu()?;
    pdu.encode()?;

    let mut attempted = Vec::new();
    let failed = registry
        .for_each_healthy(|handle| {
            attempted.push(handle.identity().to_string());
            let pdu = pdu.clone();
            async move { handle.send_pdu(&pdu).await }
        })
        .await;

    for (identity, error) in &failed {
        tracing::warn!(identity = %identity, error = %error, "Failed to send CONFIG_UPDATE");
    }
    let delivered: Vec<String> = attempted
        .into_iter()
        .filter(|identity| !failed.iter().any(|(f, _)| f == identity))
        .collect();
    for identity in &delivered {
        tracing::info!(identity = %identity, "Sent CONFIG_UPDATE");
    }

    metrics::record_broadcast("delivered", delivered.len());
    metrics::record_broadcast("failed", failed.len());
    Ok(BroadcastReport { delivered, failed })
}

/// Clonable access to a running pool.
#[derive(Debug, Clone)]
pub struct PoolHandle {
    registry: HealthRegistry,
    pending: PendingSet,
    configured: usize,
    cancel: CancellationToken,
}

impl PoolHandle {
    pub fn status(&self) -> PoolStatus {
        let registry = self.registry.snapshot();
        PoolStatus {
            healthy: registry.healthy,
            configured: self.configured,
            registry,
            pending: self.pending.snapshot(),
        }
    }

    pub fn registry(&self) -> &HealthRegistry {
        &self.registry
    }

    pub fn pending(&self) -> &PendingSet {
        &self.pending
    }

    pub async fn broadcast(&self, update: &ConfigUpdate) -> Result<BroadcastReport, PduError> {
        broadcast_config(&self.registry, update).await
    }

    /// Terminate every session and stop the pool.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// Everything a supervised attempt needs, cloned into its task.
#[derive(Clone)]
struct SessionFactory {
    config: Arc<BalancerConfig>,
    dialer: Arc<dyn Dialer>,
    registry: HealthRegistry,
    pending: PendingSet,
}

impl SessionFactory {
    /// Dial, handshake, then run the session to completion.
    async fn attempt(self, addr: String, cancel: CancellationToken) -> SessionExit {
        let guard = DialGuard::new(self.pending.clone(), addr.clone());

        let established = tokio::select! {
            _ = cancel.cancelled() => Err(HandshakeError::Cancelled),
            result = session::connect(
                self.dialer.as_ref(),
                &addr,
                &self.config.session,
                &self.config.timeouts,
            ) => result,
        };

        let outcome = match established {
            Ok(established) => {
                self.pending.remove(&addr);
                tracing::info!(addr = %addr, identity = %established.identity, "Backend added to pool");
                let session = PeerSession::activate(
                    established,
                    self.registry.clone(),
                    self.config.pool.max_fail_attempts,
                    &self.config.timeouts,
                    cancel,
                );
                AttemptOutcome::Ended(session.run().await)
            }
            Err(HandshakeError::Cancelled) => AttemptOutcome::Cancelled,
            Err(e) if e.is_dial_failure() => AttemptOutcome::DialFailed(e.to_string()),
            Err(e) => AttemptOutcome::HandshakeFailed(e.to_string()),
        };

        guard.disarm();
        SessionExit { addr, outcome }
    }
}

/// Makes the address dialable again if its task dies without an exit.
struct DialGuard {
    pending: PendingSet,
    addr: String,
    armed: bool,
}

impl DialGuard {
    fn new(pending: PendingSet, addr: String) -> Self {
        Self {
            pending,
            addr,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for DialGuard {
    fn drop(&mut self) {
        if self.armed {
            self.pending.insert(&self.addr);
            self.pending.release(&self.addr);
        }
    }
}

enum Event {
    Shutdown,
    Exited(Result<SessionExit, JoinError>),
    HealthCheck,
    Status,
    Reconnect,
}

pub struct PoolManager {
    factory: SessionFactory,
    handle: PoolHandle,
    cancel: CancellationToken,
    sessions: JoinSet<SessionExit>,
}

impl PoolManager {
    /// Every configured address starts out pending.
    pub fn new(
        config: Arc<BalancerConfig>,
        dialer: Arc<dyn Dialer>,
        cancel: CancellationToken,
    ) -> Self {
        let registry = HealthRegistry::new();
        let pending = PendingSet::from_addrs(&config.pool.servers);
        let handle = PoolHandle {
            registry: registry.clone(),
            pending: pending.clone(),
            configured: config.pool.servers.len(),
            cancel: cancel.clone(),
        };

        Self {
            factory: SessionFactory {
                config,
                dialer,
                registry,
                pending,
            },
            handle,
            cancel,
            sessions: JoinSet::new(),
        }
    }

    pub fn handle(&self) -> PoolHandle {
        self.handle.clone()
    }

    pub fn status(&self) -> PoolStatus {
        self.handle.status()
    }

    pub async fn broadcast_config(
        &self,
        update: &ConfigUpdate,
    ) -> Result<BroadcastReport, PduError> {
        self.handle.broadcast(update).await
    }

    /// Run until cancelled, then wait for every session to terminate.
    pub async fn run(mut self) {
        let pool = &self.factory.config.pool;
        tracing::info!(
            servers = pool.servers.len(),
            max_fail_attempts = pool.max_fail_attempts,
            check_interval_secs = pool.check_interval_secs,
            reconnect_interval_secs = pool.reconnect_interval_secs,
            "Pool starting"
        );

        let check = pool.check_interval();
        let mut health_ticker = ticker(check);
        let mut status_ticker = ticker(check);
        let mut reconnect_ticker = ticker(pool.reconnect_interval());

        self.dial_pending();

        loop {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => Event::Shutdown,
                Some(joined) = self.sessions.join_next() => Event::Exited(joined),
                _ = health_ticker.tick() => Event::HealthCheck,
                _ = status_ticker.tick() => Event::Status,
                _ = reconnect_ticker.tick() => Event::Reconnect,
            };

            match event {
                Event::Shutdown => break,
                Event::Exited(joined) => self.on_exit(joined),
                Event::HealthCheck => self.health_cycle(),
                Event::Status => self.status_cycle(),
                Event::Reconnect => self.dial_pending(),
            }
        }

        tracing::info!(sessions = self.sessions.len(), "Pool shutting down");
        while let Some(joined) = self.sessions.join_next().await {
            self.on_exit(joined);
        }
        tracing::info!("Pool stopped");
    }

    /// Start an attempt for every pending address without one in flight.
    fn dial_pending(&mut self) {
        for addr in self.handle.pending.claim_idle() {
            tracing::debug!(addr = %addr, "Dialing backend");
            let factory = self.factory.clone();
            let cancel = self.cancel.child_token();
            self.sessions.spawn(factory.attempt(addr, cancel));
        }
    }

    fn on_exit(&mut self, joined: Result<SessionExit, JoinError>) {
        let exit = match joined {
            Ok(exit) => exit,
            Err(e) => {
                tracing::error!(error = %e, "Session task failed");
                return;
            }
        };
        let addr = exit.addr;

        match exit.outcome {
            AttemptOutcome::DialFailed(reason) | AttemptOutcome::HandshakeFailed(reason) => {
                metrics::record_dial_failure();
                let failures = self.handle.pending.record_failure(&addr).unwrap_or_default();
                tracing::warn!(addr = %addr, failures, reason = %reason, "Failed to connect to backend");
            }
            AttemptOutcome::Cancelled => self.handle.pending.release(&addr),
            AttemptOutcome::Ended(end) => {
                if self.cancel.is_cancelled() {
                    tracing::debug!(addr = %addr, end = ?end, "Session ended during shutdown");
                } else if self.handle.pending.insert(&addr) {
                    tracing::info!(addr = %addr, end = ?end, "Backend removed from pool, will reconnect");
                }
            }
        }
    }

    /// Log backends that are failing health checks. Sends no traffic.
    fn health_cycle(&self) {
        for backend in self.handle.registry.failing() {
            if backend.healthy {
                tracing::info!(
                    identity = %backend.identity,
                    addr = %backend.addr,
                    failures = backend.consecutive_failures,
                    max_failures = backend.max_failures,
                    "Backend failing health checks"
                );
            } else {
                tracing::warn!(
                    identity = %backend.identity,
                    addr = %backend.addr,
                    failures = backend.consecutive_failures,
                    "Backend unhealthy"
                );
            }
        }
    }

    fn status_cycle(&self) {
        let status = self.handle.status();
        tracing::info!(
            healthy = status.healthy,
            configured = status.configured,
            pending = status.pending.len(),
            "{} out of {} servers are healthy",
            status.healthy,
            status.configured
        );
        for entry in status.pending.iter().filter(|p| p.failures > 0) {
            tracing::info!(
                addr = %entry.addr,
                failures = entry.failures,
                "Server failed to connect {} times",
                entry.failures
            );
        }
        metrics::record_pool_status(status.healthy, status.configured, status.pending.len());
    }
}

/// First tick one period from now; missed ticks are skipped.
fn ticker(period: std::time::Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::HealthRecord;
    use crate::net::MemoryNetwork;

    fn config(servers: &[&str]) -> Arc<BalancerConfig> {
        let mut config = BalancerConfig::default();
        config.pool.servers = servers.iter().map(|s| s.to_string()).collect();
        Arc::new(config)
    }

    #[test]
    fn every_configured_address_starts_pending() {
        let pool = PoolManager::new(
            config(&["a:1", "b:2"]),
            Arc::new(MemoryNetwork::new()),
            CancellationToken::new(),
        );
        let status = pool.status();
        assert_eq!(status.configured, 2);
        assert_eq!(status.healthy, 0);
        assert_eq!(status.pending.len(), 2);
    }

    #[tokio::test]
    async fn broadcast_with_no_live_sessions_delivers_nothing() {
        let registry = HealthRegistry::new();
        registry.upsert(HealthRecord::new("gone", "a:1", 3, None));
        let report = broadcast_config(
            &registry,
            &ConfigUpdate {
                new_metrics: vec!["cpu_usage_percent".into()],
                new_check_interval: 3,
            },
        )
        .await
        .unwrap();
        assert!(report.delivered.is_empty());
        assert!(report.failed.is_empty());
    }

    #[tokio::test]
    async fn oversize_broadcast_is_rejected() {
        let update = ConfigUpdate {
            new_metrics: vec!["m".repeat(2000)],
            new_check_interval: 1,
        };
        assert!(matches!(
            broadcast_config(&HealthRegistry::new(), &update).await,
            Err(PduError::Oversize { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_addresses_accumulate_failures() {
        let cancel = CancellationToken::new();
        let mut config = BalancerConfig::default();
        config.pool.servers = vec!["nowhere:1".into()];
        config.pool.reconnect_interval_secs = 2;
        let pool = PoolManager::new(
            Arc::new(config),
            Arc::new(MemoryNetwork::new()),
            cancel.clone(),
        );
        let handle = pool.handle();
        let task = tokio::spawn(pool.run());

        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        let entry = handle.pending().get("nowhere:1").unwrap();
        assert!(entry.failures >= 2, "failures = {}", entry.failures);

        handle.shutdown();
        task.await.unwrap();
    }
}
