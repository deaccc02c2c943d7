//! Per-backend health record.
//!
//! # States
//! - Healthy: `consecutive_failures < max_failures`
//! - Unhealthy: `consecutive_failures >= max_failures`
//!
//! # State Transitions
//! ```text
//! Healthy → Unhealthy: consecutive failures reach max_failures
//! any → Healthy: a HEALTH_RESPONSE resets the counter to 0
//! ```
//!
//! Health is derived from the counter, never stored next to it, so the two
//! cannot disagree.

use crate::session::SessionHandle;

#[derive(Debug, Clone)]
pub struct HealthRecord {
    /// Backend-assigned identity; the registry key.
    pub identity: String,
    /// Address the session was dialed to.
    pub addr: String,
    pub consecutive_failures: u32,
    pub max_failures: u32,
    /// Live session, `None` once the session has been torn down.
    pub session: Option<SessionHandle>,
}

impl HealthRecord {
    /// A fresh, healthy record for a session that just completed its handshake.
    pub fn new(
        identity: impl Into<String>,
        addr: impl Into<String>,
        max_failures: u32,
        session: Option<SessionHandle>,
    ) -> Self {
        Self {
            identity: identity.into(),
            addr: addr.into(),
            consecutive_failures: 0,
            max_failures: max_failures.max(1),
            session,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.consecutive_failures < self.max_failures
    }

    pub fn status(&self) -> BackendStatus {
        BackendStatus {
            identity: self.identity.clone(),
            addr: self.addr.clone(),
            healthy: self.is_healthy(),
            consecutive_failures: self.consecutive_failures,
            max_failures: self.max_failures,
            connected: self.session.is_some(),
        }
    }
}

/// Point-in-time copy of a record, safe to log or return across threads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendStatus {
    pub identity: String,
    pub addr: String,
    pub healthy: bool,
    pub consecutive_failures: u32,
    pub max_failures: u32,
    pub connected: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_record_is_healthy() {
        let record = HealthRecord::new("a", "127.0.0.1:1", 3, None);
        assert!(record.is_healthy());
        assert_eq!(record.consecutive_failures, 0);
    }

    #[test]
    fn zero_threshold_is_clamped() {
        let record = HealthRecord::new("a", "127.0.0.1:1", 0, None);
        assert_eq!(record.max_failures, 1);
        assert!(record.is_healthy());
    }

    #[test]
    fn health_follows_counter() {
        let mut record = HealthRecord::new("a", "127.0.0.1:1", 2, None);
        record.consecutive_failures = 1;
        assert!(record.is_healthy());
        record.consecutive_failures = 2;
        assert!(!record.is_healthy());
        assert!(!record.status().healthy);
        assert!(!record.status().connected);
    }
}
