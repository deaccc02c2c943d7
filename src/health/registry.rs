//! Health registry.
//!
//! # Responsibilities
//! - Map backend identity → `HealthRecord`
//! - Apply health transitions reported by peer sessions
//! - Provide consistent snapshots for status reporting
//! - Hand out healthy session handles for config broadcast
//!
//! # Design Decisions
//! - One mutex guards the whole map; every read-modify-write of a record
//!   happens under it, so the counter and the derived health never disagree
//! - The lock is never held across an await point: async work on sessions
//!   runs on cloned handles after the lock is released
//! - `for_each_healthy` fans out to every handle concurrently

use futures_util::future::join_all;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use super::record::{BackendStatus, HealthRecord};
use crate::session::SessionHandle;

/// Consistent view of the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrySnapshot {
    pub healthy: usize,
    pub total: usize,
    /// Sorted by identity.
    pub backends: Vec<BackendStatus>,
}

#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    records: Arc<Mutex<HashMap<String, HealthRecord>>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record.
    ///
    /// Records previously registered for the same address under another
    /// identity are superseded and dropped. Returns their identities.
    pub fn upsert(&self, record: HealthRecord) -> Vec<String> {
        let mut records = self.records.lock();
        let superseded: Vec<String> = records
            .values()
            .filter(|r| r.addr == record.addr && r.identity != record.identity)
            .map(|r| r.identity.clone())
            .collect();
        for identity in &superseded {
            records.remove(identity);
        }
        records.insert(record.identity.clone(), record);
        superseded
    }

    /// Reset the failure counter. No-op if `identity` is absent.
    ///
    /// Returns true when the backend was unhealthy before this call.
    pub fn mark_healthy(&self, identity: &str) -> bool {
        let mut records = self.records.lock();
        match records.get_mut(identity) {
            Some(record) => {
                let recovered = !record.is_healthy();
                record.consecutive_failures = 0;
                recovered
            }
            None => false,
        }
    }

    /// Count one failure.
    ///
    /// Returns true iff this call crossed the threshold. Failures counted on
    /// an already unhealthy record never return true again.
    pub fn mark_unhealthy(&self, identity: &str) -> bool {
        let mut records = self.records.lock();
        let Some(record) = records.get_mut(identity) else {
            return false;
        };
        let was_healthy = record.is_healthy();
        record.consecutive_failures = record.consecutive_failures.saturating_add(1);
        let crossed = was_healthy && !record.is_healthy();
        if crossed {
            tracing::warn!(
                identity = %identity,
                addr = %record.addr,
                failures = record.consecutive_failures,
                "Backend is down"
            );
        }
        crossed
    }

    /// Drop the session handle of a torn-down session, keeping the record.
    pub fn detach(&self, identity: &str) -> Option<SessionHandle> {
        self.records
            .lock()
            .get_mut(identity)
            .and_then(|record| record.session.take())
    }

    pub fn remove(&self, identity: &str) -> Option<HealthRecord> {
        self.records.lock().remove(identity)
    }

    pub fn get(&self, identity: &str) -> Option<BackendStatus> {
        self.records.lock().get(identity).map(HealthRecord::status)
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        let records = self.records.lock();
        let mut backends: Vec<BackendStatus> = records.values().map(HealthRecord::status).collect();
        drop(records);

        backends.sort_by(|a, b| a.identity.cmp(&b.identity));
        RegistrySnapshot {
            healthy: backends.iter().filter(|b| b.healthy).count(),
            total: backends.len(),
            backends,
        }
    }

    /// Records with at least one failure since their last success.
    pub fn failing(&self) -> Vec<BackendStatus> {
        self.records
            .lock()
            .values()
            .filter(|r| r.consecutive_failures > 0)
            .map(HealthRecord::status)
            .collect()
    }

    /// Handles of every healthy backend with a live session.
    pub fn healthy_sessions(&self) -> Vec<SessionHandle> {
        self.records
            .lock()
            .values()
            .filter(|r| r.is_healthy())
            .filter_map(|r| r.session.clone())
            .collect()
    }

    /// Run `f` on every healthy session, all at once.
    ///
    /// Handles are collected first and the lock released, so `f` may await.
    /// The calls run concurrently: a stalled backend delays only its own
    /// call. Failures are returned with the identity they belong to.
    pub async fn for_each_healthy<F, Fut, E>(&self, mut f: F) -> Vec<(String, E)>
    where
        F: FnMut(SessionHandle) -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        let calls: Vec<_> = self
            .healthy_sessions()
            .into_iter()
            .map(|handle| {
                let identity = handle.identity().to_string();
                let call = f(handle);
                async move { (identity, call.await) }
            })
            .collect();

        join_all(calls)
            .await
            .into_iter()
            .filter_map(|(identity, result)| result.err().map(|e| (identity, e)))
            .collect()
    }
}
