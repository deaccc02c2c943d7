//! Addresses without a live session.
//!
//! # Design Decisions
//! - An entry is created for every configured address at startup and again
//!   whenever a session for that address ends
//! - It is removed only once a handshake completes, not on transport connect
//! - `dialing` marks an attempt in flight so one address never has two

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAddress {
    pub addr: String,
    /// Consecutive failed dial/handshake attempts.
    pub failures: u32,
    pub dialing: bool,
}

#[derive(Debug, Clone, Default)]
pub struct PendingSet {
    entries: Arc<Mutex<BTreeMap<String, PendingAddress>>>,
}

impl PendingSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_addrs<I, S>(addrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let set = Self::new();
        for addr in addrs {
            set.insert(addr.as_ref());
        }
        set
    }

    /// Returns false if `addr` was already pending.
    pub fn insert(&self, addr: &str) -> bool {
        let mut entries = self.entries.lock();
        if entries.contains_key(addr) {
            return false;
        }
        entries.insert(
            addr.to_string(),
            PendingAddress {
                addr: addr.to_string(),
                failures: 0,
                dialing: false,
            },
        );
        true
    }

    /// Handshake completed. Returns false if `addr` was not pending.
    pub fn remove(&self, addr: &str) -> bool {
        self.entries.lock().remove(addr).is_some()
    }

    /// Mark every idle entry as dialing and return their addresses.
    pub fn claim_idle(&self) -> Vec<String> {
        self.entries
            .lock()
            .values_mut()
            .filter(|entry| !entry.dialing)
            .map(|entry| {
                entry.dialing = true;
                entry.addr.clone()
            })
            .collect()
    }

    /// Count a failed attempt and make the entry idle again.
    ///
    /// Returns the new failure count, or `None` if `addr` is not pending.
    pub fn record_failure(&self, addr: &str) -> Option<u32> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(addr)?;
        entry.failures = entry.failures.saturating_add(1);
        entry.dialing = false;
        Some(entry.failures)
    }

    /// Make the entry idle again without counting a failure.
    pub fn release(&self, addr: &str) {
        if let Some(entry) = self.entries.lock().get_mut(addr) {
            entry.dialing = false;
        }
    }

    pub fn contains(&self, addr: &str) -> bool {
        self.entries.lock().contains_key(addr)
    }

    pub fn get(&self, addr: &str) -> Option<PendingAddress> {
        self.entries.lock().get(addr).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Sorted by address.
    pub fn snapshot(&self) -> Vec<PendingAddress> {
        self.entries.lock().values().cloned().collect()
    }
}
