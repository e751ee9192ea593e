//! In-memory guest name cache fed by the background refresher.
//!
//! The request path only ever reads this table; the refresher is its sole
//! writer. Entries are overwritten when a different address is observed and
//! never removed, so a stale entry persists until the next differing
//! observation. A one-way degraded flag gates all lookups once the upstream
//! inventory becomes unreachable.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error};

use crate::metrics;
use crate::name::canonicalize;

/// Thread-safe guest name → IPv4 address cache.
///
/// Cheap to clone; clones share the same table and degraded flag.
#[derive(Debug, Clone, Default)]
pub struct VmCache {
    entries: Arc<RwLock<HashMap<String, Ipv4Addr>>>,
    degraded: Arc<AtomicBool>,
}

impl VmCache {
    /// Create a new empty cache in the healthy state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the cached address for a name.
    ///
    /// In degraded mode every lookup reports a miss without touching the
    /// table; restart (or a fresh cache) is the only recovery path.
    pub fn get(&self, name: &str) -> Option<Ipv4Addr> {
        if self.is_degraded() {
            error!("guest cache degraded, refusing lookup");
            return None;
        }

        let key = canonicalize(name);
        self.entries.read().get(&key).copied()
    }

    /// Overwrite the entry for a name when the observed address differs.
    ///
    /// Returns true when the table changed. The differs-check and the
    /// assignment run under one exclusive lock; concurrent fan-out tasks for
    /// the same guest stay last-write-wins.
    pub fn update(&self, name: &str, addr: Ipv4Addr) -> bool {
        let key = canonicalize(name);
        let mut entries = self.entries.write();

        if entries.get(&key) == Some(&addr) {
            return false;
        }

        entries.insert(key, addr);
        true
    }

    /// Flip the degraded flag. One-way for the process lifetime.
    pub fn mark_degraded(&self) {
        if !self.degraded.swap(true, Ordering::Relaxed) {
            error!("guest cache entering degraded mode, lookups disabled");
            metrics::record_degraded();
        }
    }

    /// Whether the cache has entered degraded mode.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Emit current table size metrics alongside the block list's.
    pub fn emit_metrics(&self, blocked: usize) {
        metrics::record_table_sizes(blocked, self.len());
        debug!(cached = self.len(), blocked, "emitted table size metrics");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_then_get() {
        let cache = VmCache::new();
        assert!(cache.update("vm1", "10.0.0.5".parse().unwrap()));
        assert_eq!(cache.get("vm1."), "10.0.0.5".parse::<Ipv4Addr>().ok());
        assert_eq!(cache.get("VM1"), "10.0.0.5".parse::<Ipv4Addr>().ok());
    }

    #[test]
    fn test_update_same_address_reports_no_change() {
        let cache = VmCache::new();
        let addr: Ipv4Addr = "10.0.0.5".parse().unwrap();
        assert!(cache.update("vm1", addr));
        assert!(!cache.update("vm1", addr));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_update_differing_address_overwrites() {
        let cache = VmCache::new();
        assert!(cache.update("vm2", "10.0.0.7".parse().unwrap()));
        assert!(cache.update("vm2", "10.0.0.9".parse().unwrap()));
        assert_eq!(cache.get("vm2"), "10.0.0.9".parse::<Ipv4Addr>().ok());
    }

    #[test]
    fn test_degraded_gate_hides_entries() {
        let cache = VmCache::new();
        cache.update("vm1.local", "10.0.0.5".parse().unwrap());

        cache.mark_degraded();
        assert!(cache.is_degraded());
        assert_eq!(cache.get("vm1.local."), None);
        // The table itself is untouched.
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_clones_share_state() {
        let cache = VmCache::new();
        let handle = cache.clone();
        handle.update("vm1", "10.0.0.5".parse().unwrap());
        assert!(cache.get("vm1").is_some());

        handle.mark_degraded();
        assert!(cache.is_degraded());
    }
}
