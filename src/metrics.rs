//! Metrics instrumentation for pvedns.
//!
//! All metrics are prefixed with `pvedns.`

use metrics::{counter, gauge, histogram};
use std::time::Instant;

/// Record a completed DNS query.
pub fn record_query(qtype: &str, outcome: QueryOutcome, duration: std::time::Duration) {
    let outcome_str = match outcome {
        QueryOutcome::Blocked => "blocked",
        QueryOutcome::Cached => "cached",
        QueryOutcome::Refused => "refused",
    };

    counter!("pvedns.query.count", "type" => qtype.to_string(), "outcome" => outcome_str)
        .increment(1);
    histogram!("pvedns.query.duration.seconds", "type" => qtype.to_string())
        .record(duration.as_secs_f64());
}

/// How a query left the chain.
#[derive(Debug, Clone, Copy)]
pub enum QueryOutcome {
    /// The block store intercepted it.
    Blocked,
    /// The guest cache answered it.
    Cached,
    /// No handler intercepted; the front end refused.
    Refused,
}

/// Record a failed block list persistence attempt.
pub fn record_persist_failure() {
    counter!("pvedns.blocklist.persist.failure.count").increment(1);
}

/// Record a guest cache entry overwrite.
pub fn record_cache_update() {
    counter!("pvedns.cache.update.count").increment(1);
}

/// Record a failed per-guest interface fetch.
pub fn record_machine_fetch_failure() {
    counter!("pvedns.refresher.machine_fetch.failure.count").increment(1);
}

/// Record the one-way transition into degraded mode.
pub fn record_degraded() {
    gauge!("pvedns.cache.degraded").set(1.0);
}

/// Record a completed refresh pass over the inventory.
pub fn record_refresh_pass(machines: usize, duration: std::time::Duration) {
    counter!("pvedns.refresher.pass.count").increment(1);
    histogram!("pvedns.refresher.pass.duration.seconds").record(duration.as_secs_f64());
    gauge!("pvedns.refresher.pass.machines").set(machines as f64);
}

/// Record current table sizes (call periodically or on change).
pub fn record_table_sizes(blocked: usize, cached: usize) {
    gauge!("pvedns.blocklist.size").set(blocked as f64);
    gauge!("pvedns.cache.size").set(cached as f64);
}

/// Helper for timing operations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration since timer start.
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}
