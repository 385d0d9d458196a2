//! Metrics instrumentation for watchdns.
//!
//! All metrics are prefixed with `watchdns.`

use metrics::{counter, gauge, histogram};
use std::time::Instant;

/// Record a DNS query.
pub fn record_query(record_type: &str, result: QueryResult, duration: std::time::Duration) {
    let result_str = match result {
        QueryResult::Success => "success",
        QueryResult::Empty => "empty",
        QueryResult::Invalid => "invalid",
    };

    counter!("watchdns.query.count", "type" => record_type.to_string(), "result" => result_str)
        .increment(1);
    histogram!("watchdns.query.duration.seconds", "type" => record_type.to_string())
        .record(duration.as_secs_f64());
}

/// Query result type for metrics.
#[derive(Debug, Clone, Copy)]
pub enum QueryResult {
    /// Query returned at least one answer.
    Success,
    /// Name unknown or no eligible entries.
    Empty,
    /// Question name was malformed (SRV label shape).
    Invalid,
}

/// Record the outcome of a fleet poll.
pub fn record_fleet_reload(success: bool) {
    let result = if success { "success" } else { "error" };
    counter!("watchdns.fleet.reload.count", "result" => result).increment(1);
}

/// Record entry and lookup-key counts after a reload.
pub fn record_state_counts(entries: usize, lookup_keys: usize) {
    gauge!("watchdns.state.entries.count").set(entries as f64);
    gauge!("watchdns.state.lookup_keys.count").set(lookup_keys as f64);
}

/// Record a probe outcome.
pub fn record_probe(kind: &str, ok: bool) {
    let result = if ok { "success" } else { "failure" };
    counter!("watchdns.probe.count", "kind" => kind.to_string(), "result" => result).increment(1);
}

/// Record an entry transitioning from online to offline.
pub fn record_offline_transition() {
    counter!("watchdns.health.offline_transition.count").increment(1);
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
