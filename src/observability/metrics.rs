//! Metrics collection.
//!
//! # Metrics
//! - `binder_cache_events_total` (counter): applied notifications by kind
//! - `binder_cache_entries` (gauge): usable entries per base path
//! - `binder_lookups_total` (counter): reads by outcome (hit, default, zero)
//! - `binder_store_writes_total` (counter): writes by result

use crate::store::EventKind;

pub fn record_cache_event(kind: EventKind) {
    metrics::counter!("binder_cache_events_total", "kind" => kind.to_string()).increment(1);
}

pub fn record_cache_size(base_path: &str, entries: usize) {
    metrics::gauge!("binder_cache_entries", "base" => base_path.to_string()).set(entries as f64);
}

pub fn record_lookup(outcome: &'static str) {
    metrics::counter!("binder_lookups_total", "outcome" => outcome).increment(1);
}

pub fn record_store_write(success: bool) {
    let result = if success { "ok" } else { "error" };
    metrics::counter!("binder_store_writes_total", "result" => result).increment(1);
}
