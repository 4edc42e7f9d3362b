//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics on the request path to avoid mutex contention. Only the
//! periodic `report()` touches the report timestamp lock.
//!
//! NOTE: All atomics use Relaxed ordering; these are statistical counters
//! only and must not drive logic decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Lock-free metrics collector
pub struct Metrics {
    /// Ingest requests that reached the store (monotonic)
    ingest_batches_total: AtomicU64,
    /// Raw advertisements received (monotonic)
    records_received_total: AtomicU64,
    /// Sighting events appended (monotonic)
    records_inserted_total: AtomicU64,
    /// Advertisements dropped by validation (monotonic)
    records_dropped_total: AtomicU64,
    /// Inserted since last report (reset on report)
    inserted_since_report: AtomicU64,
    /// Current-state queries, listing and single tag (monotonic)
    stats_queries_total: AtomicU64,
    /// History queries (monotonic)
    history_queries_total: AtomicU64,
    /// Tag queries answered with not-found (monotonic)
    not_found_total: AtomicU64,
    /// Store operations that failed (monotonic)
    store_failures_total: AtomicU64,
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            ingest_batches_total: AtomicU64::new(0),
            records_received_total: AtomicU64::new(0),
            records_inserted_total: AtomicU64::new(0),
            records_dropped_total: AtomicU64::new(0),
            inserted_since_report: AtomicU64::new(0),
            stats_queries_total: AtomicU64::new(0),
            history_queries_total: AtomicU64::new(0),
            not_found_total: AtomicU64::new(0),
            store_failures_total: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Record a validated batch before it reaches the store
    #[inline]
    pub fn record_received(&self, received: u64, valid: u64) {
        self.records_received_total.fetch_add(received, Ordering::Relaxed);
        self.records_dropped_total.fetch_add(received.saturating_sub(valid), Ordering::Relaxed);
    }

    /// Record a committed ingest batch
    #[inline]
    pub fn record_ingest(&self, inserted: u64) {
        self.ingest_batches_total.fetch_add(1, Ordering::Relaxed);
        self.records_inserted_total.fetch_add(inserted, Ordering::Relaxed);
        self.inserted_since_report.fetch_add(inserted, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_stats_query(&self) {
        self.stats_queries_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_history_query(&self) {
        self.history_queries_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_not_found(&self) {
        self.not_found_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_store_failure(&self) {
        self.store_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Read all counters without resetting anything
    pub fn snapshot(&self) -> MetricsSummary {
        MetricsSummary {
            ingest_batches_total: self.ingest_batches_total.load(Ordering::Relaxed),
            records_received_total: self.records_received_total.load(Ordering::Relaxed),
            records_inserted_total: self.records_inserted_total.load(Ordering::Relaxed),
            records_dropped_total: self.records_dropped_total.load(Ordering::Relaxed),
            stats_queries_total: self.stats_queries_total.load(Ordering::Relaxed),
            history_queries_total: self.history_queries_total.load(Ordering::Relaxed),
            not_found_total: self.not_found_total.load(Ordering::Relaxed),
            store_failures_total: self.store_failures_total.load(Ordering::Relaxed),
            inserts_per_sec: 0.0,
        }
    }

    /// Snapshot plus insert rate since the previous report
    pub fn report(&self) -> MetricsSummary {
        let inserted = self.inserted_since_report.swap(0, Ordering::Relaxed);
        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let inserts_per_sec = if elapsed.as_secs_f64() > 0.0 {
            inserted as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        MetricsSummary { inserts_per_sec, ..self.snapshot() }
    }
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    pub ingest_batches_total: u64,
    pub records_received_total: u64,
    pub records_inserted_total: u64,
    pub records_dropped_total: u64,
    pub stats_queries_total: u64,
    pub history_queries_total: u64,
    pub not_found_total: u64,
    pub store_failures_total: u64,
    pub inserts_per_sec: f64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            batches = %self.ingest_batches_total,
            received = %self.records_received_total,
            inserted = %self.records_inserted_total,
            dropped = %self.records_dropped_total,
            inserts_per_sec = format!("{:.1}", self.inserts_per_sec),
            stats_queries = %self.stats_queries_total,
            history_queries = %self.history_queries_total,
            not_found = %self.not_found_total,
            store_failures = %self.store_failures_total,
            "metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let summary = Metrics::new().snapshot();
        assert_eq!(summary.records_inserted_total, 0);
        assert_eq!(summary.store_failures_total, 0);
    }

    #[test]
    fn test_record_ingest_counts_drops() {
        let metrics = Metrics::new();
        metrics.record_received(5, 3);
        metrics.record_ingest(3);
        metrics.record_received(2, 2);
        metrics.record_ingest(2);

        let summary = metrics.snapshot();
        assert_eq!(summary.ingest_batches_total, 2);
        assert_eq!(summary.records_received_total, 7);
        assert_eq!(summary.records_inserted_total, 5);
        assert_eq!(summary.records_dropped_total, 2);
    }

    #[test]
    fn test_received_counted_without_commit() {
        let metrics = Metrics::new();
        metrics.record_received(3, 2);
        metrics.record_store_failure();

        let summary = metrics.snapshot();
        assert_eq!(summary.records_received_total, 3);
        assert_eq!(summary.records_dropped_total, 1);
        assert_eq!(summary.records_inserted_total, 0);
        assert_eq!(summary.ingest_batches_total, 0);
    }

    #[test]
    fn test_report_resets_rate_window_only() {
        let metrics = Metrics::new();
        metrics.record_received(4, 4);
        metrics.record_ingest(4);
        let first = metrics.report();
        assert_eq!(first.records_inserted_total, 4);
        assert_eq!(metrics.inserted_since_report.load(Ordering::Relaxed), 0);

        let second = metrics.report();
        assert_eq!(second.records_inserted_total, 4);
        assert_eq!(second.inserts_per_sec, 0.0);
    }
}
