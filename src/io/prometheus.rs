//! Prometheus text exposition of the service counters

use crate::infra::metrics::MetricsSummary;
use std::fmt::Write;

pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Write a counter with site label
fn write_counter(output: &mut String, name: &str, help: &str, site: &str, val: u64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} counter");
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

/// Format metrics in Prometheus text exposition format
pub fn format_prometheus_metrics(summary: &MetricsSummary, site_id: &str) -> String {
    let mut output = String::with_capacity(2048);

    write_counter(
        &mut output,
        "tag_tracker_ingest_batches_total",
        "Ingest batches committed",
        site_id,
        summary.ingest_batches_total,
    );
    write_counter(
        &mut output,
        "tag_tracker_records_received_total",
        "Raw advertisements received",
        site_id,
        summary.records_received_total,
    );
    write_counter(
        &mut output,
        "tag_tracker_records_inserted_total",
        "Sighting events stored",
        site_id,
        summary.records_inserted_total,
    );
    write_counter(
        &mut output,
        "tag_tracker_records_dropped_total",
        "Advertisements dropped by validation",
        site_id,
        summary.records_dropped_total,
    );
    write_counter(
        &mut output,
        "tag_tracker_stats_queries_total",
        "Current-state queries served",
        site_id,
        summary.stats_queries_total,
    );
    write_counter(
        &mut output,
        "tag_tracker_history_queries_total",
        "History queries served",
        site_id,
        summary.history_queries_total,
    );
    write_counter(
        &mut output,
        "tag_tracker_not_found_total",
        "Tag queries for unknown MACs",
        site_id,
        summary.not_found_total,
    );
    write_counter(
        &mut output,
        "tag_tracker_store_failures_total",
        "Failed store operations",
        site_id,
        summary.store_failures_total,
    );

    output
}
