//! Ingestion pipeline - raw gateway advertisements to durable sighting events
//!
//! Lenient by contract: malformed records are dropped silently and only the
//! inserted count is reported. A store failure rejects the whole batch.

use crate::domain::clock::Clock;
use crate::domain::error::StoreError;
use crate::domain::types::{RawAdvertisement, UNKNOWN_GATEWAY};
use crate::infra::metrics::Metrics;
use crate::store::EventStore;
use std::sync::Arc;
use tracing::{debug, error, info};

pub struct IngestionPipeline {
    store: Arc<dyn EventStore>,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
}

impl IngestionPipeline {
    pub fn new(store: Arc<dyn EventStore>, clock: Arc<dyn Clock>, metrics: Arc<Metrics>) -> Self {
        Self { store, clock, metrics }
    }

    /// Validate `records` and append the survivors as one atomic batch
    ///
    /// A missing or empty `gateway_id` is recorded as `"unknown"`. Returns
    /// the number of events inserted.
    pub fn ingest(
        &self,
        gateway_id: Option<&str>,
        records: &[RawAdvertisement],
    ) -> Result<usize, StoreError> {
        let gateway_id = gateway_id.filter(|gw| !gw.is_empty()).unwrap_or(UNKNOWN_GATEWAY);
        let now = self.clock.now_secs();

        let mut events = Vec::with_capacity(records.len());
        for (index, record) in records.iter().enumerate() {
            match record.validate(gateway_id, now) {
                Ok(event) => events.push(event),
                Err(reason) => {
                    debug!(gateway = %gateway_id, index = %index, reason = %reason.as_str(), "advertisement_dropped");
                }
            }
        }

        self.metrics.record_received(records.len() as u64, events.len() as u64);

        let inserted = if events.is_empty() {
            0
        } else {
            self.store.append_batch(&events).map_err(|e| {
                self.metrics.record_store_failure();
                error!(gateway = %gateway_id, events = %events.len(), error = %e, "ingest_append_failed");
                e
            })?
        };

        self.metrics.record_ingest(inserted as u64);
        info!(
            gateway = %gateway_id,
            received = %records.len(),
            inserted = %inserted,
            "ingest_batch"
        );
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::clock::FixedClock;
    use crate::store::InMemoryStore;
    use serde_json::{json, Value};

    const NOW: i64 = 1_800_000_000;

    fn records(values: Vec<Value>) -> Vec<RawAdvertisement> {
        values.into_iter().map(RawAdvertisement::from_value).collect()
    }

    fn pipeline() -> (IngestionPipeline, Arc<InMemoryStore>, Arc<Metrics>) {
        let store = Arc::new(InMemoryStore::new());
        let metrics = Arc::new(Metrics::new());
        let clock = Arc::new(FixedClock::new(NOW));
        (IngestionPipeline::new(store.clone(), clock, metrics.clone()), store, metrics)
    }

    #[test]
    fn test_inserted_count_matches_valid_records() {
        let (pipeline, store, metrics) = pipeline();
        let batch = records(vec![
            json!({"mac": "AA:11", "rssi": -60, "tm": 1700000000}),
            json!({"mac": "AA:12", "rssi": "-61"}),
            json!({"mac": "", "rssi": -60}),
            json!({"mac": "AA:13"}),
            json!({"mac": "AA:14", "rssi": "weak"}),
            json!({"rssi": -60}),
            json!("garbage"),
        ]);

        assert_eq!(pipeline.ingest(Some("gw1"), &batch).unwrap(), 2);
        assert_eq!(store.event_count(), 2);

        let summary = metrics.snapshot();
        assert_eq!(summary.records_received_total, 7);
        assert_eq!(summary.records_dropped_total, 5);
    }

    #[test]
    fn test_missing_gateway_defaults_to_unknown() {
        let (pipeline, store, _) = pipeline();
        let batch = records(vec![json!({"mac": "aa", "rssi": -1})]);
        pipeline.ingest(None, &batch).unwrap();
        pipeline.ingest(Some(""), &batch).unwrap();

        let latest = store.latest_per_tag().unwrap();
        assert_eq!(latest[0].gateway_id.as_deref(), Some("unknown"));
        assert_eq!(store.event_count(), 2);
    }

    #[test]
    fn test_missing_timestamp_uses_clock() {
        let (pipeline, store, _) = pipeline();
        pipeline.ingest(Some("gw1"), &records(vec![json!({"mac": "aa", "rssi": -1, "tm": "n/a"})])).unwrap();
        assert_eq!(store.latest_per_tag().unwrap()[0].timestamp, NOW);
    }

    #[test]
    fn test_empty_batch_skips_store() {
        let (pipeline, store, _) = pipeline();
        store.set_fail_writes(true);
        // Nothing valid to append, so the failing store is never touched
        assert_eq!(pipeline.ingest(Some("gw1"), &records(vec![json!({"mac": "aa"})])).unwrap(), 0);
    }

    #[test]
    fn test_store_failure_rejects_batch() {
        let (pipeline, store, metrics) = pipeline();
        store.set_fail_writes(true);
        let batch = records(vec![json!({"mac": "aa", "rssi": -1}), json!({"mac": "bb", "rssi": -2})]);

        assert!(pipeline.ingest(Some("gw1"), &batch).is_err());
        assert_eq!(store.event_count(), 0);
        let summary = metrics.snapshot();
        assert_eq!(summary.store_failures_total, 1);
        assert_eq!(summary.ingest_batches_total, 0);
        assert_eq!(summary.records_received_total, 2);
        assert_eq!(summary.records_dropped_total, 0);
        assert_eq!(summary.records_inserted_total, 0);
    }
}
