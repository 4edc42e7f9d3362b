//! Derivation engine - current tag state and bounded history from the event log
//!
//! Everything here is recomputed per call; the engine holds no state of its
//! own beyond injected handles.

use crate::domain::clock::Clock;
use crate::domain::error::{StoreError, TagError};
use crate::domain::humanize::humanize_since;
use crate::domain::position::synthesize;
use crate::domain::types::{
    normalize_gateway_mac, DerivedTagState, Gateway, HistoryEntry, HistoryQuery, Presence,
    SightingEvent, TagHistory, TagMac,
};
use crate::infra::config::{Config, HARD_MAX_HISTORY_LIMIT};
use crate::infra::metrics::Metrics;
use crate::store::{EventStore, GatewayStore};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::debug;

/// Tunables of the derivation engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DerivationSettings {
    pub presence_window_secs: i64,
    pub default_history_limit: usize,
    pub max_history_limit: usize,
}

impl Default for DerivationSettings {
    fn default() -> Self {
        Self { presence_window_secs: 10, default_history_limit: 100, max_history_limit: HARD_MAX_HISTORY_LIMIT }
    }
}

impl DerivationSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            presence_window_secs: i64::try_from(config.presence_window_secs()).unwrap_or(i64::MAX),
            default_history_limit: config.history_default_limit(),
            max_history_limit: config.history_max_limit(),
        }
    }

    /// Page size for a requested limit: default when absent, clamped to
    /// `[1, max_history_limit]` and never above the hard maximum
    pub fn effective_limit(&self, requested: Option<i64>) -> usize {
        let max = self.max_history_limit.clamp(1, HARD_MAX_HISTORY_LIMIT);
        match requested {
            None => self.default_history_limit.clamp(1, max),
            Some(n) if n < 1 => 1,
            Some(n) => usize::try_from(n).unwrap_or(max).min(max),
        }
    }
}

/// History request as received from a caller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistoryRequest {
    pub limit: Option<i64>,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
}

pub struct DerivationEngine {
    events: Arc<dyn EventStore>,
    gateways: Arc<dyn GatewayStore>,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
    settings: DerivationSettings,
}

impl DerivationEngine {
    pub fn new(
        events: Arc<dyn EventStore>,
        gateways: Arc<dyn GatewayStore>,
        clock: Arc<dyn Clock>,
        metrics: Arc<Metrics>,
        settings: DerivationSettings,
    ) -> Self {
        Self { events, gateways, clock, metrics, settings }
    }

    /// Current state of every tag that has at least one sighting, ordered by mac
    ///
    /// Tags sharing a geolocated gateway get increasing ordinal indexes in
    /// result order, which rotates their synthetic positions apart.
    pub fn list_current_states(&self) -> Result<Vec<DerivedTagState>, StoreError> {
        self.metrics.record_stats_query();
        let latest = self.events.latest_per_tag().map_err(|e| self.store_failure(e))?;
        let now = self.clock.now_secs();

        let mut gateway_cache: FxHashMap<String, Option<Gateway>> = FxHashMap::default();
        let mut ordinals: FxHashMap<String, u32> = FxHashMap::default();
        let mut states = Vec::with_capacity(latest.len());

        for event in &latest {
            let key = normalize_gateway_mac(event.gateway_or_unknown());
            let gateway = match gateway_cache.get(&key) {
                Some(cached) => cached.clone(),
                None => {
                    let found = self.gateways.find_gateway(&key).map_err(|e| self.store_failure(e))?;
                    gateway_cache.insert(key.clone(), found.clone());
                    found
                }
            };

            let position = gateway.and_then(|gw| gw.geolocation).map(|geo| {
                let ordinal = ordinals.entry(key).or_insert(0);
                let position = synthesize(geo.latitude, geo.longitude, event.mac.as_str(), *ordinal);
                *ordinal += 1;
                position
            });

            states.push(self.derive(event, now, position));
        }

        debug!(tags = %states.len(), "current_states_listed");
        Ok(states)
    }

    /// Current state of one tag; ordinal index is always 0
    pub fn current_state(&self, mac: &str) -> Result<DerivedTagState, TagError> {
        self.metrics.record_stats_query();
        let mac = self.parse_known_mac(mac)?;
        let event = self
            .events
            .latest_for_tag(&mac)
            .map_err(|e| self.store_failure(e))?
            .ok_or_else(|| self.not_found(&mac))?;

        let gateway = self
            .gateways
            .find_gateway(&normalize_gateway_mac(event.gateway_or_unknown()))
            .map_err(|e| self.store_failure(e))?;
        let position = gateway
            .and_then(|gw| gw.geolocation)
            .map(|geo| synthesize(geo.latitude, geo.longitude, event.mac.as_str(), 0));

        Ok(self.derive(&event, self.clock.now_secs(), position))
    }

    /// Newest-first sightings of one tag within optional inclusive bounds
    ///
    /// Fails with NotFound only when the tag has never been seen; a known tag
    /// whose filter matches nothing yields an empty page.
    pub fn history(&self, mac: &str, request: HistoryRequest) -> Result<TagHistory, TagError> {
        self.metrics.record_history_query();
        let mac = self.parse_known_mac(mac)?;
        if !self.events.has_events(&mac).map_err(|e| self.store_failure(e))? {
            return Err(self.not_found(&mac));
        }

        let query = HistoryQuery {
            mac,
            start_time: request.start_time,
            end_time: request.end_time,
            limit: self.settings.effective_limit(request.limit),
        };
        let events = self.events.history(&query).map_err(|e| self.store_failure(e))?;
        let entries: Vec<HistoryEntry> = events.iter().map(HistoryEntry::from).collect();

        Ok(TagHistory { total: entries.len(), mac: query.mac, entries })
    }

    fn derive(
        &self,
        event: &SightingEvent,
        now: i64,
        position: Option<(f64, f64)>,
    ) -> DerivedTagState {
        DerivedTagState {
            mac: event.mac.clone(),
            last_rssi: event.rssi,
            gateway_id: event.gateway_or_unknown().to_string(),
            last_seen: event.timestamp,
            last_seen_humanized: humanize_since(event.timestamp, now),
            presence: Presence::classify(event.timestamp, now, self.settings.presence_window_secs),
            latitude: position.map(|(lat, _)| lat),
            longitude: position.map(|(_, lon)| lon),
        }
    }

    fn parse_known_mac(&self, mac: &str) -> Result<TagMac, TagError> {
        TagMac::parse(mac).ok_or_else(|| {
            self.metrics.record_not_found();
            TagError::NotFound { mac: mac.to_string() }
        })
    }

    fn not_found(&self, mac: &TagMac) -> TagError {
        self.metrics.record_not_found();
        TagError::NotFound { mac: mac.to_string() }
    }

    fn store_failure(&self, err: StoreError) -> StoreError {
        self.metrics.record_store_failure();
        err
    }
}
