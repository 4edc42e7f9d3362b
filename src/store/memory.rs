//! In-memory event store
//!
//! Mirrors the SQLite store's ordering rules exactly. Appends can be made to
//! fail on demand to exercise store-failure paths.

use crate::domain::error::StoreError;
use crate::domain::types::{Gateway, HistoryQuery, SightingEvent, TagMac};
use crate::store::{EventStore, GatewayStore};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Default)]
struct MemoryState {
    /// Insertion order doubles as the row id
    events: Vec<SightingEvent>,
    gateways: BTreeMap<String, Gateway>,
}

#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<MemoryState>,
    fail_writes: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent append fail with `StoreError::Unavailable`
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    pub fn event_count(&self) -> usize {
        self.state.read().events.len()
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(StoreError::Unavailable("writes disabled".to_string()));
        }
        Ok(())
    }
}

/// Position-aware "is newer": later timestamp, or equal timestamp inserted later
fn newer(candidate: (usize, &SightingEvent), current: (usize, &SightingEvent)) -> bool {
    (candidate.1.timestamp, candidate.0) > (current.1.timestamp, current.0)
}

impl EventStore for InMemoryStore {
    fn append_batch(&self, events: &[SightingEvent]) -> Result<usize, StoreError> {
        self.check_writable()?;
        self.state.write().events.extend_from_slice(events);
        Ok(events.len())
    }

    fn latest_per_tag(&self) -> Result<Vec<SightingEvent>, StoreError> {
        let state = self.state.read();
        let mut latest: BTreeMap<&TagMac, (usize, &SightingEvent)> = BTreeMap::new();
        for (row, event) in state.events.iter().enumerate() {
            let replace =
                latest.get(&event.mac).map_or(true, |&current| newer((row, event), current));
            if replace {
                latest.insert(&event.mac, (row, event));
            }
        }
        Ok(latest.into_values().map(|(_, event)| event.clone()).collect())
    }

    fn latest_for_tag(&self, mac: &TagMac) -> Result<Option<SightingEvent>, StoreError> {
        let state = self.state.read();
        Ok(state
            .events
            .iter()
            .enumerate()
            .filter(|(_, event)| &event.mac == mac)
            .max_by_key(|(row, event)| (event.timestamp, *row))
            .map(|(_, event)| event.clone()))
    }

    fn has_events(&self, mac: &TagMac) -> Result<bool, StoreError> {
        Ok(self.state.read().events.iter().any(|event| &event.mac == mac))
    }

    fn history(&self, query: &HistoryQuery) -> Result<Vec<SightingEvent>, StoreError> {
        let state = self.state.read();
        let mut matching: Vec<(usize, &SightingEvent)> =
            state.events.iter().enumerate().filter(|(_, event)| query.matches(event)).collect();
        matching.sort_by(|a, b| (b.1.timestamp, b.0).cmp(&(a.1.timestamp, a.0)));
        Ok(matching.into_iter().take(query.limit).map(|(_, event)| event.clone()).collect())
    }
}

impl GatewayStore for InMemoryStore {
    fn find_gateway(&self, mac: &str) -> Result<Option<Gateway>, StoreError> {
        Ok(self.state.read().gateways.get(mac).cloned())
    }

    fn list_gateways(&self) -> Result<Vec<Gateway>, StoreError> {
        Ok(self.state.read().gateways.values().cloned().collect())
    }

    fn insert_gateway(&self, gateway: &Gateway) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut state = self.state.write();
        if state.gateways.contains_key(&gateway.mac) {
            return Err(StoreError::Conflict("gateways.mac".to_string()));
        }
        if state.gateways.values().any(|g| g.name == gateway.name) {
            return Err(StoreError::Conflict("gateways.name".to_string()));
        }
        state.gateways.insert(gateway.mac.clone(), gateway.clone());
        Ok(())
    }

    fn update_gateway(&self, gateway: &Gateway) -> Result<bool, StoreError> {
        self.check_writable()?;
        let mut state = self.state.write();
        if !state.gateways.contains_key(&gateway.mac) {
            return Ok(false);
        }
        if state.gateways.values().any(|g| g.name == gateway.name && g.mac != gateway.mac) {
            return Err(StoreError::Conflict("gateways.name".to_string()));
        }
        state.gateways.insert(gateway.mac.clone(), gateway.clone());
        Ok(true)
    }
}
