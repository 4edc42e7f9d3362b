//! Persistence - sighting event log and gateway table
//!
//! - `sqlite` - SQLite-backed store used by the service binary
//! - `memory` - in-memory store for tests and ephemeral runs
//!
//! Both implement [`EventStore`] and [`GatewayStore`]; services receive them
//! as `Arc<dyn ...>` so the engine never depends on a concrete backend.

pub mod memory;
pub mod sqlite;

use crate::domain::error::StoreError;
use crate::domain::types::{Gateway, HistoryQuery, SightingEvent, TagMac};

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

/// Append-only log of sighting events
pub trait EventStore: Send + Sync {
    /// Append all events atomically; returns the number appended
    fn append_batch(&self, events: &[SightingEvent]) -> Result<usize, StoreError>;

    /// Latest event of every tag, ordered by mac
    ///
    /// "Latest" is the maximum timestamp; equal timestamps resolve to the
    /// most recently inserted event.
    fn latest_per_tag(&self) -> Result<Vec<SightingEvent>, StoreError>;

    /// Latest event of one tag (same tie rule as `latest_per_tag`)
    fn latest_for_tag(&self, mac: &TagMac) -> Result<Option<SightingEvent>, StoreError>;

    fn has_events(&self, mac: &TagMac) -> Result<bool, StoreError>;

    /// Events matching `query`, newest first, at most `query.limit`
    fn history(&self, query: &HistoryQuery) -> Result<Vec<SightingEvent>, StoreError>;
}

/// Gateway table; macs passed in are already normalized
pub trait GatewayStore: Send + Sync {
    fn find_gateway(&self, mac: &str) -> Result<Option<Gateway>, StoreError>;

    /// All gateways ordered by mac
    fn list_gateways(&self) -> Result<Vec<Gateway>, StoreError>;

    /// Fails with `StoreError::Conflict` when mac or name is taken
    fn insert_gateway(&self, gateway: &Gateway) -> Result<(), StoreError>;

    /// Replace name/geolocation of the gateway with `gateway.mac`
    ///
    /// Returns false when no such gateway exists; `StoreError::Conflict`
    /// when the new name belongs to another gateway.
    fn update_gateway(&self, gateway: &Gateway) -> Result<bool, StoreError>;
}
