//! Domain models - tag sightings, gateways and derived state
//!
//! This module contains the canonical data types used throughout the system:
//! - `types` - sighting events, raw advertisements, gateways, tag state
//! - `position` - deterministic synthetic positions around a gateway
//! - `humanize` - "last seen" strings
//! - `clock` - injectable wall clock
//! - `error` - store, tag and gateway errors

pub mod clock;
pub mod error;
pub mod humanize;
pub mod position;
pub mod types;

// Re-export commonly used types at module level
pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{GatewayError, StoreError, TagError};
pub use types::{
    DerivedTagState, Gateway, GatewayUpdate, Geolocation, HistoryEntry, HistoryQuery, Presence,
    RawAdvertisement, SightingEvent, TagHistory, TagMac,
};
