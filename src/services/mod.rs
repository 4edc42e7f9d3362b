//! Services - business logic over the event store
//!
//! - `ingest` - validates gateway batches and appends sighting events
//! - `derivation` - current tag state, presence and history
//! - `gateway_registry` - gateway create/update/lookup

pub mod derivation;
pub mod gateway_registry;
pub mod ingest;

// Re-export commonly used types
pub use derivation::{DerivationEngine, DerivationSettings, HistoryRequest};
pub use gateway_registry::GatewayRegistry;
pub use ingest::IngestionPipeline;
