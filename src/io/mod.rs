//! IO modules - external system interfaces
//!
//! - `http` - HTTP/JSON API for gateways and dashboards
//! - `prometheus` - Prometheus text exposition of the counters

pub mod http;
pub mod prometheus;

// Re-export commonly used types
pub use http::{start_api_server, ApiState};
