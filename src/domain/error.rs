//! Error taxonomy shared by the store, the engine and the registry

use thiserror::Error;

/// Failure of the underlying event store or gateway table
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Unique constraint violated (gateway mac or name)
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Tag query failure
#[derive(Debug, Error)]
pub enum TagError {
    #[error("MAC not found: {mac}")]
    NotFound { mac: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Gateway registry failure
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid gateway: {0}")]
    Invalid(String),
    #[error("gateway already exists")]
    AlreadyExists,
    #[error("gateway not found: {mac}")]
    NotFound { mac: String },
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for GatewayError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(_) => GatewayError::AlreadyExists,
            other => GatewayError::Store(other),
        }
    }
}
