use thiserror::Error;

/// Failure reported by a [`Store`](crate::store::Store) backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Transient infrastructure failure; the caller may retry.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The backend refused the request; retrying will not help.
    #[error("Store rejected request: {0}")]
    Rejected(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(i64),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IngestError {
    /// Only transient store failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            IngestError::Store(e) => e.is_transient(),
            IngestError::SchemaMismatch(_) => false,
            IngestError::InvalidTimestamp(_) => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Invalid window: end={end}, window={window}s")]
    InvalidWindow { end: i64, window: i64 },

    #[error("Corrupt record {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl QueryError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, QueryError::Store(e) if e.is_transient())
    }
}

/// Process-level error for the gateway and binary.
#[derive(Debug, Error)]
pub enum Error {
    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),
}

pub type Result<T> = std::result::Result<T, Error>;
