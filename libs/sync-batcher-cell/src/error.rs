use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Clinical record store not configured")]
    NotConfigured,

    #[error("Clinical record store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Payload compression error: {0}")]
    CompressionError(#[from] std::io::Error),

    #[error("Invalid store response: {0}")]
    InvalidResponse(String),
}

impl From<anyhow::Error> for SyncError {
    fn from(err: anyhow::Error) -> Self {
        SyncError::StoreUnavailable(err.to_string())
    }
}
