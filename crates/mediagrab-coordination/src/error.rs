//! Error types for coordination store operations.

#[derive(Debug, thiserror::Error)]
pub enum CoordinationError {
    /// The backing store could not be reached after retries. Rate-limit
    /// checks fail open on this; the scheduler falls back to its local
    /// queue mirror.
    #[error("Coordination store unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for CoordinationError {
    fn from(err: serde_json::Error) -> Self {
        CoordinationError::Serialization(err.to_string())
    }
}

impl From<redis::RedisError> for CoordinationError {
    fn from(err: redis::RedisError) -> Self {
        CoordinationError::Unavailable(err.to_string())
    }
}
