//! Unified error types for task store operations.

use mediagrab_types::TaskStatus;

/// Unified error type for task store operations.
#[derive(Debug, thiserror::Error)]
pub enum TaskStoreError {
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Duplicate task id: {0}")]
    DuplicateId(String),

    #[error("Invalid state transition: {current} -> {requested}")]
    InvalidTransition {
        current: TaskStatus,
        requested: TaskStatus,
    },

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl TaskStoreError {
    /// Connection-class failures are retried with capped backoff;
    /// integrity violations and state machine rejections are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, TaskStoreError::DatabaseError(_))
    }
}

impl From<serde_json::Error> for TaskStoreError {
    fn from(err: serde_json::Error) -> Self {
        TaskStoreError::SerializationError(err.to_string())
    }
}

impl From<sqlx::Error> for TaskStoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = err {
            if db_err.is_unique_violation() {
                return TaskStoreError::DuplicateId(db_err.message().to_string());
            }
        }
        TaskStoreError::DatabaseError(err.to_string())
    }
}
