//! Error types for subprocess supervision.

use mediagrab_types::ServiceError;

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("Probe failed: {0}")]
    ProbeFailed(String),

    #[error("Process exceeded wall-clock budget of {0}s")]
    Timeout(u64),

    #[error("Process exceeded resource ceiling: {0}")]
    ResourceExceeded(String),

    #[error("Process cancelled")]
    Cancelled,

    #[error("Failed to spawn process: {0}")]
    SpawnFailed(String),

    #[error("No output file found after download")]
    OutputMissing,

    #[error("Extractor failed: {0}")]
    External(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ExtractError> for ServiceError {
    fn from(err: ExtractError) -> Self {
        match err {
            ExtractError::ProbeFailed(msg) => ServiceError::external(msg),
            ExtractError::Timeout(secs) => {
                ServiceError::timeout(format!("process exceeded {secs}s"))
            }
            ExtractError::ResourceExceeded(msg) => ServiceError::resource_exceeded(msg),
            ExtractError::Cancelled => ServiceError::invalid_state("task cancelled"),
            ExtractError::SpawnFailed(msg) => ServiceError::external(msg),
            ExtractError::OutputMissing => {
                ServiceError::external("no output file found after download")
            }
            ExtractError::External(msg) => ServiceError::external(msg),
            ExtractError::Io(err) => ServiceError::internal(err.to_string()),
        }
    }
}
