//! Service-wide error taxonomy.
//!
//! Every error that crosses a component boundary carries an [`ErrorKind`]
//! tag and a stable `error_code` string so the HTTP adapter can map it to
//! a status code in exactly one place. Component crates keep their own
//! `thiserror` enums internally and convert at the seam.

use serde::{Deserialize, Serialize};

/// Classification of a failure. Drives both HTTP mapping and the
/// scheduler's transient/permanent retry decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    InvalidState,
    RateLimited,
    Auth,
    Timeout,
    ResourceExceeded,
    External,
    PathTraversal,
    Internal,
}

/// Alias for the error code's storage type. Spelled as a path rather than
/// `&'static str` directly so `derive(Deserialize)` doesn't tie `ServiceError`'s
/// `'de` to `'static` (which would make it undeserializable as a nested field).
type ErrorCode = &'static str;

/// Uniform error shape for cross-component failures.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct ServiceError {
    pub kind: ErrorKind,
    /// Stable machine-readable code, e.g. `INVALID_URL`, `TASK_NOT_FOUND`.
    #[serde(deserialize_with = "deserialize_static_str")]
    pub code: ErrorCode,
    pub message: String,
}

/// Deserializes an owned `String` and leaks it to obtain a `&'static str`,
/// since `code` is always a process-lifetime string constant in practice.
fn deserialize_static_str<'de, D>(deserializer: D) -> Result<ErrorCode, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    Ok(Box::leak(s.into_boxed_str()))
}

pub type ServiceResult<T> = Result<T, ServiceError>;

impl ServiceError {
    pub fn new(kind: ErrorKind, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
        }
    }

    pub fn validation(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, code, message)
    }

    pub fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, code, message)
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidState, "INVALID_STATE", message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimited, "RATE_LIMIT_EXCEEDED", message)
    }

    pub fn auth(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth, code, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, "TIMEOUT", message)
    }

    pub fn resource_exceeded(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ResourceExceeded, "RESOURCE_EXCEEDED", message)
    }

    pub fn external(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::External, "EXTERNAL_ERROR", message)
    }

    pub fn path_traversal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PathTraversal, "PATH_TRAVERSAL", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, "INTERNAL_ERROR", message)
    }

    /// Whether the scheduler should re-enqueue a job that failed with
    /// this error. Timeouts and downstream outages are transient;
    /// everything else fails the attempt permanently.
    pub fn is_transient(&self) -> bool {
        matches!(self.kind, ErrorKind::Timeout | ErrorKind::External)
    }

    /// Truncate the message to `max` characters, replacing any occurrence
    /// of `download_dir` with the literal `[DOWNLOAD_DIR]` so internal
    /// paths never reach clients.
    pub fn sanitized_message(&self, download_dir: &str, max: usize) -> String {
        let mut msg = if download_dir.is_empty() {
            self.message.clone()
        } else {
            self.message.replace(download_dir, "[DOWNLOAD_DIR]")
        };
        if msg.chars().count() > max {
            msg = msg.chars().take(max).collect();
        }
        msg
    }
}
