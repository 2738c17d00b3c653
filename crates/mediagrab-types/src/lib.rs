//! Shared types for the mediagrab download service.
//!
//! Every other crate in the workspace depends on this one for the task
//! lifecycle model ([`TaskStatus`], [`Priority`], [`TaskOutcome`]), the
//! service-wide error taxonomy ([`ServiceError`]/[`ErrorKind`]) and the
//! transient-failure [`RetryPolicy`] shared by the persistent and
//! coordination stores.

pub mod error;
pub mod priority;
pub mod progress;
pub mod retry;
pub mod status;

pub use error::{ErrorKind, ServiceError, ServiceResult};
pub use priority::Priority;
pub use progress::{ProgressTick, TaskOutcome};
pub use retry::RetryPolicy;
pub use status::TaskStatus;
