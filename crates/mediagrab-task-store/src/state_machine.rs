//! Task state machine enforcement.
//!
//! Validates transitions per the task lifecycle:
//!
//! ```text
//! Pending -> Downloading | Cancelled | Failed
//! Downloading -> Processing | Completed | Cancelled | Failed | Pending (retry)
//! Processing -> Completed | Cancelled | Failed | Pending (retry)
//! Completed/Failed/Cancelled -> ERROR (terminal, no further transitions)
//! ```
//!
//! `Downloading -> Completed` is legal because tasks without a post-step
//! finalize straight out of the download phase. The `-> Pending` edges are
//! the scheduler's retry path.

use crate::error::TaskStoreError;
use mediagrab_types::TaskStatus;

/// Validate a task status transition.
///
/// Returns `Ok(())` if the transition is legal, or
/// `Err(TaskStoreError::InvalidTransition)` if not. Self-transitions are
/// rejected here; callers that only touch non-status fields skip
/// validation entirely.
pub fn validate_transition(from: TaskStatus, to: TaskStatus) -> Result<(), TaskStoreError> {
    let allowed = match from {
        TaskStatus::Pending => matches!(
            to,
            TaskStatus::Downloading | TaskStatus::Cancelled | TaskStatus::Failed
        ),
        TaskStatus::Downloading => matches!(
            to,
            TaskStatus::Processing
                | TaskStatus::Completed
                | TaskStatus::Cancelled
                | TaskStatus::Failed
                | TaskStatus::Pending
        ),
        TaskStatus::Processing => matches!(
            to,
            TaskStatus::Completed
                | TaskStatus::Cancelled
                | TaskStatus::Failed
                | TaskStatus::Pending
        ),
        TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => false,
    };

    if allowed {
        Ok(())
    } else {
        Err(TaskStoreError::InvalidTransition {
            current: from,
            requested: to,
        })
    }
}
