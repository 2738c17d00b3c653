//! Core task store trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::TaskStoreError;
use crate::types::{TaskFilter, TaskPatch, TaskRecord};
use mediagrab_types::TaskStatus;

/// Core trait for durable task storage backends.
///
/// Implementations must be `Send + Sync` for use across async contexts.
/// All write operations retry connection-class failures with capped
/// exponential backoff internally; integrity violations propagate.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Human-readable backend name (e.g. "sqlite", "postgres").
    fn backend_name(&self) -> &'static str;

    /// Insert a new task. Fails with `DuplicateId` if the id exists.
    async fn create(&self, task: TaskRecord) -> Result<TaskRecord, TaskStoreError>;

    /// Fetch a task by id. `None` when not found.
    async fn get(&self, id: Uuid) -> Result<Option<TaskRecord>, TaskStoreError>;

    /// Partial update of mutable fields.
    ///
    /// Status changes are validated against the state machine. A write
    /// that lost the race against a terminal status is silently discarded
    /// and the stored (terminal) record is returned - the later terminal
    /// state wins.
    async fn update(&self, id: Uuid, patch: TaskPatch) -> Result<TaskRecord, TaskStoreError>;

    /// Cheap read path, newest first, limit capped at 200.
    async fn list(&self, filter: TaskFilter) -> Result<Vec<TaskRecord>, TaskStoreError>;

    /// Delete a row. Used only by the cleanup sweep after the output file
    /// is gone. Returns `true` if a row was deleted.
    async fn delete(&self, id: Uuid) -> Result<bool, TaskStoreError>;

    /// Terminal rows whose `updated_at` is older than `cutoff` -
    /// candidates for the cleanup sweep. Served by the
    /// `(status, updated_at)` index.
    async fn expired_terminal(
        &self,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<TaskRecord>, TaskStoreError>;

    /// Reset non-terminal rows left over from an unclean shutdown back to
    /// `pending` and return their ids for re-enqueueing.
    async fn reset_inflight(&self) -> Result<Vec<Uuid>, TaskStoreError>;

    /// Number of rows currently in `status`.
    async fn count_by_status(&self, status: TaskStatus) -> Result<u64, TaskStoreError>;

    /// Liveness probe for health endpoints and startup checks.
    async fn ping(&self) -> Result<(), TaskStoreError>;
}
