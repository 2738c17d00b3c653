//! Core coordination store trait.

use async_trait::async_trait;

use crate::error::CoordinationError;

/// Volatile shared-state operations backing the scheduler, rate limiter,
/// progress tracker and auth layer.
///
/// Members of the priority queue are opaque strings to this layer; the
/// job queue serializes its own tuple shape into them. Scores follow
/// sorted-set semantics: the lowest score pops first.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    fn backend_name(&self) -> &'static str;

    // === Rate limiting ===

    /// Atomically increment the counter at `key`, starting a
    /// `window_secs` TTL on first increment. Returns the new count.
    async fn incr_with_ttl(&self, key: &str, window_secs: u64) -> Result<u64, CoordinationError>;

    // === Priority queue (sorted set) ===

    async fn queue_add(&self, member: &str, score: f64) -> Result<(), CoordinationError>;

    /// Pop the member with the lowest score, FIFO within equal scores.
    async fn queue_pop_min(&self) -> Result<Option<String>, CoordinationError>;

    /// Remove a specific member. Returns `true` if it was present.
    async fn queue_remove(&self, member: &str) -> Result<bool, CoordinationError>;

    async fn queue_len(&self) -> Result<u64, CoordinationError>;

    /// All members ordered by ascending score (queue order). Used for
    /// queue-position reads and outage reconciliation.
    async fn queue_snapshot(&self) -> Result<Vec<String>, CoordinationError>;

    // === Active set ===

    /// Returns `true` if the id was newly added (claim succeeded).
    async fn active_add(&self, task_id: &str) -> Result<bool, CoordinationError>;

    async fn active_remove(&self, task_id: &str) -> Result<bool, CoordinationError>;

    async fn active_count(&self) -> Result<u64, CoordinationError>;

    async fn active_members(&self) -> Result<Vec<String>, CoordinationError>;

    // === JSON blobs with TTL (progress snapshots, auth records) ===

    async fn blob_set(
        &self,
        key: &str,
        value: &str,
        ttl_secs: u64,
    ) -> Result<(), CoordinationError>;

    async fn blob_get(&self, key: &str) -> Result<Option<String>, CoordinationError>;

    async fn blob_delete(&self, key: &str) -> Result<(), CoordinationError>;

    /// Keys matching `prefix*` (auth listing).
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, CoordinationError>;

    // === Counters (queue stats) ===

    async fn counter_incr(&self, key: &str) -> Result<u64, CoordinationError>;

    async fn counter_get(&self, key: &str) -> Result<u64, CoordinationError>;

    // === Liveness ===

    async fn ping(&self) -> Result<(), CoordinationError>;
}
