//! The job tuple queued in the coordination store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use mediagrab_types::Priority;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_TIMEOUT_SECS: u64 = 3600;

/// One queued unit of work referencing a task row.
///
/// Serialized as the sorted-set member; the score encodes effective
/// priority (with the retry penalty) plus an enqueue-time fraction that
/// breaks ties FIFO.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Job {
    pub task_id: Uuid,
    pub priority: Priority,
    pub attempt: u32,
    pub max_attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    pub timeout_secs: u64,
}

impl Job {
    pub fn new(task_id: Uuid, priority: Priority) -> Self {
        Self {
            task_id,
            priority,
            attempt: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            enqueued_at: Utc::now(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    /// The next attempt of this job, re-stamped for enqueueing.
    pub fn retry(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            enqueued_at: Utc::now(),
            ..self.clone()
        }
    }

    pub fn attempts_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// Sorted-set score. Lower pops first: negated effective priority
    /// dominates, the enqueue-time fraction (sub-integer) breaks ties in
    /// arrival order without a second structure.
    pub fn score(&self) -> f64 {
        let effective = self.priority.effective(self.attempt);
        let tiebreak = self.enqueued_at.timestamp_millis() as f64 * 1e-14;
        -(effective as f64) + tiebreak
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(member: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(member)
    }
}
