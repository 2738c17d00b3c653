//! Progress snapshot shape stored in the coordination store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mediagrab_types::TaskStatus;

/// Volatile per-task progress record, keyed by task id, 7-day TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub task_id: String,
    pub url: String,
    pub title: String,
    pub status: TaskStatus,
    /// Percent complete, clamped to [0, 100].
    pub progress: f64,
    pub current_bytes: u64,
    pub total_bytes: u64,
    pub speed_bps: f64,
    /// Null until both byte counters and a positive speed are known.
    pub eta_seconds: Option<f64>,
    pub process_id: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_update: DateTime<Utc>,
    pub error_message: Option<String>,
}

impl ProgressSnapshot {
    pub fn new(task_id: String, url: String, title: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            task_id,
            url,
            title: title.unwrap_or_else(|| "Unknown".to_string()),
            status: TaskStatus::Pending,
            progress: 0.0,
            current_bytes: 0,
            total_bytes: 0,
            speed_bps: 0.0,
            eta_seconds: None,
            process_id: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            last_update: now,
            error_message: None,
        }
    }
}
