//! Lifecycle event ring entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum entries kept per task; oldest entries are dropped first.
pub const MAX_EVENTS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressEventKind {
    TaskCreated,
    DownloadStarted,
    ProgressUpdate,
    PostProcessing,
    Retry,
    TaskCompleted,
    TaskFailed,
    TaskCancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub event: ProgressEventKind,
    pub timestamp: DateTime<Utc>,
    pub details: Value,
}

impl ProgressEvent {
    pub fn now(event: ProgressEventKind, details: Value) -> Self {
        Self {
            event,
            timestamp: Utc::now(),
            details,
        }
    }
}

/// Append an event, keeping at most [`MAX_EVENTS`] entries.
pub fn push_bounded(ring: &mut Vec<ProgressEvent>, event: ProgressEvent) {
    ring.push(event);
    if ring.len() > MAX_EVENTS {
        let excess = ring.len() - MAX_EVENTS;
        ring.drain(..excess);
    }
}
