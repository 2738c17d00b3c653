//! The progress tracker: snapshot writes, event ring, live fan-out.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::events::{self, MAX_EVENTS, ProgressEvent, ProgressEventKind};
use crate::snapshot::ProgressSnapshot;
use crate::stream::{ProgressDelta, StreamHub, SyncBoxStream};
use mediagrab_coordination::{CoordinationError, CoordinationStore, keys};
use mediagrab_types::{ProgressTick, TaskOutcome, TaskStatus};

/// Snapshot and event-ring TTL.
const PROGRESS_TTL_SECS: u64 = 7 * 24 * 3600;

/// Tracks per-task progress in the coordination store and fans deltas
/// out to subscribers. Best-effort: coordination outages are logged and
/// absorbed, never propagated to the worker.
pub struct ProgressTracker {
    store: Arc<dyn CoordinationStore>,
    hub: StreamHub,
}

impl ProgressTracker {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self {
            store,
            hub: StreamHub::new(),
        }
    }

    /// Create the snapshot for a new task.
    pub async fn init(&self, task_id: Uuid, url: &str, title: Option<&str>) {
        let snapshot = ProgressSnapshot::new(
            task_id.to_string(),
            url.to_string(),
            title.map(str::to_string),
        );
        self.write_snapshot(&snapshot).await;
        self.record(
            task_id,
            ProgressEventKind::TaskCreated,
            json!({"title": title, "url": truncate(url, 60)}),
        )
        .await;
    }

    /// Mark the download phase started.
    pub async fn start_download(&self, task_id: Uuid, process_id: u32) {
        if let Some(mut snapshot) = self.get(task_id).await {
            snapshot.status = TaskStatus::Downloading;
            snapshot.started_at = Some(Utc::now());
            snapshot.process_id = Some(process_id);
            snapshot.last_update = Utc::now();
            self.write_snapshot(&snapshot).await;
            self.publish_delta(&snapshot);
        }
        self.record(
            task_id,
            ProgressEventKind::DownloadStarted,
            json!({"process_id": process_id}),
        )
        .await;
    }

    /// Apply one progress tick.
    ///
    /// Percent is clamped to [0, 100]; ETA is derived when both byte
    /// counters and a positive speed are known. A ring event is emitted
    /// only when the tick crosses a 10% boundary (or reaches 100) so a
    /// pathological tick stream cannot grow the ring.
    pub async fn update(&self, task_id: Uuid, tick: ProgressTick) {
        let Some(mut snapshot) = self.get(task_id).await else {
            debug!(task_id = %task_id, "progress update for unknown snapshot");
            return;
        };

        let percent = tick.percent.clamp(0.0, 100.0);
        let previous_bucket = (snapshot.progress / 10.0).floor() as i64;
        let bucket = (percent / 10.0).floor() as i64;

        snapshot.progress = percent;
        if let Some(done) = tick.bytes_done {
            snapshot.current_bytes = done;
        }
        if let Some(total) = tick.bytes_total {
            snapshot.total_bytes = total;
        }
        if let Some(speed) = tick.speed_bps {
            snapshot.speed_bps = speed;
        }

        snapshot.eta_seconds = if snapshot.total_bytes > 0 && snapshot.speed_bps > 0.0 {
            let remaining = snapshot.total_bytes.saturating_sub(snapshot.current_bytes);
            Some(remaining as f64 / snapshot.speed_bps)
        } else {
            None
        };
        snapshot.last_update = Utc::now();

        self.write_snapshot(&snapshot).await;
        self.publish_delta(&snapshot);

        if bucket > previous_bucket || percent >= 100.0 {
            self.record(
                task_id,
                ProgressEventKind::ProgressUpdate,
                json!({
                    "progress": percent,
                    "speed_bps": snapshot.speed_bps,
                    "current_bytes": snapshot.current_bytes,
                    "total_bytes": snapshot.total_bytes,
                }),
            )
            .await;
        }
    }

    /// Enter the post-processing phase.
    pub async fn mark_processing(&self, task_id: Uuid) {
        if let Some(mut snapshot) = self.get(task_id).await {
            snapshot.status = TaskStatus::Processing;
            snapshot.progress = snapshot.progress.max(95.0);
            snapshot.last_update = Utc::now();
            self.write_snapshot(&snapshot).await;
            self.publish_delta(&snapshot);
        }
        self.record(
            task_id,
            ProgressEventKind::PostProcessing,
            json!({"phase": "post-processing"}),
        )
        .await;
    }

    /// Record a retry of a failed attempt.
    pub async fn record_retry(&self, task_id: Uuid, attempt: u32, reason: &str) {
        if let Some(mut snapshot) = self.get(task_id).await {
            snapshot.status = TaskStatus::Pending;
            snapshot.progress = 0.0;
            snapshot.process_id = None;
            snapshot.last_update = Utc::now();
            self.write_snapshot(&snapshot).await;
            self.publish_delta(&snapshot);
        }
        self.record(
            task_id,
            ProgressEventKind::Retry,
            json!({"attempt": attempt, "reason": truncate(reason, 100)}),
        )
        .await;
    }

    /// Set the terminal status and emit the terminal event.
    pub async fn finalize(&self, task_id: Uuid, outcome: &TaskOutcome) {
        let (status, kind, details) = match outcome {
            TaskOutcome::Completed {
                file_path,
                file_size,
                ..
            } => (
                TaskStatus::Completed,
                ProgressEventKind::TaskCompleted,
                json!({"file_path": file_path, "file_size": file_size}),
            ),
            TaskOutcome::Failed { error } => (
                TaskStatus::Failed,
                ProgressEventKind::TaskFailed,
                json!({"error": truncate(&error.message, 100)}),
            ),
            TaskOutcome::Cancelled => (
                TaskStatus::Cancelled,
                ProgressEventKind::TaskCancelled,
                json!({}),
            ),
        };

        if let Some(mut snapshot) = self.get(task_id).await {
            snapshot.status = status;
            snapshot.completed_at = Some(Utc::now());
            snapshot.last_update = Utc::now();
            if status == TaskStatus::Completed {
                snapshot.progress = 100.0;
            }
            if let TaskOutcome::Failed { error } = outcome {
                snapshot.error_message = Some(truncate(&error.message, 500));
            }
            self.write_snapshot(&snapshot).await;
            self.publish_delta(&snapshot);
        } else {
            // No snapshot survived; subscribers still need the terminal
            // delta so their streams end.
            self.hub.publish(
                task_id,
                ProgressDelta {
                    status,
                    percent: if status == TaskStatus::Completed {
                        100.0
                    } else {
                        0.0
                    },
                    speed_bps: None,
                },
            );
        }

        self.record(task_id, kind, details).await;
    }

    /// Current snapshot, if one exists.
    pub async fn get(&self, task_id: Uuid) -> Option<ProgressSnapshot> {
        let raw = self
            .store
            .blob_get(&keys::progress(&task_id.to_string()))
            .await
            .ok()??;
        match serde_json::from_str(&raw) {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                warn!(task_id = %task_id, "corrupt progress snapshot: {err}");
                None
            }
        }
    }

    /// Most recent events, newest last, capped at the ring bound.
    pub async fn events(&self, task_id: Uuid, limit: usize) -> Vec<ProgressEvent> {
        let mut ring = self.read_ring(task_id).await;
        let limit = limit.min(MAX_EVENTS);
        if ring.len() > limit {
            ring.drain(..ring.len() - limit);
        }
        ring
    }

    /// A finite stream of deltas for one task. The first item reflects
    /// the current snapshot; the stream ends after a terminal delta.
    pub async fn subscribe(&self, task_id: Uuid) -> BoxStream<'static, ProgressDelta> {
        let initial = match self.get(task_id).await {
            Some(snapshot) => ProgressDelta {
                status: snapshot.status,
                percent: snapshot.progress,
                speed_bps: Some(snapshot.speed_bps),
            },
            None => ProgressDelta {
                status: TaskStatus::Pending,
                percent: 0.0,
                speed_bps: None,
            },
        };
        self.hub.subscribe(task_id, initial)
    }

    /// Delete the snapshot and event ring (cleanup sweep).
    pub async fn cleanup(&self, task_id: Uuid) -> Result<(), CoordinationError> {
        let id = task_id.to_string();
        self.store.blob_delete(&keys::progress(&id)).await?;
        self.store.blob_delete(&keys::events(&id)).await?;
        Ok(())
    }

    async fn write_snapshot(&self, snapshot: &ProgressSnapshot) {
        let key = keys::progress(&snapshot.task_id);
        match serde_json::to_string(snapshot) {
            Ok(raw) => {
                if let Err(err) = self.store.blob_set(&key, &raw, PROGRESS_TTL_SECS).await {
                    warn!(task_id = %snapshot.task_id, "progress write failed: {err}");
                }
            }
            Err(err) => warn!(task_id = %snapshot.task_id, "progress serialize failed: {err}"),
        }
    }

    async fn record(&self, task_id: Uuid, kind: ProgressEventKind, details: serde_json::Value) {
        let mut ring = self.read_ring(task_id).await;
        events::push_bounded(&mut ring, ProgressEvent::now(kind, details));

        let key = keys::events(&task_id.to_string());
        match serde_json::to_string(&ring) {
            Ok(raw) => {
                if let Err(err) = self.store.blob_set(&key, &raw, PROGRESS_TTL_SECS).await {
                    warn!(task_id = %task_id, "event write failed: {err}");
                }
            }
            Err(err) => warn!(task_id = %task_id, "event serialize failed: {err}"),
        }
    }

    async fn read_ring(&self, task_id: Uuid) -> Vec<ProgressEvent> {
        let raw = self
            .store
            .blob_get(&keys::events(&task_id.to_string()))
            .await
            .ok()
            .flatten();
        raw.and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }

    fn publish_delta(&self, snapshot: &ProgressSnapshot) {
        if let Ok(task_id) = Uuid::parse_str(&snapshot.task_id) {
            self.hub.publish(
                task_id,
                ProgressDelta {
                    status: snapshot.status,
                    percent: snapshot.progress,
                    speed_bps: Some(snapshot.speed_bps),
                },
            );
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
