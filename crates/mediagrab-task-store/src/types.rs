//! Persistence model for download tasks.

use chrono::{DateTime, Utc};
use mediagrab_types::TaskStatus;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Persistence model for a download task.
///
/// Contains only durable fields. Runtime handles (child processes,
/// cancellation tokens) live in the subprocess manager; volatile progress
/// lives in the coordination store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Client-visible task identifier (UUID v4, canonical hyphenated form).
    pub id: Uuid,
    /// Source media URL as submitted.
    pub url: String,
    /// Requested container/codec family (e.g. "mp4", "mp3", "best").
    pub format: String,
    /// Explicit extractor format code, used verbatim when present.
    pub format_id: Option<String>,
    /// Quality hint: "best", "worst" or "<N>p".
    pub quality: Option<String>,
    /// Request asked for an audio-only output.
    pub audio_only: bool,
    /// Cosmetic title applied to audio outputs during post-processing.
    pub custom_title: Option<String>,
    /// Embed the thumbnail as cover art in MP3-family outputs.
    pub embed_thumbnail: bool,

    pub status: TaskStatus,
    /// Percent complete, 0-100.
    pub progress: f64,
    /// OS pid of the extractor child while one is running.
    pub process_id: Option<u32>,

    /// Resolved media title from the probe.
    pub title: Option<String>,
    pub thumbnail_url: Option<String>,
    /// Media duration in seconds.
    pub duration: Option<f64>,

    /// Absolute output path, set on completion.
    pub file_path: Option<String>,
    pub file_size: Option<i64>,
    pub filename: Option<String>,
    /// Failure detail, truncated and sanitised before storage.
    pub error_message: Option<String>,

    /// Requesting client IP.
    pub ip_address: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    /// New pending task with request parameters filled in.
    pub fn new(url: impl Into<String>, format: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            url: url.into(),
            format: format.into(),
            format_id: None,
            quality: None,
            audio_only: false,
            custom_title: None,
            embed_thumbnail: false,
            status: TaskStatus::Pending,
            progress: 0.0,
            process_id: None,
            title: None,
            thumbnail_url: None,
            duration: None,
            file_path: None,
            file_size: None,
            filename: None,
            error_message: None,
            ip_address: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

/// Partial update of a task's mutable fields.
///
/// `None` fields are left untouched. `process_id` uses a double `Option`
/// because clearing the pid after reap is a real write.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub status: Option<TaskStatus>,
    pub progress: Option<f64>,
    pub process_id: Option<Option<u32>>,
    pub title: Option<String>,
    pub thumbnail_url: Option<String>,
    pub duration: Option<f64>,
    pub file_path: Option<String>,
    pub file_size: Option<i64>,
    pub filename: Option<String>,
    pub error_message: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskPatch {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn progress(progress: f64) -> Self {
        Self {
            progress: Some(progress),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_progress(mut self, progress: f64) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_process_id(mut self, pid: Option<u32>) -> Self {
        self.process_id = Some(pid);
        self
    }

    pub fn with_error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn with_completed_at(mut self, at: DateTime<Utc>) -> Self {
        self.completed_at = Some(at);
        self
    }

    /// Apply this patch to a record in place (timestamps handled by the
    /// store). Status is applied by the caller after validation.
    pub fn apply_non_status(&self, record: &mut TaskRecord) {
        if let Some(progress) = self.progress {
            record.progress = progress;
        }
        if let Some(pid) = self.process_id {
            record.process_id = pid;
        }
        if let Some(ref title) = self.title {
            record.title = Some(title.clone());
        }
        if let Some(ref thumb) = self.thumbnail_url {
            record.thumbnail_url = Some(thumb.clone());
        }
        if let Some(duration) = self.duration {
            record.duration = Some(duration);
        }
        if let Some(ref path) = self.file_path {
            record.file_path = Some(path.clone());
        }
        if let Some(size) = self.file_size {
            record.file_size = Some(size);
        }
        if let Some(ref name) = self.filename {
            record.filename = Some(name.clone());
        }
        if let Some(ref msg) = self.error_message {
            record.error_message = Some(msg.clone());
        }
        if let Some(at) = self.completed_at {
            record.completed_at = Some(at);
        }
    }
}

/// Filter for the list read path.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    /// Capped at 200 by the store.
    pub limit: Option<u32>,
}

impl TaskFilter {
    pub const MAX_LIMIT: u32 = 200;

    pub fn effective_limit(&self) -> u32 {
        self.limit.unwrap_or(50).min(Self::MAX_LIMIT)
    }
}
