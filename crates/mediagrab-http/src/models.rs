//! Wire request/response shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mediagrab_extract::{MediaFormat, MediaInfo};
use mediagrab_queue::QueueStats;
use mediagrab_task_store::TaskRecord;
use mediagrab_types::TaskStatus;

#[derive(Debug, Deserialize)]
pub struct DownloadRequest {
    pub url: String,
    #[serde(default = "default_format")]
    pub format: String,
    pub format_id: Option<String>,
    pub quality: Option<String>,
    /// Cosmetic title applied to audio outputs.
    pub title: Option<String>,
    #[serde(default)]
    pub embed_thumbnail: bool,
    pub priority: Option<String>,
}

fn default_format() -> String {
    "mp4".to_string()
}

#[derive(Debug, Serialize)]
pub struct TaskCreatedResponse {
    pub task_id: String,
    pub status: TaskStatus,
    pub queue_position: u64,
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct TaskStatusResponse {
    pub task_id: String,
    pub status: TaskStatus,
    pub progress: f64,
    pub queue_position: u64,
    pub title: Option<String>,
    pub filename: Option<String>,
    pub file_size: Option<i64>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskStatusResponse {
    pub fn from_record(record: &TaskRecord, queue_position: u64) -> Self {
        Self {
            task_id: record.id.to_string(),
            status: record.status,
            progress: record.progress,
            queue_position,
            title: record.title.clone(),
            filename: record.filename.clone(),
            file_size: record.file_size,
            error_message: record.error_message.clone(),
            created_at: record.created_at,
            updated_at: record.updated_at,
            completed_at: record.completed_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct VideoInfoResponse {
    pub title: String,
    pub thumbnail: Option<String>,
    pub duration: f64,
    pub view_count: u64,
    pub like_count: u64,
    pub uploader: String,
    pub upload_date: Option<String>,
    pub formats: Vec<MediaFormat>,
    pub available_qualities: Vec<String>,
    pub available_audio_formats: Vec<String>,
}

impl From<MediaInfo> for VideoInfoResponse {
    fn from(info: MediaInfo) -> Self {
        Self {
            title: info.title,
            thumbnail: info.thumbnail,
            duration: info.duration,
            view_count: info.view_count,
            like_count: info.like_count,
            uploader: info.uploader,
            upload_date: info.upload_date,
            formats: info.formats,
            available_qualities: info.available_qualities,
            available_audio_formats: info.available_audio_formats,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub task_id: String,
    pub status: TaskStatus,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub task_id: String,
    pub deleted: bool,
}

#[derive(Debug, Serialize)]
pub struct TaskListResponse {
    pub tasks: Vec<TaskStatusResponse>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct SubtitlesResponse {
    pub url: String,
    pub lang: String,
    pub subtitles: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct QueueStatsResponse {
    #[serde(flatten)]
    pub stats: QueueStats,
}

#[derive(Debug, Deserialize)]
pub struct IssueKeyRequest {
    pub password: String,
    pub subject: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Serialize)]
pub struct IssueKeyResponse {
    pub api_key: String,
    pub key_id: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct RevokeKeyRequest {
    pub password: String,
    pub key_id: String,
}

#[derive(Debug, Serialize)]
pub struct RevokeKeyResponse {
    pub key_id: String,
    pub revoked: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub components: Vec<ComponentHealth>,
}

#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    pub name: &'static str,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}
