//! Request routing and endpoint handlers.

use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

use futures::StreamExt;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::header::{AUTHORIZATION, CONTENT_TYPE};
use hyper::{Method, Request, Response, StatusCode};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::JwtAuth;
use crate::body::{ApiBody, empty, file_stream, full, sse_stream};
use crate::config::HttpConfig;
use crate::cors;
use crate::error::error_response;
use crate::models::*;
use crate::sse;
use crate::validation;
use mediagrab_coordination::{CoordinationStore, keys};
use mediagrab_extract::MediaRunner;
use mediagrab_progress::ProgressTracker;
use mediagrab_queue::{Scheduler, cleanup};
use mediagrab_task_store::{TaskFilter, TaskRecord, TaskStore};
use mediagrab_types::{Priority, ServiceError, TaskStatus};

/// Shared handler state, wired once at startup.
pub struct AppState {
    pub tasks: Arc<dyn TaskStore>,
    pub coord: Arc<dyn CoordinationStore>,
    pub runner: Arc<dyn MediaRunner>,
    pub tracker: Arc<ProgressTracker>,
    pub scheduler: Arc<Scheduler>,
    pub auth: Arc<JwtAuth>,
    pub config: HttpConfig,
}

impl AppState {
    /// Top-level dispatch. Always returns a response; errors are mapped
    /// to their taxonomy status and CORS headers are applied throughout.
    pub async fn handle(
        self: &Arc<Self>,
        req: Request<Incoming>,
        peer_ip: IpAddr,
    ) -> Response<ApiBody> {
        let origin = req
            .headers()
            .get(hyper::header::ORIGIN)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut response = if req.method() == Method::OPTIONS {
            Response::builder()
                .status(StatusCode::NO_CONTENT)
                .body(empty())
                .unwrap_or_else(|_| Response::new(empty()))
        } else {
            match self.route(req, peer_ip).await {
                Ok(response) => response,
                Err(err) => {
                    if err.kind == mediagrab_types::ErrorKind::PathTraversal {
                        warn!(ip = %peer_ip, "path traversal attempt rejected");
                    }
                    error_response(&err)
                }
            }
        };

        cors::apply_cors_headers(response.headers_mut(), &self.config.cors, origin.as_deref());
        response
    }

    async fn route(
        self: &Arc<Self>,
        req: Request<Incoming>,
        peer_ip: IpAddr,
    ) -> Result<Response<ApiBody>, ServiceError> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        let client_ip = client_ip(&req, peer_ip);

        self.check_bearer(&req, &path).await?;

        match (&method, segments.as_slice()) {
            (&Method::POST, ["api", "download"]) => {
                self.require_feature(self.config.features.download)?;
                self.check_rate_limit(&client_ip).await?;
                let request: DownloadRequest = self.read_json(req).await?;
                self.create_download(request, &client_ip).await
            }
            (&Method::GET, ["api", "info"]) => {
                self.require_feature(self.config.features.video_info)?;
                self.check_rate_limit(&client_ip).await?;
                let url = query_param(&req, "url")
                    .ok_or_else(|| ServiceError::validation("INVALID_URL", "url is required"))?;
                self.video_info(&url).await
            }
            (&Method::GET, ["api", "status", id]) => {
                self.require_feature(self.config.features.status)?;
                let id = validation::validate_task_id(id)?;
                self.task_status(id).await
            }
            (&Method::GET, ["api", "progress", "tasks", id]) => {
                self.require_feature(self.config.features.progress)?;
                let id = validation::validate_task_id(id)?;
                self.rich_progress(id).await
            }
            (&Method::GET, ["api", "progress", "tasks", id, "stream"]) => {
                self.require_feature(self.config.features.progress)?;
                let id = validation::validate_task_id(id)?;
                self.progress_stream(id).await
            }
            (&Method::GET, ["api", "download", id]) => {
                self.require_feature(self.config.features.file_download)?;
                let id = validation::validate_task_id(id)?;
                self.fetch_artifact(id).await
            }
            (&Method::POST, ["api", "cancel", id]) => {
                self.require_feature(self.config.features.cancel)?;
                let id = validation::validate_task_id(id)?;
                let status = self.scheduler.cancel(id).await?;
                json_response(
                    StatusCode::OK,
                    &CancelResponse {
                        task_id: id.to_string(),
                        status,
                    },
                )
            }
            (&Method::DELETE, ["api", "task", id]) => {
                self.require_feature(self.config.features.delete)?;
                let id = validation::validate_task_id(id)?;
                self.delete_task(id).await
            }
            (&Method::GET, ["api", "tasks"]) => {
                self.require_feature(self.config.features.list_tasks)?;
                self.list_tasks(&req).await
            }
            (&Method::GET, ["api", "subtitles"]) => {
                self.require_feature(self.config.features.subtitles)?;
                let url = query_param(&req, "url")
                    .ok_or_else(|| ServiceError::validation("INVALID_URL", "url is required"))?;
                let lang = query_param(&req, "lang").unwrap_or_else(|| "en".to_string());
                self.subtitles(&url, &lang).await
            }
            (&Method::GET, ["api", "queue", "stats"]) => {
                self.require_feature(self.config.features.queue_stats)?;
                let stats = self.scheduler.stats().await;
                json_response(StatusCode::OK, &QueueStatsResponse { stats })
            }
            (&Method::POST, ["api", "auth", "issue-key"]) => {
                let request: IssueKeyRequest = self.read_json(req).await?;
                let (api_key, record, expires_at) = self
                    .auth
                    .issue_key(&request.password, &request.subject, &request.description)
                    .await?;
                json_response(
                    StatusCode::OK,
                    &IssueKeyResponse {
                        api_key,
                        key_id: record.key_id,
                        expires_at,
                    },
                )
            }
            (&Method::POST, ["api", "auth", "revoke-key"]) => {
                let request: RevokeKeyRequest = self.read_json(req).await?;
                let revoked = self
                    .auth
                    .revoke_key(&request.password, &request.key_id)
                    .await?;
                json_response(
                    StatusCode::OK,
                    &RevokeKeyResponse {
                        key_id: request.key_id,
                        revoked,
                    },
                )
            }
            (&Method::GET, ["health"]) | (&Method::GET, ["health", "live"]) => json_response(
                StatusCode::OK,
                &HealthResponse {
                    status: "ok",
                    components: Vec::new(),
                },
            ),
            (&Method::GET, ["health", "ready"]) => self.readiness().await,
            _ => Err(ServiceError::not_found("NOT_FOUND", "no such endpoint")),
        }
    }

    // === Cross-cutting checks ===

    fn require_feature(&self, enabled: bool) -> Result<(), ServiceError> {
        if enabled {
            Ok(())
        } else {
            Err(ServiceError::new(
                mediagrab_types::ErrorKind::Auth,
                "FEATURE_DISABLED",
                "this endpoint is disabled",
            ))
        }
    }

    /// When bearer auth is enabled, every `/api/*` endpoint except the
    /// auth endpoints themselves requires a valid token.
    async fn check_bearer(
        &self,
        req: &Request<Incoming>,
        path: &str,
    ) -> Result<(), ServiceError> {
        if !self.auth.enabled() || !path.starts_with("/api/") || path.starts_with("/api/auth/") {
            return Ok(());
        }

        let header = req
            .headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                ServiceError::auth("TOKEN_MISSING", "Authorization bearer token required")
            })?;
        let token = header.strip_prefix("Bearer ").ok_or_else(|| {
            ServiceError::auth("TOKEN_INVALID", "Authorization header must be a bearer token")
        })?;

        let ctx = self.auth.verify(token).await?;
        debug!(subject = %ctx.subject, "request authenticated");
        Ok(())
    }

    /// Increment-and-check against the per-IP window. Fails open when
    /// the coordination store is unreachable.
    async fn check_rate_limit(&self, client_ip: &str) -> Result<(), ServiceError> {
        let key = keys::rate_limit(client_ip);
        match self.coord.incr_with_ttl(&key, 60).await {
            Ok(count) if count > self.config.rate_limit_per_minute => {
                Err(ServiceError::rate_limited(format!(
                    "rate limit of {} requests per minute exceeded",
                    self.config.rate_limit_per_minute
                )))
            }
            Ok(_) => Ok(()),
            Err(err) => {
                warn!("rate limiter degraded (failing open): {err}");
                Ok(())
            }
        }
    }

    // === Endpoint bodies ===

    async fn create_download(
        self: &Arc<Self>,
        request: DownloadRequest,
        client_ip: &str,
    ) -> Result<Response<ApiBody>, ServiceError> {
        let url = validation::validate_url(&request.url)?;
        let container = validation::validate_format(&request.format)?;
        validation::validate_quality(request.quality.as_deref())?;
        let custom_title = validation::validate_title(request.title.as_deref())?;
        let priority = parse_priority(request.priority.as_deref())?;

        // Metadata probe is best-effort; the task proceeds without it.
        let info = match self.runner.probe(&url).await {
            Ok(info) => Some(info),
            Err(err) => {
                warn!("probe failed for new task: {err}");
                None
            }
        };

        let mut record = TaskRecord::new(url.clone(), container.as_str());
        record.format_id = request.format_id;
        record.quality = request.quality;
        record.audio_only = container.is_audio();
        record.custom_title = custom_title;
        record.embed_thumbnail = request.embed_thumbnail;
        record.ip_address = Some(client_ip.to_string());
        if let Some(ref info) = info {
            record.title = Some(info.title.clone());
            record.thumbnail_url = info.thumbnail.clone();
            record.duration = Some(info.duration);
        }
        let id = record.id;

        self.tasks
            .create(record)
            .await
            .map_err(|e| ServiceError::external(e.to_string()))?;
        self.tracker
            .init(id, &url, info.as_ref().map(|i| i.title.as_str()))
            .await;
        self.scheduler.submit(id, priority).await?;

        let queue_position = self.scheduler.queue_position(id).await;
        info!(task_id = %id, ip = %client_ip, "download task created");

        json_response(
            StatusCode::OK,
            &TaskCreatedResponse {
                task_id: id.to_string(),
                status: TaskStatus::Pending,
                queue_position,
                message: "Task created and added to queue",
            },
        )
    }

    async fn video_info(&self, url: &str) -> Result<Response<ApiBody>, ServiceError> {
        let url = validation::validate_url(url)?;
        let info = self.runner.probe(&url).await.map_err(ServiceError::from)?;
        json_response(StatusCode::OK, &VideoInfoResponse::from(info))
    }

    async fn task_status(&self, id: Uuid) -> Result<Response<ApiBody>, ServiceError> {
        let record = self.get_task(id).await?;
        let queue_position = if record.status == TaskStatus::Pending {
            self.scheduler.queue_position(id).await
        } else {
            0
        };
        json_response(
            StatusCode::OK,
            &TaskStatusResponse::from_record(&record, queue_position),
        )
    }

    async fn rich_progress(&self, id: Uuid) -> Result<Response<ApiBody>, ServiceError> {
        if let Some(snapshot) = self.tracker.get(id).await {
            let task_events = self.tracker.events(id, 100).await;
            // the durable row contributes result fields the snapshot lacks
            let record = self.tasks.get(id).await.ok().flatten();
            let mut body = serde_json::to_value(&snapshot)
                .map_err(|e| ServiceError::internal(e.to_string()))?;
            if let Some(record) = record {
                body["filename"] = json!(record.filename);
                body["file_size"] = json!(record.file_size);
                body["error_message"] = json!(record.error_message);
            }
            body["events"] = serde_json::to_value(&task_events)
                .map_err(|e| ServiceError::internal(e.to_string()))?;
            return json_value_response(StatusCode::OK, &body);
        }

        // Snapshot expired or never written: synthesise from the row.
        let record = self.get_task(id).await?;
        let body = json!({
            "task_id": record.id.to_string(),
            "url": record.url,
            "title": record.title,
            "status": record.status,
            "progress": record.progress,
            "filename": record.filename,
            "file_size": record.file_size,
            "error_message": record.error_message,
            "events": [],
        });
        json_value_response(StatusCode::OK, &body)
    }

    async fn progress_stream(&self, id: Uuid) -> Result<Response<ApiBody>, ServiceError> {
        // 404 for tasks that never existed. A terminal row whose snapshot
        // already expired gets a single terminal delta so the stream ends.
        if self.tracker.get(id).await.is_none() {
            let record = self.get_task(id).await?;
            if record.status.is_terminal() {
                let delta = mediagrab_progress::ProgressDelta {
                    status: record.status,
                    percent: record.progress,
                    speed_bps: None,
                };
                let messages = futures::stream::iter(vec![sse::format_delta(&delta)]);
                return Response::builder()
                    .status(StatusCode::OK)
                    .header(CONTENT_TYPE, "text/event-stream")
                    .header("Cache-Control", "no-cache")
                    .body(sse_stream(messages))
                    .map_err(|e| ServiceError::internal(e.to_string()));
            }
        }

        let deltas = self.tracker.subscribe(id).await;
        let messages = deltas.map(|delta| sse::format_delta(&delta));

        Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, "text/event-stream")
            .header("Cache-Control", "no-cache")
            .header("Connection", "keep-alive")
            .body(sse_stream(messages))
            .map_err(|e| ServiceError::internal(e.to_string()))
    }

    async fn fetch_artifact(&self, id: Uuid) -> Result<Response<ApiBody>, ServiceError> {
        let record = self.get_task(id).await?;
        if record.status != TaskStatus::Completed {
            return Err(ServiceError::invalid_state(format!(
                "task is {}, not completed",
                record.status
            )));
        }
        let file_path = record
            .file_path
            .as_deref()
            .ok_or_else(|| ServiceError::not_found("FILE_NOT_FOUND", "no output file recorded"))?;

        let canonical_dir = self
            .config
            .download_dir
            .canonicalize()
            .map_err(|e| ServiceError::internal(format!("download dir unavailable: {e}")))?;
        let canonical = Path::new(file_path)
            .canonicalize()
            .map_err(|_| ServiceError::not_found("FILE_NOT_FOUND", "output file is gone"))?;
        if !canonical.starts_with(&canonical_dir) {
            return Err(ServiceError::path_traversal(
                "output path escapes the download directory",
            ));
        }

        let file = tokio::fs::File::open(&canonical)
            .await
            .map_err(|_| ServiceError::not_found("FILE_NOT_FOUND", "output file is gone"))?;

        let ext = canonical
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default();
        // Header values must stay ASCII; anything else is replaced.
        let display_name: String = format!(
            "{}.{ext}",
            validation::sanitize_filename(record.title.as_deref().unwrap_or("download"))
        )
        .chars()
        .map(|c| if c.is_ascii() && !c.is_ascii_control() { c } else { '_' })
        .collect();

        let mut builder = Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, content_type_for(&ext))
            .header(
                hyper::header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{display_name}\""),
            );
        if let Some(size) = record.file_size {
            builder = builder.header(hyper::header::CONTENT_LENGTH, size);
        }
        builder
            .body(file_stream(file))
            .map_err(|e| ServiceError::internal(e.to_string()))
    }

    async fn delete_task(&self, id: Uuid) -> Result<Response<ApiBody>, ServiceError> {
        let record = self.get_task(id).await?;

        // Stop any running work first; cancel is idempotent.
        if !record.status.is_terminal() {
            let _ = self.scheduler.cancel(id).await;
        }

        if let Some(ref file_path) = record.file_path {
            if let Err(err) = cleanup::delete_guarded(Path::new(file_path), &self.config.download_dir)
            {
                return Err(if err.contains("escapes") {
                    ServiceError::path_traversal(err)
                } else {
                    ServiceError::internal(err)
                });
            }
        }
        if let Err(err) = self.tracker.cleanup(id).await {
            debug!(task_id = %id, "progress cleanup failed: {err}");
        }
        let deleted = self
            .tasks
            .delete(id)
            .await
            .map_err(|e| ServiceError::external(e.to_string()))?;

        info!(task_id = %id, "task deleted");
        json_response(
            StatusCode::OK,
            &DeleteResponse {
                task_id: id.to_string(),
                deleted,
            },
        )
    }

    async fn list_tasks(&self, req: &Request<Incoming>) -> Result<Response<ApiBody>, ServiceError> {
        let status = match query_param(req, "status") {
            Some(raw) => Some(TaskStatus::parse(&raw).ok_or_else(|| {
                ServiceError::validation("INVALID_STATUS", format!("unknown status: {raw}"))
            })?),
            None => None,
        };
        let limit = query_param(req, "limit")
            .map(|raw| {
                raw.parse::<u32>().map_err(|_| {
                    ServiceError::validation("INVALID_LIMIT", "limit must be an integer")
                })
            })
            .transpose()?;

        let records = self
            .tasks
            .list(TaskFilter { status, limit })
            .await
            .map_err(|e| ServiceError::external(e.to_string()))?;

        let mut tasks = Vec::with_capacity(records.len());
        for record in &records {
            let queue_position = if record.status == TaskStatus::Pending {
                self.scheduler.queue_position(record.id).await
            } else {
                0
            };
            tasks.push(TaskStatusResponse::from_record(record, queue_position));
        }

        let count = tasks.len();
        json_response(StatusCode::OK, &TaskListResponse { tasks, count })
    }

    async fn subtitles(&self, url: &str, lang: &str) -> Result<Response<ApiBody>, ServiceError> {
        let url = validation::validate_url(url)?;
        let lang = validation::validate_lang(lang)?;
        let subtitles = self
            .runner
            .fetch_subtitles(&url, &lang)
            .await
            .map_err(ServiceError::from)?;
        json_response(
            StatusCode::OK,
            &SubtitlesResponse {
                url,
                lang,
                subtitles,
            },
        )
    }

    async fn readiness(&self) -> Result<Response<ApiBody>, ServiceError> {
        let database = self.tasks.ping().await;
        let coordination = self.coord.ping().await;

        let components = vec![
            ComponentHealth {
                name: "database",
                healthy: database.is_ok(),
                detail: database.err().map(|e| e.to_string()),
            },
            ComponentHealth {
                name: "coordination",
                healthy: coordination.is_ok(),
                detail: coordination.err().map(|e| e.to_string()),
            },
        ];
        let all_healthy = components.iter().all(|c| c.healthy);

        let response = HealthResponse {
            status: if all_healthy { "ready" } else { "degraded" },
            components,
        };
        let status = if all_healthy {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        };
        json_response(status, &response)
    }

    // === Helpers ===

    async fn get_task(&self, id: Uuid) -> Result<TaskRecord, ServiceError> {
        self.tasks
            .get(id)
            .await
            .map_err(|e| ServiceError::external(e.to_string()))?
            .ok_or_else(|| {
                ServiceError::not_found("TASK_NOT_FOUND", format!("task {id} not found"))
            })
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        &self,
        req: Request<Incoming>,
    ) -> Result<T, ServiceError> {
        let body = req
            .into_body()
            .collect()
            .await
            .map_err(|e| ServiceError::validation("INVALID_BODY", e.to_string()))?
            .to_bytes();
        if body.len() > self.config.max_body_size {
            return Err(ServiceError::validation(
                "INVALID_BODY",
                "request body too large",
            ));
        }
        serde_json::from_slice(&body)
            .map_err(|e| ServiceError::validation("INVALID_BODY", format!("bad JSON: {e}")))
    }
}

fn parse_priority(raw: Option<&str>) -> Result<Priority, ServiceError> {
    match raw {
        None => Ok(Priority::Normal),
        Some("lowest") => Ok(Priority::Lowest),
        Some("low") => Ok(Priority::Low),
        Some("normal") => Ok(Priority::Normal),
        Some("high") => Ok(Priority::High),
        Some("critical") => Ok(Priority::Critical),
        Some(other) => Err(ServiceError::validation(
            "INVALID_PRIORITY",
            format!("unknown priority: {other}"),
        )),
    }
}

fn client_ip(req: &Request<Incoming>, peer_ip: IpAddr) -> String {
    req.headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| peer_ip.to_string())
}

fn query_param(req: &Request<Incoming>, name: &str) -> Option<String> {
    let query = req.uri().query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

fn json_response<T: serde::Serialize>(
    status: StatusCode,
    value: &T,
) -> Result<Response<ApiBody>, ServiceError> {
    let body = serde_json::to_vec(value).map_err(|e| ServiceError::internal(e.to_string()))?;
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(full(body))
        .map_err(|e| ServiceError::internal(e.to_string()))
}

fn json_value_response(
    status: StatusCode,
    value: &serde_json::Value,
) -> Result<Response<ApiBody>, ServiceError> {
    json_response(status, value)
}

fn content_type_for(ext: &str) -> &'static str {
    match ext {
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "wav" => "audio/wav",
        "flac" => "audio/flac",
        "aac" => "audio/aac",
        _ => "application/octet-stream",
    }
}
