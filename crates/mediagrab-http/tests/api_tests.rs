//! API tests over a real listener with a scripted runner.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use mediagrab_coordination::{CoordinationStore, InMemoryCoordination};
use mediagrab_extract::{
    DownloadArtifact, DownloadSpec, ExtractError, MediaInfo, MediaRunner, RunnerHooks,
};
use mediagrab_http::{AppState, AuthConfig, CorsPolicy, FeatureFlags, HttpConfig, HttpServer, JwtAuth};
use mediagrab_progress::ProgressTracker;
use mediagrab_queue::{BreakerRegistry, Scheduler, SchedulerConfig};
use mediagrab_task_store::{SqliteTaskStore, SqliteTaskStoreConfig, TaskPatch, TaskStore};
use mediagrab_types::{ProgressTick, TaskStatus};

struct StubRunner;

#[async_trait]
impl MediaRunner for StubRunner {
    async fn probe(&self, url: &str) -> Result<MediaInfo, ExtractError> {
        if url.contains("unprobable") {
            return Err(ExtractError::ProbeFailed("no extractor matched".into()));
        }
        Ok(MediaInfo {
            title: "Stub Clip: a/test".to_string(),
            thumbnail: None,
            duration: 60.0,
            view_count: 5,
            like_count: 1,
            uploader: "stub".to_string(),
            upload_date: None,
            formats: Vec::new(),
            available_qualities: vec!["720p".to_string()],
            available_audio_formats: vec!["m4a".to_string()],
        })
    }

    async fn run_download(
        &self,
        spec: &DownloadSpec,
        hooks: RunnerHooks,
    ) -> Result<DownloadArtifact, ExtractError> {
        (hooks.on_spawn)(999);
        (hooks.on_progress)(ProgressTick::percent_only(100.0));
        // the test harness pre-creates the artifact file
        let filename = format!("{}.mp4", spec.task_id);
        Ok(DownloadArtifact {
            file_path: std::env::temp_dir().join(&filename),
            file_size: 4,
            filename,
        })
    }

    async fn post_process(
        &self,
        _spec: &DownloadSpec,
        _artifact: &DownloadArtifact,
        _hooks: RunnerHooks,
    ) {
    }

    async fn cancel(&self, _task_id: Uuid) -> Result<bool, ExtractError> {
        Ok(false)
    }

    async fn fetch_subtitles(
        &self,
        _url: &str,
        lang: &str,
    ) -> Result<Option<String>, ExtractError> {
        Ok(Some(format!("1\n00:00:00,000 --> 00:00:01,000\n[{lang}]")))
    }
}

struct TestApi {
    base: String,
    client: reqwest::Client,
    state: Arc<AppState>,
    shutdown: CancellationToken,
    dir: tempfile::TempDir,
}

impl Drop for TestApi {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn start_api(configure: impl FnOnce(&mut HttpConfig)) -> TestApi {
    let dir = tempfile::tempdir().expect("tempdir");
    let tasks: Arc<dyn TaskStore> = Arc::new(
        SqliteTaskStore::with_config(SqliteTaskStoreConfig {
            database_path: ":memory:".into(),
            ..Default::default()
        })
        .await
        .expect("store"),
    );
    let coord: Arc<dyn CoordinationStore> = Arc::new(InMemoryCoordination::new());
    let runner: Arc<dyn MediaRunner> = Arc::new(StubRunner);
    let tracker = Arc::new(ProgressTracker::new(Arc::clone(&coord)));

    let scheduler = Scheduler::new(
        Arc::clone(&tasks),
        Arc::clone(&coord),
        Arc::clone(&runner),
        Arc::clone(&tracker),
        Arc::new(BreakerRegistry::new()),
        SchedulerConfig {
            max_concurrent: 3,
            tick_interval: Duration::from_millis(20),
            download_dir: dir.path().to_path_buf(),
            ..Default::default()
        },
    );
    // Scheduler loops are not started: these tests drive the HTTP layer
    // and inspect queue state directly.

    let mut config = HttpConfig {
        cors: CorsPolicy::Any,
        download_dir: dir.path().to_path_buf(),
        rate_limit_per_minute: 3,
        ..Default::default()
    };
    configure(&mut config);

    let auth = Arc::new(JwtAuth::new(config.auth.clone(), Arc::clone(&coord)));
    let state = Arc::new(AppState {
        tasks,
        coord,
        runner,
        tracker,
        scheduler,
        auth,
        config,
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    let shutdown = CancellationToken::new();
    let server = HttpServer::new(Arc::clone(&state));
    let server_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let _ = server.run_with_listener(listener, server_shutdown).await;
    });

    TestApi {
        base: format!("http://{addr}"),
        client: reqwest::Client::new(),
        state,
        shutdown,
        dir,
    }
}

#[tokio::test]
async fn create_download_returns_task_id_and_queue_position() {
    let api = start_api(|_| {}).await;

    let response = api
        .client
        .post(format!("{}/api/download", api.base))
        .json(&json!({"url": "https://example.test/v/abc", "format": "mp4", "quality": "720p"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    let task_id = body["task_id"].as_str().unwrap();
    assert_eq!(task_id.len(), 36);
    assert_eq!(body["status"], "pending");
    assert_eq!(body["queue_position"], 1);

    // status endpoint sees the same task with probe metadata applied
    let status: Value = api
        .client
        .get(format!("{}/api/status/{task_id}", api.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["status"], "pending");
    assert_eq!(status["title"], "Stub Clip: a/test");
}

#[tokio::test]
async fn invalid_url_is_rejected_without_creating_a_task() {
    let api = start_api(|_| {}).await;

    let response = api
        .client
        .post(format!("{}/api/download", api.base))
        .json(&json!({"url": "not a url"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error_code"], "INVALID_URL");

    let list: Value = api
        .client
        .get(format!("{}/api/tasks", api.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list["count"], 0);
}

#[tokio::test]
async fn rate_limit_rejects_fourth_request_in_window() {
    let api = start_api(|_| {}).await;

    for _ in 0..3 {
        let response = api
            .client
            .get(format!("{}/api/info?url=https://example.test/v/x", api.base))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }

    let response = api
        .client
        .get(format!("{}/api/info?url=https://example.test/v/x", api.base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 429);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error_code"], "RATE_LIMIT_EXCEEDED");
}

#[tokio::test]
async fn status_of_unknown_task_is_404() {
    let api = start_api(|_| {}).await;

    let response = api
        .client
        .get(format!("{}/api/status/{}", api.base, Uuid::new_v4()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error_code"], "TASK_NOT_FOUND");

    let response = api
        .client
        .get(format!("{}/api/status/not-a-uuid", api.base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn file_download_requires_completed_status() {
    let api = start_api(|_| {}).await;

    let record = mediagrab_task_store::TaskRecord::new("https://example.test/v/abc", "mp4");
    let id = record.id;
    api.state.tasks.create(record).await.unwrap();

    let response = api
        .client
        .get(format!("{}/api/download/{id}", api.base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error_code"], "INVALID_STATE");
}

#[tokio::test]
async fn completed_file_streams_with_sanitised_filename() {
    let api = start_api(|_| {}).await;

    let file = api.dir.path().join("artifact.mp4");
    std::fs::write(&file, b"data").unwrap();

    let mut record = mediagrab_task_store::TaskRecord::new("https://example.test/v/abc", "mp4");
    record.title = Some("My/Clip: Test".to_string());
    let id = record.id;
    api.state.tasks.create(record).await.unwrap();
    api.state
        .tasks
        .update(
            id,
            TaskPatch {
                status: Some(TaskStatus::Downloading),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    api.state
        .tasks
        .update(
            id,
            TaskPatch {
                status: Some(TaskStatus::Completed),
                progress: Some(100.0),
                file_path: Some(file.to_string_lossy().into_owned()),
                file_size: Some(4),
                filename: Some("artifact.mp4".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let response = api
        .client
        .get(format!("{}/api/download/{id}", api.base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let disposition = response
        .headers()
        .get("content-disposition")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.contains("My_Clip_ Test.mp4"), "{disposition}");
    assert_eq!(response.bytes().await.unwrap().as_ref(), b"data");
}

#[tokio::test]
async fn file_outside_download_dir_is_forbidden() {
    let api = start_api(|_| {}).await;

    let outside = tempfile::NamedTempFile::new().unwrap();
    let mut record = mediagrab_task_store::TaskRecord::new("https://example.test/v/abc", "mp4");
    let id = record.id;
    record.status = TaskStatus::Pending;
    api.state.tasks.create(record).await.unwrap();
    api.state
        .tasks
        .update(id, TaskPatch::status(TaskStatus::Downloading))
        .await
        .unwrap();
    api.state
        .tasks
        .update(
            id,
            TaskPatch {
                status: Some(TaskStatus::Completed),
                progress: Some(100.0),
                file_path: Some(outside.path().to_string_lossy().into_owned()),
                file_size: Some(1),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let response = api
        .client
        .get(format!("{}/api/download/{id}", api.base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error_code"], "PATH_TRAVERSAL");
}

#[tokio::test]
async fn disabled_feature_returns_403() {
    let api = start_api(|config| {
        config.features = FeatureFlags {
            subtitles: false,
            ..Default::default()
        };
    })
    .await;

    let response = api
        .client
        .get(format!(
            "{}/api/subtitles?url=https://example.test/v/abc&lang=en",
            api.base
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error_code"], "FEATURE_DISABLED");
}

#[tokio::test]
async fn subtitles_endpoint_returns_text() {
    let api = start_api(|_| {}).await;

    let body: Value = api
        .client
        .get(format!(
            "{}/api/subtitles?url=https://example.test/v/abc&lang=en",
            api.base
        ))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["lang"], "en");
    assert!(body["subtitles"].as_str().unwrap().contains("[en]"));
}

#[tokio::test]
async fn queue_stats_reports_counters() {
    let api = start_api(|_| {}).await;

    api.client
        .post(format!("{}/api/download", api.base))
        .json(&json!({"url": "https://example.test/v/abc"}))
        .send()
        .await
        .unwrap();

    let stats: Value = api
        .client
        .get(format!("{}/api/queue/stats", api.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["enqueued"], 1);
    assert_eq!(stats["queued"], 1);
    assert_eq!(stats["max_workers"], 3);
}

#[tokio::test]
async fn auth_gates_api_when_enabled() {
    let api = start_api(|config| {
        config.auth = AuthConfig {
            enabled: true,
            secret: "s3cret".to_string(),
            algorithm: "HS256".to_string(),
            expiration_days: 30,
            issue_password: Some("issue-me".to_string()),
        };
    })
    .await;

    // unauthenticated request rejected
    let response = api
        .client
        .get(format!("{}/api/tasks", api.base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    // issue a key (auth endpoints stay open) and retry
    let issued: Value = api
        .client
        .post(format!("{}/api/auth/issue-key", api.base))
        .json(&json!({"password": "issue-me", "subject": "tester"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let token = issued["api_key"].as_str().unwrap();

    let response = api
        .client
        .get(format!("{}/api/tasks", api.base))
        .bearer_auth(token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    // revoke and the token stops working
    let key_id = issued["key_id"].as_str().unwrap();
    api.client
        .post(format!("{}/api/auth/revoke-key", api.base))
        .json(&json!({"password": "issue-me", "key_id": key_id}))
        .send()
        .await
        .unwrap();

    let response = api
        .client
        .get(format!("{}/api/tasks", api.base))
        .bearer_auth(token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn health_endpoints_answer() {
    let api = start_api(|_| {}).await;

    let response = api
        .client
        .get(format!("{}/health", api.base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let ready: Value = api
        .client
        .get(format!("{}/health/ready", api.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(ready["status"], "ready");
    assert_eq!(ready["components"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn cancel_of_pending_task_via_api() {
    let api = start_api(|_| {}).await;

    let created: Value = api
        .client
        .post(format!("{}/api/download", api.base))
        .json(&json!({"url": "https://example.test/v/abc"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let task_id = created["task_id"].as_str().unwrap();

    let cancelled: Value = api
        .client
        .post(format!("{}/api/cancel/{task_id}", api.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(cancelled["status"], "cancelled");

    // cancel is idempotent on terminal tasks
    let again: Value = api
        .client
        .post(format!("{}/api/cancel/{task_id}", api.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(again["status"], "cancelled");
}

#[tokio::test]
async fn rich_progress_falls_back_to_task_row() {
    let api = start_api(|_| {}).await;

    // row without a progress snapshot
    let record = mediagrab_task_store::TaskRecord::new("https://example.test/v/abc", "mp4");
    let id = record.id;
    api.state.tasks.create(record).await.unwrap();

    let body: Value = api
        .client
        .get(format!("{}/api/progress/tasks/{id}", api.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["task_id"], id.to_string());
    assert_eq!(body["status"], "pending");
    assert_eq!(body["events"].as_array().unwrap().len(), 0);
}
