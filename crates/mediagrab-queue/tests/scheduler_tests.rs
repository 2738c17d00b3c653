//! End-to-end scheduler tests against a scripted runner.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use mediagrab_coordination::{CoordinationStore, InMemoryCoordination};
use mediagrab_extract::{
    DownloadArtifact, DownloadSpec, ExtractError, MediaInfo, MediaRunner, RunnerHooks,
};
use mediagrab_progress::{ProgressEventKind, ProgressTracker};
use mediagrab_queue::{BreakerRegistry, Scheduler, SchedulerConfig};
use mediagrab_task_store::{SqliteTaskStore, SqliteTaskStoreConfig, TaskRecord, TaskStore};
use mediagrab_types::{Priority, ProgressTick, TaskStatus};

#[derive(Clone, Copy, PartialEq)]
enum FakeStep {
    Success,
    TransientFailure,
    PermanentFailure,
    /// Block until cancelled or released.
    Hold,
}

struct FakeRunner {
    download_dir: std::path::PathBuf,
    script: Mutex<HashMap<Uuid, Vec<FakeStep>>>,
    cancelled: Mutex<Vec<Uuid>>,
    released: tokio::sync::Notify,
    release_flag: Mutex<bool>,
}

impl FakeRunner {
    fn new(download_dir: std::path::PathBuf) -> Self {
        Self {
            download_dir,
            script: Mutex::new(HashMap::new()),
            cancelled: Mutex::new(Vec::new()),
            released: tokio::sync::Notify::new(),
            release_flag: Mutex::new(false),
        }
    }

    fn script_for(&self, task_id: Uuid, steps: Vec<FakeStep>) {
        self.script.lock().insert(task_id, steps);
    }

    fn release_holds(&self) {
        *self.release_flag.lock() = true;
        self.released.notify_waiters();
    }

    fn next_step(&self, task_id: Uuid) -> FakeStep {
        let mut script = self.script.lock();
        match script.get_mut(&task_id) {
            Some(steps) if !steps.is_empty() => steps.remove(0),
            _ => FakeStep::Success,
        }
    }

    fn make_artifact(&self, task_id: Uuid) -> DownloadArtifact {
        let filename = format!("{task_id}.mp4");
        let path = self.download_dir.join(&filename);
        std::fs::write(&path, b"media payload").expect("write fake artifact");
        DownloadArtifact {
            file_size: 13,
            file_path: path,
            filename,
        }
    }
}

#[async_trait]
impl MediaRunner for FakeRunner {
    async fn probe(&self, _url: &str) -> Result<MediaInfo, ExtractError> {
        unimplemented!("not used by the scheduler")
    }

    async fn run_download(
        &self,
        spec: &DownloadSpec,
        hooks: RunnerHooks,
    ) -> Result<DownloadArtifact, ExtractError> {
        (hooks.on_spawn)(4242);
        (hooks.on_progress)(ProgressTick::percent_only(25.0));

        match self.next_step(spec.task_id) {
            FakeStep::Success => {
                (hooks.on_progress)(ProgressTick::percent_only(100.0));
                Ok(self.make_artifact(spec.task_id))
            }
            FakeStep::TransientFailure => Err(ExtractError::Timeout(1)),
            FakeStep::PermanentFailure => {
                Err(ExtractError::OutputMissing)
            }
            FakeStep::Hold => loop {
                if self.cancelled.lock().contains(&spec.task_id) {
                    return Err(ExtractError::Cancelled);
                }
                if *self.release_flag.lock() {
                    (hooks.on_progress)(ProgressTick::percent_only(100.0));
                    return Ok(self.make_artifact(spec.task_id));
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            },
        }
    }

    async fn post_process(
        &self,
        _spec: &DownloadSpec,
        _artifact: &DownloadArtifact,
        _hooks: RunnerHooks,
    ) {
    }

    async fn cancel(&self, task_id: Uuid) -> Result<bool, ExtractError> {
        self.cancelled.lock().push(task_id);
        Ok(true)
    }

    async fn fetch_subtitles(
        &self,
        _url: &str,
        _lang: &str,
    ) -> Result<Option<String>, ExtractError> {
        Ok(None)
    }
}

struct Harness {
    tasks: Arc<dyn TaskStore>,
    coord: Arc<dyn CoordinationStore>,
    runner: Arc<FakeRunner>,
    tracker: Arc<ProgressTracker>,
    scheduler: Arc<Scheduler>,
    _dir: tempfile::TempDir,
}

async fn harness(max_concurrent: usize) -> Harness {
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
    let runner = Arc::new(FakeRunner::new(dir.path().to_path_buf()));
    let tracker = Arc::new(ProgressTracker::new(Arc::clone(&coord)));
    let breakers = Arc::new(BreakerRegistry::new());

    let runner_dyn: Arc<dyn MediaRunner> = runner.clone();
    let scheduler = Scheduler::new(
        Arc::clone(&tasks),
        Arc::clone(&coord),
        runner_dyn,
        Arc::clone(&tracker),
        breakers,
        SchedulerConfig {
            max_concurrent,
            tick_interval: Duration::from_millis(20),
            liveness_interval: Duration::from_millis(50),
            heartbeat_timeout: Duration::from_secs(30),
            queue_depth_alert: 50,
            download_dir: dir.path().to_path_buf(),
        },
    );
    tokio::spawn(Arc::clone(&scheduler).run());
    tokio::spawn(Arc::clone(&scheduler).run_liveness());

    Harness {
        tasks,
        coord,
        runner,
        tracker,
        scheduler,
        _dir: dir,
    }
}

async fn create_task(h: &Harness) -> Uuid {
    let record = TaskRecord::new("https://example.test/v/abc", "mp4");
    let id = record.id;
    h.tasks.create(record).await.expect("create");
    h.tracker.init(id, "https://example.test/v/abc", None).await;
    h.scheduler.submit(id, Priority::Normal).await.expect("submit");
    id
}

async fn wait_for_status(h: &Harness, id: Uuid, expected: TaskStatus) -> TaskRecord {
    for _ in 0..200 {
        let record = h.tasks.get(id).await.expect("get").expect("row");
        if record.status == expected {
            return record;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {id} never reached {expected}");
}

#[tokio::test]
async fn task_runs_to_completion() {
    let h = harness(3).await;
    let id = create_task(&h).await;

    let record = wait_for_status(&h, id, TaskStatus::Completed).await;
    assert_eq!(record.progress, 100.0);
    assert!(record.file_path.is_some());
    assert_eq!(record.file_size, Some(13));
    assert!(record.completed_at.is_some());

    // slot released and active set drained
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.coord.active_count().await.unwrap(), 0);

    let stats = h.scheduler.stats().await;
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.enqueued, 1);
}

#[tokio::test]
async fn concurrency_cap_holds_fourth_task_in_queue() {
    let h = harness(3).await;

    let mut held = Vec::new();
    for _ in 0..3 {
        let record = TaskRecord::new("https://example.test/v/held", "mp4");
        h.runner.script_for(record.id, vec![FakeStep::Hold]);
        let id = record.id;
        h.tasks.create(record).await.unwrap();
        h.scheduler.submit(id, Priority::Normal).await.unwrap();
        held.push(id);
    }

    for id in &held {
        wait_for_status(&h, *id, TaskStatus::Downloading).await;
    }
    assert_eq!(h.coord.active_count().await.unwrap(), 3);

    // fourth task queues behind the cap
    let fourth = create_task(&h).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    let record = h.tasks.get(fourth).await.unwrap().unwrap();
    assert_eq!(record.status, TaskStatus::Pending);
    assert!(h.scheduler.queue_position(fourth).await >= 1);
    assert!(h.coord.active_count().await.unwrap() <= 3);

    // releasing the held downloads frees slots; the fourth completes
    h.runner.release_holds();
    wait_for_status(&h, fourth, TaskStatus::Completed).await;
    assert_eq!(h.scheduler.queue_position(fourth).await, 0);
}

#[tokio::test]
async fn transient_failure_retries_then_completes() {
    let h = harness(1).await;

    let record = TaskRecord::new("https://example.test/v/flaky", "mp4");
    let id = record.id;
    h.runner
        .script_for(id, vec![FakeStep::TransientFailure, FakeStep::Success]);
    h.tasks.create(record).await.unwrap();
    h.tracker.init(id, "https://example.test/v/flaky", None).await;
    h.scheduler.submit(id, Priority::Normal).await.unwrap();

    wait_for_status(&h, id, TaskStatus::Completed).await;

    let events = h.tracker.events(id, 100).await;
    assert!(
        events
            .iter()
            .any(|e| e.event == ProgressEventKind::Retry),
        "expected a retry event"
    );
    let stats = h.scheduler.stats().await;
    assert_eq!(stats.retried, 1);
    assert_eq!(stats.completed, 1);
}

#[tokio::test]
async fn transient_failures_exhaust_attempts_to_failed() {
    let h = harness(1).await;

    let record = TaskRecord::new("https://example.test/v/down", "mp4");
    let id = record.id;
    h.runner.script_for(
        id,
        vec![
            FakeStep::TransientFailure,
            FakeStep::TransientFailure,
            FakeStep::TransientFailure,
        ],
    );
    h.tasks.create(record).await.unwrap();
    h.scheduler.submit(id, Priority::Normal).await.unwrap();

    let record = wait_for_status(&h, id, TaskStatus::Failed).await;
    assert!(record.error_message.is_some());

    let stats = h.scheduler.stats().await;
    assert_eq!(stats.retried, 2);
    assert_eq!(stats.failed, 1);
}

#[tokio::test]
async fn permanent_failure_does_not_retry() {
    let h = harness(1).await;

    let record = TaskRecord::new("https://example.test/v/bad", "mp4");
    let id = record.id;
    h.runner.script_for(id, vec![FakeStep::PermanentFailure]);
    h.tasks.create(record).await.unwrap();
    h.scheduler.submit(id, Priority::Normal).await.unwrap();

    let record = wait_for_status(&h, id, TaskStatus::Failed).await;
    assert!(
        record
            .error_message
            .as_deref()
            .unwrap()
            .contains("no output file")
    );
    let stats = h.scheduler.stats().await;
    assert_eq!(stats.retried, 0);
}

#[tokio::test]
async fn cancel_pending_task_removes_it_from_queue() {
    let h = harness(3).await;

    // hold all three slots so a fourth stays queued
    let mut held = Vec::new();
    for _ in 0..3 {
        let record = TaskRecord::new("https://example.test/v/held", "mp4");
        h.runner.script_for(record.id, vec![FakeStep::Hold]);
        let id = record.id;
        h.tasks.create(record).await.unwrap();
        h.scheduler.submit(id, Priority::Normal).await.unwrap();
        held.push(id);
    }
    for id in &held {
        wait_for_status(&h, *id, TaskStatus::Downloading).await;
    }

    let pending = create_task(&h).await;
    assert!(h.scheduler.queue_position(pending).await >= 1);

    let status = h.scheduler.cancel(pending).await.unwrap();
    assert_eq!(status, TaskStatus::Cancelled);
    assert_eq!(h.scheduler.queue_position(pending).await, 0);
    let record = h.tasks.get(pending).await.unwrap().unwrap();
    assert_eq!(record.status, TaskStatus::Cancelled);

    h.runner.release_holds();
}

#[tokio::test]
async fn cancel_downloading_task_terminates_child() {
    let h = harness(1).await;

    let record = TaskRecord::new("https://example.test/v/long", "mp4");
    let id = record.id;
    h.runner.script_for(id, vec![FakeStep::Hold]);
    h.tasks.create(record).await.unwrap();
    h.tracker.init(id, "https://example.test/v/long", None).await;
    h.scheduler.submit(id, Priority::Normal).await.unwrap();

    wait_for_status(&h, id, TaskStatus::Downloading).await;
    let status = h.scheduler.cancel(id).await.unwrap();
    assert_eq!(status, TaskStatus::Cancelled);

    let record = wait_for_status(&h, id, TaskStatus::Cancelled).await;
    assert!(record.status.is_terminal());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.coord.active_count().await.unwrap(), 0);
}

#[tokio::test]
async fn cancel_terminal_task_is_idempotent() {
    let h = harness(1).await;
    let id = create_task(&h).await;
    wait_for_status(&h, id, TaskStatus::Completed).await;

    let status = h.scheduler.cancel(id).await.unwrap();
    assert_eq!(status, TaskStatus::Completed);
}

#[tokio::test]
async fn startup_recovery_requeues_inflight_rows() {
    let h = harness(1).await;

    // a row stranded in downloading from a previous run
    let record = TaskRecord::new("https://example.test/v/stranded", "mp4");
    let id = record.id;
    h.tasks.create(record).await.unwrap();
    h.tasks
        .update(
            id,
            mediagrab_task_store::TaskPatch::status(TaskStatus::Downloading),
        )
        .await
        .unwrap();

    let recovered = h.scheduler.recover_on_startup().await.unwrap();
    assert_eq!(recovered, 1);

    wait_for_status(&h, id, TaskStatus::Completed).await;
}
