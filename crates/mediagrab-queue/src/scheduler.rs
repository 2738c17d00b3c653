//! The supervisory scheduling loop and per-slot task drivers.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Notify, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::breaker::{BreakerRegistry, names};
use crate::job::Job;
use crate::queue::JobQueue;
use crate::stats::{self, QueueStats, counters};
use crate::supervisor::WorkerSupervisor;
use mediagrab_coordination::CoordinationStore;
use mediagrab_extract::{Container, DownloadSpec, MediaRunner, QualityHint, RunnerHooks};
use mediagrab_progress::ProgressTracker;
use mediagrab_task_store::{TaskPatch, TaskRecord, TaskStore};
use mediagrab_types::{
    ErrorKind, Priority, ProgressTick, ServiceError, TaskOutcome, TaskStatus,
};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Global concurrency cap across all priority tiers.
    pub max_concurrent: usize,
    /// Maximum wait between scheduling passes.
    pub tick_interval: Duration,
    /// Cadence of the stale-worker check.
    pub liveness_interval: Duration,
    /// Heartbeat age after which an occupied slot counts as dead.
    pub heartbeat_timeout: Duration,
    /// Queue depth that triggers the operator alert.
    pub queue_depth_alert: u64,
    /// Sanitised out of task error messages.
    pub download_dir: std::path::PathBuf,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            tick_interval: Duration::from_secs(1),
            liveness_interval: Duration::from_secs(10),
            heartbeat_timeout: Duration::from_secs(30),
            queue_depth_alert: 50,
            download_dir: std::path::PathBuf::from("downloads"),
        }
    }
}

/// Events flowing from a running attempt back into the slot driver.
enum WorkerEvent {
    Spawned(u32),
    Tick(ProgressTick),
}

pub struct Scheduler {
    tasks: Arc<dyn TaskStore>,
    coord: Arc<dyn CoordinationStore>,
    queue: Arc<JobQueue>,
    runner: Arc<dyn MediaRunner>,
    tracker: Arc<ProgressTracker>,
    breakers: Arc<BreakerRegistry>,
    supervisor: Arc<WorkerSupervisor>,
    config: SchedulerConfig,
    job_available: Notify,
    slot_free: Notify,
    shutdown: CancellationToken,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        coord: Arc<dyn CoordinationStore>,
        runner: Arc<dyn MediaRunner>,
        tracker: Arc<ProgressTracker>,
        breakers: Arc<BreakerRegistry>,
        config: SchedulerConfig,
    ) -> Arc<Self> {
        let queue = Arc::new(JobQueue::new(Arc::clone(&coord)));
        let supervisor = Arc::new(WorkerSupervisor::new(
            config.max_concurrent,
            config.heartbeat_timeout,
        ));
        Arc::new(Self {
            tasks,
            coord,
            queue,
            runner,
            tracker,
            breakers,
            supervisor,
            config,
            job_available: Notify::new(),
            slot_free: Notify::new(),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Enqueue a job for a freshly created task.
    pub async fn submit(&self, task_id: Uuid, priority: Priority) -> Result<(), ServiceError> {
        self.queue.enqueue(Job::new(task_id, priority)).await?;
        stats::bump(&self.coord, counters::ENQUEUED).await;
        self.job_available.notify_one();
        Ok(())
    }

    /// Queue position for status responses: 0 when active or terminal.
    pub async fn queue_position(&self, task_id: Uuid) -> u64 {
        self.queue.position(task_id).await
    }

    pub async fn stats(&self) -> QueueStats {
        stats::collect(&self.coord, self.config.max_concurrent as u64).await
    }

    /// Cancel a task per the cancellation rule: synchronous for pending
    /// and downloading, an idempotent no-op for terminal states, not
    /// propagated while processing.
    pub async fn cancel(&self, task_id: Uuid) -> Result<TaskStatus, ServiceError> {
        let record = self
            .tasks
            .get(task_id)
            .await
            .map_err(|e| ServiceError::external(e.to_string()))?
            .ok_or_else(|| {
                ServiceError::not_found("TASK_NOT_FOUND", format!("task {task_id} not found"))
            })?;

        match record.status {
            status if status.is_terminal() => Ok(status),
            TaskStatus::Processing => {
                // The post step is short and atomic; let it finish.
                debug!(task_id = %task_id, "cancel ignored during post-processing");
                Ok(TaskStatus::Processing)
            }
            TaskStatus::Pending => {
                self.queue.remove_task(task_id).await?;
                self.finalize_cancelled(task_id).await;
                Ok(TaskStatus::Cancelled)
            }
            TaskStatus::Downloading => {
                let had_child = self
                    .runner
                    .cancel(task_id)
                    .await
                    .map_err(|e| ServiceError::external(e.to_string()))?;
                if !had_child {
                    // Claimed but not yet spawned (or just reaped): the
                    // slot driver can no longer finalize this one.
                    self.finalize_cancelled(task_id).await;
                }
                Ok(TaskStatus::Cancelled)
            }
            other => Ok(other),
        }
    }

    async fn finalize_cancelled(&self, task_id: Uuid) {
        let patch = TaskPatch::status(TaskStatus::Cancelled)
            .with_process_id(None)
            .with_completed_at(Utc::now());
        if let Err(err) = self.tasks.update(task_id, patch).await {
            warn!(task_id = %task_id, "cancel finalize failed: {err}");
        }
        if let Err(err) = self.coord.active_remove(&task_id.to_string()).await {
            debug!(task_id = %task_id, "active-set release failed: {err}");
        }
        self.tracker.finalize(task_id, &TaskOutcome::Cancelled).await;
        stats::bump(&self.coord, counters::CANCELLED).await;
    }

    /// Reset rows stranded by an unclean shutdown and re-enqueue them.
    pub async fn recover_on_startup(&self) -> Result<usize, ServiceError> {
        let ids = self
            .tasks
            .reset_inflight()
            .await
            .map_err(|e| ServiceError::external(e.to_string()))?;
        for id in &ids {
            let _ = self.coord.active_remove(&id.to_string()).await;
            self.queue.enqueue(Job::new(*id, Priority::Normal)).await?;
        }
        if !ids.is_empty() {
            self.job_available.notify_one();
        }
        Ok(ids.len())
    }

    /// The supervisory loop. Suspends on "job available", "slot free" or
    /// the tick timer, whichever fires first.
    pub async fn run(self: Arc<Self>) {
        info!(
            max_concurrent = self.config.max_concurrent,
            "scheduler started"
        );
        let mut depth_alerted = false;

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let depth = self.queue.len().await;
            if depth > self.config.queue_depth_alert {
                if !depth_alerted {
                    warn!(depth, "queue depth above alert threshold");
                    depth_alerted = true;
                }
            } else {
                depth_alerted = false;
            }

            let dispatched = self.try_dispatch().await;
            if !dispatched {
                tokio::select! {
                    _ = self.job_available.notified() => {}
                    _ = self.slot_free.notified() => {}
                    _ = tokio::time::sleep(self.config.tick_interval) => {}
                    _ = self.shutdown.cancelled() => break,
                }
            }
        }
        info!("scheduler stopped");
    }

    /// Try to move one job from the queue into a slot. Returns whether a
    /// dispatch happened (the loop immediately tries again when it did).
    async fn try_dispatch(self: &Arc<Self>) -> bool {
        // The active set is authoritative for the global cap; the local
        // busy count covers coordination-store outages.
        let active = match self.coord.active_count().await {
            Ok(count) => count as usize,
            Err(_) => self.supervisor.busy_count(),
        };
        if active >= self.config.max_concurrent {
            return false;
        }
        let Some(slot) = self.supervisor.try_acquire() else {
            return false;
        };

        let job = match self.queue.dequeue().await {
            Ok(Some(job)) => job,
            Ok(None) => return false,
            Err(err) => {
                debug!("dequeue failed: {err}");
                return false;
            }
        };
        let task_id = job.task_id;

        // Claim the concurrency slot in the active set.
        match self.coord.active_add(&task_id.to_string()).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(task_id = %task_id, "task already active, dropping duplicate job");
                return true;
            }
            Err(err) => {
                warn!(task_id = %task_id, "claim failed ({err}), requeueing");
                self.breakers
                    .get_or_create(names::COORDINATION)
                    .record_failure();
                let _ = self.queue.enqueue(job).await;
                return false;
            }
        }
        self.breakers
            .get_or_create(names::COORDINATION)
            .record_success();

        // Flip pending -> downloading. A task cancelled in the meantime
        // comes back terminal and the claim is rolled back.
        let record = match self
            .tasks
            .update(task_id, TaskPatch::status(TaskStatus::Downloading))
            .await
        {
            Ok(record) if record.status == TaskStatus::Downloading => record,
            Ok(record) => {
                debug!(task_id = %task_id, status = %record.status,
                       "claim lost against terminal state");
                let _ = self.coord.active_remove(&task_id.to_string()).await;
                return true;
            }
            Err(err) => {
                warn!(task_id = %task_id, "claim status flip failed: {err}");
                let _ = self.coord.active_remove(&task_id.to_string()).await;
                let _ = self.queue.enqueue(job).await;
                return false;
            }
        };

        // Hold the slot before the driver can possibly release it.
        let (ready_tx, ready_rx) = oneshot::channel();
        let scheduler = Arc::clone(self);
        let driver_job = job.clone();
        let handle = tokio::spawn(async move {
            let _ = ready_rx.await;
            scheduler.drive_task(slot, driver_job, record).await;
        });
        self.supervisor
            .occupy(slot, task_id, job, handle.abort_handle());
        let _ = ready_tx.send(());
        true
    }

    /// Drive one claimed task through download, optional post step and
    /// finalization. Owns exactly one concurrency slot.
    async fn drive_task(self: Arc<Self>, slot: usize, job: Job, record: TaskRecord) {
        let task_id = job.task_id;
        let result = self.execute_attempt(&job, &record).await;

        match result {
            Ok(()) => {}
            Err(err) => self.handle_failure(&job, err).await,
        }

        if let Err(err) = self.coord.active_remove(&task_id.to_string()).await {
            warn!(task_id = %task_id, "active-set release failed: {err}");
        }
        self.supervisor.release(slot);
        self.slot_free.notify_one();
    }

    async fn execute_attempt(
        &self,
        job: &Job,
        record: &TaskRecord,
    ) -> Result<(), ServiceError> {
        let task_id = job.task_id;
        let breaker = self.breakers.get_or_create(names::EXTRACTOR);
        if !breaker.allow_request() {
            return Err(ServiceError::external("extractor circuit open"));
        }

        let spec = build_spec(record);

        let (events_tx, mut events_rx) = mpsc::unbounded_channel::<WorkerEvent>();
        let hooks = RunnerHooks {
            on_spawn: Box::new({
                let tx = events_tx.clone();
                move |pid| {
                    let _ = tx.send(WorkerEvent::Spawned(pid));
                }
            }),
            on_progress: Box::new({
                let tx = events_tx.clone();
                move |tick| {
                    let _ = tx.send(WorkerEvent::Tick(tick));
                }
            }),
        };
        drop(events_tx);

        let consumer = async {
            let mut last_persisted = -1.0f64;
            while let Some(event) = events_rx.recv().await {
                self.supervisor.heartbeat(task_id);
                match event {
                    WorkerEvent::Spawned(pid) => {
                        let _ = self
                            .tasks
                            .update(task_id, TaskPatch::default().with_process_id(Some(pid)))
                            .await;
                        self.tracker.start_download(task_id, pid).await;
                    }
                    WorkerEvent::Tick(tick) => {
                        self.tracker.update(task_id, tick).await;
                        let percent = tick.percent.clamp(0.0, 100.0);
                        if percent - last_persisted >= 1.0 {
                            last_persisted = percent;
                            let _ = self
                                .tasks
                                .update(task_id, TaskPatch::progress(percent))
                                .await;
                        }
                    }
                }
            }
        };

        let (download_result, ()) = tokio::join!(self.runner.run_download(&spec, hooks), consumer);

        let artifact = match download_result {
            Ok(artifact) => {
                breaker.record_success();
                artifact
            }
            Err(err) => {
                let service_err: ServiceError = err.into();
                if service_err.is_transient() {
                    breaker.record_failure();
                }
                return Err(service_err);
            }
        };

        if spec.wants_post_processing() {
            // Not cancellable from here on; the post step is short.
            let flipped = self
                .tasks
                .update(task_id, TaskPatch::status(TaskStatus::Processing))
                .await;
            match flipped {
                Ok(record) if record.status == TaskStatus::Processing => {
                    self.tracker.mark_processing(task_id).await;
                    self.runner
                        .post_process(&spec, &artifact, RunnerHooks::noop())
                        .await;
                }
                _ => {
                    // Lost against a cancel; drop the artifact.
                    let _ = std::fs::remove_file(&artifact.file_path);
                    return Ok(());
                }
            }
        }

        let outcome = TaskOutcome::Completed {
            file_path: artifact.file_path.to_string_lossy().into_owned(),
            file_size: artifact.file_size,
            filename: artifact.filename.clone(),
        };
        let patch = TaskPatch::status(TaskStatus::Completed)
            .with_progress(100.0)
            .with_process_id(None)
            .with_completed_at(Utc::now());
        let patch = TaskPatch {
            file_path: Some(artifact.file_path.to_string_lossy().into_owned()),
            file_size: Some(artifact.file_size as i64),
            filename: Some(artifact.filename.clone()),
            ..patch
        };

        match self.tasks.update(task_id, patch).await {
            Ok(record) if record.status == TaskStatus::Completed => {
                self.tracker.finalize(task_id, &outcome).await;
                stats::bump(&self.coord, counters::COMPLETED).await;
                Ok(())
            }
            Ok(record) => {
                // A cancel won the race; converge by removing the file.
                info!(task_id = %task_id, status = %record.status,
                      "completion lost against terminal state, removing artefact");
                let _ = std::fs::remove_file(&artifact.file_path);
                Ok(())
            }
            Err(err) => Err(ServiceError::external(err.to_string())),
        }
    }

    async fn handle_failure(&self, job: &Job, err: ServiceError) {
        let task_id = job.task_id;

        if err.kind == ErrorKind::InvalidState {
            // The runner reported cancellation; finalize as cancelled.
            let patch = TaskPatch::status(TaskStatus::Cancelled)
                .with_process_id(None)
                .with_completed_at(Utc::now());
            let _ = self.tasks.update(task_id, patch).await;
            self.tracker.finalize(task_id, &TaskOutcome::Cancelled).await;
            stats::bump(&self.coord, counters::CANCELLED).await;
            return;
        }

        // ResourceExceeded fails the attempt but a fresh attempt may fit.
        let retryable = err.is_transient() || err.kind == ErrorKind::ResourceExceeded;
        let retry = job.retry();

        if retryable && !retry.attempts_exhausted() {
            info!(
                task_id = %task_id,
                attempt = retry.attempt,
                max = retry.max_attempts,
                "re-enqueueing after transient failure: {}", err.message
            );
            let patch = TaskPatch::status(TaskStatus::Pending)
                .with_progress(0.0)
                .with_process_id(None);
            let _ = self.tasks.update(task_id, patch).await;
            self.tracker
                .record_retry(task_id, retry.attempt, &err.message)
                .await;
            if let Err(enqueue_err) = self.queue.enqueue(retry).await {
                error!(task_id = %task_id, "retry enqueue failed: {enqueue_err}");
            }
            stats::bump(&self.coord, counters::RETRIED).await;
            self.job_available.notify_one();
            return;
        }

        let message = err.sanitized_message(&self.config.download_dir.to_string_lossy(), 500);
        warn!(task_id = %task_id, code = err.code, "task failed permanently: {message}");
        let patch = TaskPatch::status(TaskStatus::Failed)
            .with_process_id(None)
            .with_error_message(message.clone())
            .with_completed_at(Utc::now());
        let _ = self.tasks.update(task_id, patch).await;
        self.tracker
            .finalize(
                task_id,
                &TaskOutcome::failed(ServiceError::new(err.kind, err.code, message)),
            )
            .await;
        stats::bump(&self.coord, counters::FAILED).await;
    }

    /// Liveness loop: recover slots whose heartbeat went stale, requeue
    /// their jobs and quarantine repeat offenders.
    pub async fn run_liveness(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.liveness_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = self.shutdown.cancelled() => break,
            }

            for stale in self.supervisor.stale_slots() {
                warn!(task_id = %stale.task_id, slot = stale.slot, "recovering stuck worker");
                let _ = self.runner.cancel(stale.task_id).await;
                stale.abort.abort();
                self.supervisor.release(stale.slot);
                let _ = self
                    .coord
                    .active_remove(&stale.task_id.to_string())
                    .await;
                self.supervisor.record_crash(stale.slot);

                let retry = stale.job.retry();
                if retry.attempts_exhausted() {
                    let patch = TaskPatch::status(TaskStatus::Failed)
                        .with_process_id(None)
                        .with_error_message("worker became unresponsive")
                        .with_completed_at(Utc::now());
                    let _ = self.tasks.update(stale.task_id, patch).await;
                    self.tracker
                        .finalize(
                            stale.task_id,
                            &TaskOutcome::failed(ServiceError::external(
                                "worker became unresponsive",
                            )),
                        )
                        .await;
                    stats::bump(&self.coord, counters::FAILED).await;
                } else {
                    let patch = TaskPatch::status(TaskStatus::Pending)
                        .with_progress(0.0)
                        .with_process_id(None);
                    let _ = self.tasks.update(stale.task_id, patch).await;
                    self.tracker
                        .record_retry(stale.task_id, retry.attempt, "worker heartbeat lost")
                        .await;
                    let _ = self.queue.enqueue(retry).await;
                    stats::bump(&self.coord, counters::RETRIED).await;
                    self.job_available.notify_one();
                }
                self.slot_free.notify_one();
            }
        }
    }
}

fn build_spec(record: &TaskRecord) -> DownloadSpec {
    DownloadSpec {
        task_id: record.id,
        url: record.url.clone(),
        container: Container::parse(&record.format).unwrap_or(Container::Best),
        format_id: record.format_id.clone(),
        quality: record.quality.as_deref().and_then(QualityHint::parse),
        custom_title: record.custom_title.clone(),
        embed_thumbnail: record.embed_thumbnail,
        thumbnail_url: record.thumbnail_url.clone(),
        duration: record.duration,
    }
}
