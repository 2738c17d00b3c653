//! Priority queue over the coordination store with a local mirror.
//!
//! The sorted set in the coordination store is authoritative. When it is
//! unreachable, jobs land in a local mirror so intake keeps working;
//! the mirror is drained back into the store on the next successful
//! contact.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::job::Job;
use mediagrab_coordination::{CoordinationError, CoordinationStore};
use mediagrab_types::{ErrorKind, ServiceError};

pub struct JobQueue {
    store: Arc<dyn CoordinationStore>,
    /// Jobs accepted while the store was unreachable.
    mirror: Mutex<Vec<Job>>,
}

impl JobQueue {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self {
            store,
            mirror: Mutex::new(Vec::new()),
        }
    }

    /// Enqueue a job. Falls back to the local mirror when the store is
    /// down; intake never fails on queue depth.
    pub async fn enqueue(&self, job: Job) -> Result<(), ServiceError> {
        let member = job
            .encode()
            .map_err(|e| ServiceError::internal(e.to_string()))?;

        match self.store.queue_add(&member, job.score()).await {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(
                    task_id = %job.task_id,
                    "queue store unreachable ({err}), buffering job locally"
                );
                self.mirror.lock().push(job);
                Ok(())
            }
        }
    }

    /// Pop the next job in priority order, reconciling the local mirror
    /// first when one has accumulated.
    pub async fn dequeue(&self) -> Result<Option<Job>, ServiceError> {
        self.reconcile().await;

        match self.store.queue_pop_min().await {
            Ok(Some(member)) => match Job::decode(&member) {
                Ok(job) => Ok(Some(job)),
                Err(err) => {
                    warn!("dropping undecodable queue member: {err}");
                    Ok(None)
                }
            },
            Ok(None) => Ok(None),
            Err(_) => Ok(self.pop_mirror()),
        }
    }

    /// Remove a pending job for `task_id` (cancellation of a task that
    /// has not been claimed yet). Returns `true` when one was removed.
    pub async fn remove_task(&self, task_id: Uuid) -> Result<bool, ServiceError> {
        {
            let mut mirror = self.mirror.lock();
            let before = mirror.len();
            mirror.retain(|job| job.task_id != task_id);
            if mirror.len() != before {
                return Ok(true);
            }
        }

        let members = self
            .store
            .queue_snapshot()
            .await
            .map_err(to_service_error)?;
        for member in members {
            if let Ok(job) = Job::decode(&member) {
                if job.task_id == task_id {
                    let removed = self
                        .store
                        .queue_remove(&member)
                        .await
                        .map_err(to_service_error)?;
                    return Ok(removed);
                }
            }
        }
        Ok(false)
    }

    /// 1-based position of a pending task in the queue; 0 when not
    /// queued (active, terminal or unknown).
    pub async fn position(&self, task_id: Uuid) -> u64 {
        {
            let mirror = self.mirror.lock();
            if let Some(idx) = mirror.iter().position(|j| j.task_id == task_id) {
                // Mirror entries sit behind whatever is in the store.
                return (idx + 1) as u64;
            }
        }

        let Ok(members) = self.store.queue_snapshot().await else {
            return 0;
        };
        for (idx, member) in members.iter().enumerate() {
            if let Ok(job) = Job::decode(member) {
                if job.task_id == task_id {
                    return (idx + 1) as u64;
                }
            }
        }
        0
    }

    pub async fn len(&self) -> u64 {
        let mirrored = self.mirror.lock().len() as u64;
        self.store.queue_len().await.unwrap_or(0) + mirrored
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn pop_mirror(&self) -> Option<Job> {
        let mut mirror = self.mirror.lock();
        if mirror.is_empty() {
            return None;
        }
        let mut best = 0;
        for idx in 1..mirror.len() {
            if mirror[idx].score() < mirror[best].score() {
                best = idx;
            }
        }
        Some(mirror.remove(best))
    }

    /// Push mirrored jobs back into the store once it answers again.
    async fn reconcile(&self) {
        let buffered: Vec<Job> = {
            let mut mirror = self.mirror.lock();
            std::mem::take(&mut *mirror)
        };
        if buffered.is_empty() {
            return;
        }

        let mut recovered = 0usize;
        let mut failed = Vec::new();
        for job in buffered {
            let Ok(member) = job.encode() else { continue };
            match self.store.queue_add(&member, job.score()).await {
                Ok(()) => recovered += 1,
                Err(_) => failed.push(job),
            }
        }

        if recovered > 0 {
            info!("reconciled {recovered} locally buffered jobs into the queue store");
        }
        if !failed.is_empty() {
            self.mirror.lock().extend(failed);
        }
    }
}

fn to_service_error(err: CoordinationError) -> ServiceError {
    ServiceError::new(ErrorKind::External, "EXTERNAL_ERROR", err.to_string())
}
