//! Worker slot supervision: heartbeats, liveness, quarantine.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::task::AbortHandle;
use tracing::{error, warn};
use uuid::Uuid;

use crate::job::Job;

pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(30);
/// Crashes inside this window count toward quarantine.
const CRASH_WINDOW: Duration = Duration::from_secs(60);
const QUARANTINE_CRASH_COUNT: usize = 5;

struct SlotState {
    task_id: Uuid,
    job: Job,
    last_heartbeat: Instant,
    abort: AbortHandle,
}

/// A slot occupied by a stuck worker, as seen by the liveness loop.
pub struct StaleSlot {
    pub slot: usize,
    pub task_id: Uuid,
    pub job: Job,
    pub abort: AbortHandle,
}

/// Tracks the N concurrency slots: which task occupies each, when it
/// last made progress, and which slots are quarantined after repeated
/// rapid crashes.
pub struct WorkerSupervisor {
    max_slots: usize,
    heartbeat_timeout: Duration,
    slots: Mutex<HashMap<usize, SlotState>>,
    crash_history: Mutex<HashMap<usize, Vec<Instant>>>,
    quarantined: Mutex<HashSet<usize>>,
}

impl WorkerSupervisor {
    pub fn new(max_slots: usize, heartbeat_timeout: Duration) -> Self {
        Self {
            max_slots,
            heartbeat_timeout,
            slots: Mutex::new(HashMap::new()),
            crash_history: Mutex::new(HashMap::new()),
            quarantined: Mutex::new(HashSet::new()),
        }
    }

    /// Lowest free, non-quarantined slot index, or `None` at capacity.
    pub fn try_acquire(&self) -> Option<usize> {
        let slots = self.slots.lock();
        let quarantined = self.quarantined.lock();
        (0..self.max_slots).find(|idx| !slots.contains_key(idx) && !quarantined.contains(idx))
    }

    /// Bind a claimed job to a slot.
    pub fn occupy(&self, slot: usize, task_id: Uuid, job: Job, abort: AbortHandle) {
        self.slots.lock().insert(
            slot,
            SlotState {
                task_id,
                job,
                last_heartbeat: Instant::now(),
                abort,
            },
        );
    }

    /// Record activity for the slot running `task_id`.
    pub fn heartbeat(&self, task_id: Uuid) {
        let mut slots = self.slots.lock();
        if let Some(state) = slots.values_mut().find(|s| s.task_id == task_id) {
            state.last_heartbeat = Instant::now();
        }
    }

    pub fn release(&self, slot: usize) {
        self.slots.lock().remove(&slot);
    }

    pub fn busy_count(&self) -> usize {
        self.slots.lock().len()
    }

    /// Slots available for new work.
    pub fn capacity(&self) -> usize {
        self.max_slots - self.quarantined.lock().len()
    }

    /// Record a worker crash on `slot`. Returns `true` when the slot has
    /// crashed often enough in rapid succession to be quarantined.
    pub fn record_crash(&self, slot: usize) -> bool {
        let now = Instant::now();
        let mut history = self.crash_history.lock();
        let crashes = history.entry(slot).or_default();
        crashes.push(now);
        crashes.retain(|at| now.duration_since(*at) <= CRASH_WINDOW);

        if crashes.len() >= QUARANTINE_CRASH_COUNT {
            let newly = self.quarantined.lock().insert(slot);
            if newly {
                error!(
                    "worker slot {slot} quarantined after {} crashes in {:?}",
                    crashes.len(),
                    CRASH_WINDOW
                );
            }
            true
        } else {
            false
        }
    }

    /// Occupied slots whose heartbeat is older than the timeout. The
    /// caller cancels the child, requeues the job and releases the slot.
    pub fn stale_slots(&self) -> Vec<StaleSlot> {
        let now = Instant::now();
        let slots = self.slots.lock();
        slots
            .iter()
            .filter(|(_, state)| now.duration_since(state.last_heartbeat) > self.heartbeat_timeout)
            .map(|(slot, state)| {
                warn!(
                    slot,
                    task_id = %state.task_id,
                    age_secs = now.duration_since(state.last_heartbeat).as_secs(),
                    "worker heartbeat is stale"
                );
                StaleSlot {
                    slot: *slot,
                    task_id: state.task_id,
                    job: state.job.clone(),
                    abort: state.abort.clone(),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediagrab_types::Priority;

    fn abort_handle() -> AbortHandle {
        tokio::spawn(async {}).abort_handle()
    }

    #[tokio::test]
    async fn test_acquire_occupy_release() {
        let sup = WorkerSupervisor::new(2, DEFAULT_HEARTBEAT_TIMEOUT);
        let a = sup.try_acquire().unwrap();
        sup.occupy(a, Uuid::new_v4(), Job::new(Uuid::new_v4(), Priority::Normal), abort_handle());
        let b = sup.try_acquire().unwrap();
        assert_ne!(a, b);
        sup.occupy(b, Uuid::new_v4(), Job::new(Uuid::new_v4(), Priority::Normal), abort_handle());

        assert!(sup.try_acquire().is_none());
        assert_eq!(sup.busy_count(), 2);

        sup.release(a);
        assert_eq!(sup.try_acquire(), Some(a));
    }

    #[tokio::test]
    async fn test_stale_slot_detection() {
        let sup = WorkerSupervisor::new(1, Duration::from_millis(10));
        let slot = sup.try_acquire().unwrap();
        let task_id = Uuid::new_v4();
        sup.occupy(slot, task_id, Job::new(task_id, Priority::Normal), abort_handle());

        assert!(sup.stale_slots().is_empty());
        std::thread::sleep(Duration::from_millis(20));
        let stale = sup.stale_slots();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].task_id, task_id);

        // heartbeat clears staleness
        sup.heartbeat(task_id);
        assert!(sup.stale_slots().is_empty());
    }

    #[tokio::test]
    async fn test_quarantine_after_rapid_crashes() {
        let sup = WorkerSupervisor::new(2, DEFAULT_HEARTBEAT_TIMEOUT);
        for _ in 0..4 {
            assert!(!sup.record_crash(0));
        }
        assert!(sup.record_crash(0));

        assert_eq!(sup.capacity(), 1);
        // quarantined slot is never handed out
        assert_eq!(sup.try_acquire(), Some(1));
    }
}
