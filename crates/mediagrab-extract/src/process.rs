//! Child process registry and termination discipline.
//!
//! The table maps task ids to the pid of the child currently working on
//! them. Spawn/reap writes and cancel lookups are serialised behind one
//! lock. Cancellation sets a flag the owning download loop observes, so
//! the exit is reported as `Cancelled` rather than a generic failure.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use parking_lot::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

/// How long to wait after SIGTERM before escalating.
pub const TERM_GRACE: Duration = Duration::from_secs(5);
/// How long to wait after SIGKILL before giving up on the reap.
pub const KILL_GRACE: Duration = Duration::from_secs(3);

struct Entry {
    pid: u32,
    cancelled: Arc<AtomicBool>,
}

/// Registry of running children, keyed by task id.
#[derive(Default)]
pub struct ProcessTable {
    entries: Mutex<HashMap<Uuid, Entry>>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly spawned child. Returns the cancellation flag
    /// the owning loop must check when the child exits.
    pub fn register(&self, task_id: Uuid, pid: u32) -> Arc<AtomicBool> {
        let cancelled = Arc::new(AtomicBool::new(false));
        self.entries.lock().insert(
            task_id,
            Entry {
                pid,
                cancelled: Arc::clone(&cancelled),
            },
        );
        cancelled
    }

    /// Remove the entry after the child has been reaped.
    pub fn deregister(&self, task_id: Uuid) {
        self.entries.lock().remove(&task_id);
    }

    pub fn pid_of(&self, task_id: Uuid) -> Option<u32> {
        self.entries.lock().get(&task_id).map(|e| e.pid)
    }

    pub fn contains(&self, task_id: Uuid) -> bool {
        self.entries.lock().contains_key(&task_id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Terminate the child working on `task_id`, first politely then
    /// forcefully. Returns `false` when no child is registered.
    ///
    /// The owning download loop reaps the child and deregisters the
    /// entry; this method only signals and waits for that to happen.
    pub async fn terminate(&self, task_id: Uuid) -> bool {
        let (pid, cancelled) = {
            let entries = self.entries.lock();
            match entries.get(&task_id) {
                Some(entry) => (entry.pid, Arc::clone(&entry.cancelled)),
                None => return false,
            }
        };

        cancelled.store(true, Ordering::SeqCst);
        info!(task_id = %task_id, pid, "terminating child process");

        if let Err(err) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            // Already gone; the owner will deregister shortly.
            warn!(task_id = %task_id, pid, "SIGTERM failed: {err}");
        }

        if self.wait_deregistered(task_id, TERM_GRACE).await {
            return true;
        }

        warn!(task_id = %task_id, pid, "child ignored SIGTERM, escalating to SIGKILL");
        if let Err(err) = kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            warn!(task_id = %task_id, pid, "SIGKILL failed: {err}");
        }

        if !self.wait_deregistered(task_id, KILL_GRACE).await {
            warn!(task_id = %task_id, pid, "child not reaped after SIGKILL");
        }
        true
    }

    async fn wait_deregistered(&self, task_id: Uuid, budget: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + budget;
        while tokio::time::Instant::now() < deadline {
            if !self.contains(task_id) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        !self.contains(task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_lookup() {
        let table = ProcessTable::new();
        let id = Uuid::new_v4();
        let flag = table.register(id, 12345);

        assert_eq!(table.pid_of(id), Some(12345));
        assert!(!flag.load(Ordering::SeqCst));
        assert_eq!(table.len(), 1);

        table.deregister(id);
        assert!(table.is_empty());
        assert_eq!(table.pid_of(id), None);
    }

    #[tokio::test]
    async fn test_terminate_unknown_task_is_noop() {
        let table = ProcessTable::new();
        assert!(!table.terminate(Uuid::new_v4()).await);
    }

    #[tokio::test]
    async fn test_terminate_reaped_child() {
        let table = ProcessTable::new();
        let id = Uuid::new_v4();

        // Spawn a real short-lived child so the pid is valid to signal.
        let child = std::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .expect("spawn sleep");
        let pid = child.id();
        let flag = table.register(id, pid);

        // Simulate the owning loop: deregister once the flag flips.
        let table_ref = &table;
        let reaper = async {
            let mut child = child;
            loop {
                if flag.load(Ordering::SeqCst) {
                    let _ = child.wait();
                    table_ref.deregister(id);
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        };

        let (found, _) = tokio::join!(table.terminate(id), reaper);
        assert!(found);
        assert!(table.is_empty());
    }
}
