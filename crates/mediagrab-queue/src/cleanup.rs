//! Cleanup sweep: garbage-collect expired terminal tasks and artefacts.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use mediagrab_progress::ProgressTracker;
use mediagrab_task_store::{TaskRecord, TaskStore};

#[derive(Debug, Clone)]
pub struct CleanupConfig {
    pub download_dir: PathBuf,
    /// Terminal rows older than this are removed.
    pub retention: Duration,
    /// Sweep cadence.
    pub interval: Duration,
    /// Rows processed per sweep.
    pub batch_size: u32,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("downloads"),
            retention: Duration::from_secs(7 * 24 * 3600),
            interval: Duration::from_secs(600),
            batch_size: 100,
        }
    }
}

/// Periodic sweep over terminal rows past the retention cut-off. For
/// each candidate: guard the output path, unlink the file, drop the
/// progress records, then delete the row. A failure on any step leaves
/// the row for the next sweep.
pub struct CleanupSweep {
    tasks: Arc<dyn TaskStore>,
    tracker: Arc<ProgressTracker>,
    config: CleanupConfig,
}

impl CleanupSweep {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        tracker: Arc<ProgressTracker>,
        config: CleanupConfig,
    ) -> Self {
        Self {
            tasks,
            tracker,
            config,
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.interval);
        info!(
            retention_secs = self.config.retention.as_secs(),
            "cleanup sweep started"
        );
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.cancelled() => break,
            }
            match self.sweep_once().await {
                Ok(0) => {}
                Ok(count) => info!("cleanup removed {count} expired tasks"),
                Err(err) => warn!("cleanup sweep failed: {err}"),
            }
        }
    }

    /// One sweep pass. Returns the number of rows removed.
    pub async fn sweep_once(&self) -> Result<usize, String> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.retention)
                .map_err(|e| e.to_string())?;
        let expired = self
            .tasks
            .expired_terminal(cutoff, self.config.batch_size)
            .await
            .map_err(|e| e.to_string())?;

        let mut removed = 0;
        for record in expired {
            match self.remove_task(&record).await {
                Ok(()) => removed += 1,
                Err(err) => {
                    warn!(task_id = %record.id, "cleanup of task failed, leaving for next sweep: {err}");
                }
            }
        }
        Ok(removed)
    }

    async fn remove_task(&self, record: &TaskRecord) -> Result<(), String> {
        if let Some(ref file_path) = record.file_path {
            delete_guarded(Path::new(file_path), &self.config.download_dir)?;
        }

        self.tracker
            .cleanup(record.id)
            .await
            .map_err(|e| e.to_string())?;

        self.tasks
            .delete(record.id)
            .await
            .map_err(|e| e.to_string())?;
        Ok(())
    }
}

/// Unlink `path` only when it resolves inside `download_dir`. A path
/// outside the directory is a traversal attempt and is refused.
pub fn delete_guarded(path: &Path, download_dir: &Path) -> Result<(), String> {
    let canonical_dir = download_dir
        .canonicalize()
        .map_err(|e| format!("download dir unavailable: {e}"))?;

    let canonical = match path.canonicalize() {
        Ok(canonical) => canonical,
        // Already gone; nothing to delete.
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(format!("cannot resolve {path:?}: {err}")),
    };

    if !canonical.starts_with(&canonical_dir) {
        warn!("refusing to delete path outside download dir: {canonical:?}");
        return Err(format!("path {canonical:?} escapes the download directory"));
    }

    std::fs::remove_file(&canonical).map_err(|e| format!("unlink {canonical:?}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediagrab_coordination::InMemoryCoordination;
    use mediagrab_task_store::{SqliteTaskStore, SqliteTaskStoreConfig, TaskPatch};
    use mediagrab_types::TaskStatus;

    async fn memory_store() -> Arc<dyn TaskStore> {
        Arc::new(
            SqliteTaskStore::with_config(SqliteTaskStoreConfig {
                database_path: ":memory:".into(),
                ..Default::default()
            })
            .await
            .unwrap(),
        )
    }

    #[test]
    fn test_delete_guarded_refuses_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::NamedTempFile::new().unwrap();

        let err = delete_guarded(outside.path(), dir.path()).unwrap_err();
        assert!(err.contains("escapes"));
        assert!(outside.path().exists());
    }

    #[test]
    fn test_delete_guarded_removes_inside_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("abc.mp4");
        std::fs::write(&file, b"data").unwrap();

        delete_guarded(&file, dir.path()).unwrap();
        assert!(!file.exists());
        // second call is a no-op
        delete_guarded(&file, dir.path()).unwrap();
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_terminal_rows() {
        let dir = tempfile::tempdir().unwrap();
        let tasks = memory_store().await;
        let coord = Arc::new(InMemoryCoordination::new());
        let tracker = Arc::new(ProgressTracker::new(coord));

        // an old cancelled task with an artefact on disk
        let record = TaskRecord::new("https://example.test/v/a", "mp4");
        let id = record.id;
        let file = dir.path().join(format!("{id}.mp4"));
        std::fs::write(&file, b"payload").unwrap();

        tasks.create(record).await.unwrap();
        tasks
            .update(
                id,
                TaskPatch {
                    status: Some(TaskStatus::Cancelled),
                    file_path: Some(file.to_string_lossy().into_owned()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        tracker.init(id, "https://example.test/v/a", None).await;

        let sweep = CleanupSweep::new(
            Arc::clone(&tasks),
            Arc::clone(&tracker),
            CleanupConfig {
                download_dir: dir.path().to_path_buf(),
                retention: Duration::ZERO,
                ..Default::default()
            },
        );

        let removed = sweep.sweep_once().await.unwrap();
        assert_eq!(removed, 1);
        assert!(!file.exists());
        assert!(tasks.get(id).await.unwrap().is_none());
        assert!(tracker.get(id).await.is_none());
    }

    #[tokio::test]
    async fn test_sweep_skips_fresh_rows() {
        let dir = tempfile::tempdir().unwrap();
        let tasks = memory_store().await;
        let coord = Arc::new(InMemoryCoordination::new());
        let tracker = Arc::new(ProgressTracker::new(coord));

        let record = TaskRecord::new("https://example.test/v/b", "mp4");
        let id = record.id;
        tasks.create(record).await.unwrap();
        tasks
            .update(id, TaskPatch::status(TaskStatus::Cancelled))
            .await
            .unwrap();

        let sweep = CleanupSweep::new(
            Arc::clone(&tasks),
            tracker,
            CleanupConfig {
                download_dir: dir.path().to_path_buf(),
                retention: Duration::from_secs(3600),
                ..Default::default()
            },
        );

        assert_eq!(sweep.sweep_once().await.unwrap(), 0);
        assert!(tasks.get(id).await.unwrap().is_some());
    }
}
