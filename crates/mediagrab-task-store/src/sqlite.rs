//! SQLite task store backend.
//!
//! Production-ready backend for single-instance deployments that need
//! task rows to survive server restarts without running a database
//! server.

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::TaskStoreError;
use crate::state_machine;
use crate::traits::TaskStore;
use crate::types::{TaskFilter, TaskPatch, TaskRecord};
use async_trait::async_trait;
use mediagrab_types::{RetryPolicy, TaskStatus};

/// Configuration for the SQLite task store.
#[derive(Debug, Clone)]
pub struct SqliteTaskStoreConfig {
    /// Database file path (use ":memory:" for in-memory).
    pub database_path: PathBuf,
    /// Maximum number of pooled connections.
    pub max_connections: u32,
    /// Create the database file if it doesn't exist.
    pub create_database_if_missing: bool,
}

impl Default for SqliteTaskStoreConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("mediagrab_tasks.db"),
            max_connections: 10,
            create_database_if_missing: true,
        }
    }
}

/// SQLite-backed task store.
pub struct SqliteTaskStore {
    pool: SqlitePool,
    retry: RetryPolicy,
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, TaskStoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| TaskStoreError::SerializationError(format!("bad timestamp {value:?}: {e}")))
}

fn parse_status(value: &str) -> Result<TaskStatus, TaskStoreError> {
    TaskStatus::parse(value)
        .ok_or_else(|| TaskStoreError::DatabaseError(format!("unknown task status: {value}")))
}

fn parse_id(value: &str) -> Result<Uuid, TaskStoreError> {
    Uuid::from_str(value)
        .map_err(|e| TaskStoreError::DatabaseError(format!("bad task id {value:?}: {e}")))
}

fn row_to_task(row: &SqliteRow) -> Result<TaskRecord, TaskStoreError> {
    let id: String = row.try_get("id")?;
    let status: String = row.try_get("status")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    let completed_at: Option<String> = row.try_get("completed_at")?;

    Ok(TaskRecord {
        id: parse_id(&id)?,
        url: row.try_get("url")?,
        format: row.try_get("format")?,
        format_id: row.try_get("format_id")?,
        quality: row.try_get("quality")?,
        audio_only: row.try_get::<i64, _>("audio_only")? != 0,
        custom_title: row.try_get("custom_title")?,
        embed_thumbnail: row.try_get::<i64, _>("embed_thumbnail")? != 0,
        status: parse_status(&status)?,
        progress: row.try_get("progress")?,
        process_id: row.try_get::<Option<i64>, _>("process_id")?.map(|v| v as u32),
        title: row.try_get("title")?,
        thumbnail_url: row.try_get("thumbnail_url")?,
        duration: row.try_get("duration")?,
        file_path: row.try_get("file_path")?,
        file_size: row.try_get("file_size")?,
        filename: row.try_get("filename")?,
        error_message: row.try_get("error_message")?,
        ip_address: row.try_get("ip_address")?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
        completed_at: completed_at.as_deref().map(parse_timestamp).transpose()?,
    })
}

const SELECT_COLUMNS: &str = "id, url, format, format_id, quality, audio_only, custom_title, \
     embed_thumbnail, status, progress, process_id, title, thumbnail_url, duration, \
     file_path, file_size, filename, error_message, ip_address, created_at, updated_at, \
     completed_at";

impl SqliteTaskStore {
    /// Create a store with default configuration.
    pub async fn new() -> Result<Self, TaskStoreError> {
        Self::with_config(SqliteTaskStoreConfig::default()).await
    }

    /// Create a store with custom configuration.
    pub async fn with_config(config: SqliteTaskStoreConfig) -> Result<Self, TaskStoreError> {
        info!("Initializing SQLite task store at {:?}", config.database_path);

        let db_path_str = config.database_path.to_string_lossy();
        let is_memory = db_path_str == ":memory:";

        let pool = if is_memory {
            // In-memory databases need a named shared-cache URI so every
            // pooled connection sees the same database instance.
            let unique_name = Uuid::new_v4();
            let uri = format!("file:{unique_name}?mode=memory&cache=shared");
            SqlitePool::connect(&uri)
                .await
                .map_err(|e| TaskStoreError::DatabaseError(e.to_string()))?
        } else {
            if let Some(parent) = config.database_path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    TaskStoreError::DatabaseError(format!(
                        "Failed to create database directory: {e}"
                    ))
                })?;
            }
            let connect_options = SqliteConnectOptions::new()
                .filename(&config.database_path)
                .create_if_missing(config.create_database_if_missing);
            SqlitePool::connect_with(connect_options)
                .await
                .map_err(|e| TaskStoreError::DatabaseError(e.to_string()))?
        };

        let store = Self {
            pool,
            retry: RetryPolicy::default(),
        };
        store.migrate().await?;

        info!("SQLite task store initialized");
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), TaskStoreError> {
        debug!("Running task store migrations");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                url TEXT NOT NULL,
                format TEXT NOT NULL,
                format_id TEXT,
                quality TEXT,
                audio_only INTEGER NOT NULL DEFAULT 0,
                custom_title TEXT,
                embed_thumbnail INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'pending',
                progress REAL NOT NULL DEFAULT 0,
                process_id INTEGER,
                title TEXT,
                thumbnail_url TEXT,
                duration REAL,
                file_path TEXT,
                file_size INTEGER,
                filename TEXT,
                error_message TEXT,
                ip_address TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                completed_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_tasks_status_updated ON tasks (status, updated_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_created ON tasks (created_at)")
            .execute(&self.pool)
            .await?;

        debug!("Task store migrations completed");
        Ok(())
    }

    async fn insert(&self, task: &TaskRecord) -> Result<(), TaskStoreError> {
        sqlx::query(
            r#"
            INSERT INTO tasks (id, url, format, format_id, quality, audio_only, custom_title,
                               embed_thumbnail, status, progress, process_id, title,
                               thumbnail_url, duration, file_path, file_size, filename,
                               error_message, ip_address, created_at, updated_at, completed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(task.id.to_string())
        .bind(&task.url)
        .bind(&task.format)
        .bind(&task.format_id)
        .bind(&task.quality)
        .bind(task.audio_only as i64)
        .bind(&task.custom_title)
        .bind(task.embed_thumbnail as i64)
        .bind(task.status.as_str())
        .bind(task.progress)
        .bind(task.process_id.map(|v| v as i64))
        .bind(&task.title)
        .bind(&task.thumbnail_url)
        .bind(task.duration)
        .bind(&task.file_path)
        .bind(task.file_size)
        .bind(&task.filename)
        .bind(&task.error_message)
        .bind(&task.ip_address)
        .bind(task.created_at.to_rfc3339())
        .bind(task.updated_at.to_rfc3339())
        .bind(task.completed_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn write_back(&self, task: &TaskRecord) -> Result<(), TaskStoreError> {
        sqlx::query(
            r#"
            UPDATE tasks SET
                status = ?, progress = ?, process_id = ?, title = ?, thumbnail_url = ?,
                duration = ?, file_path = ?, file_size = ?, filename = ?, error_message = ?,
                updated_at = ?, completed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(task.status.as_str())
        .bind(task.progress)
        .bind(task.process_id.map(|v| v as i64))
        .bind(&task.title)
        .bind(&task.thumbnail_url)
        .bind(task.duration)
        .bind(&task.file_path)
        .bind(task.file_size)
        .bind(&task.filename)
        .bind(&task.error_message)
        .bind(task.updated_at.to_rfc3339())
        .bind(task.completed_at.map(|t| t.to_rfc3339()))
        .bind(task.id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<TaskRecord>, TaskStoreError> {
        let query = format!("SELECT {SELECT_COLUMNS} FROM tasks WHERE id = ?");
        let row = sqlx::query(&query)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_task).transpose()
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    async fn create(&self, task: TaskRecord) -> Result<TaskRecord, TaskStoreError> {
        self.retry
            .run_if(
                "task_store.create",
                || self.insert(&task),
                TaskStoreError::is_transient,
            )
            .await?;
        Ok(task)
    }

    async fn get(&self, id: Uuid) -> Result<Option<TaskRecord>, TaskStoreError> {
        self.retry
            .run_if(
                "task_store.get",
                || self.fetch(id),
                TaskStoreError::is_transient,
            )
            .await
    }

    async fn update(&self, id: Uuid, patch: TaskPatch) -> Result<TaskRecord, TaskStoreError> {
        self.retry
            .run_if(
                "task_store.update",
                || {
                    let patch = patch.clone();
                    async move {
                        let mut current = self
                            .fetch(id)
                            .await?
                            .ok_or_else(|| TaskStoreError::TaskNotFound(id.to_string()))?;

                        if current.status.is_terminal() {
                            // The later terminal state wins; racing writers are
                            // silently discarded.
                            debug!(task_id = %id, status = %current.status,
                                   "discarding update against terminal task");
                            return Ok(current);
                        }

                        if let Some(new_status) = patch.status {
                            if new_status != current.status {
                                state_machine::validate_transition(current.status, new_status)?;
                                current.status = new_status;
                            }
                        }
                        patch.apply_non_status(&mut current);
                        current.updated_at = Utc::now();

                        self.write_back(&current).await?;
                        Ok(current)
                    }
                },
                TaskStoreError::is_transient,
            )
            .await
    }

    async fn list(&self, filter: TaskFilter) -> Result<Vec<TaskRecord>, TaskStoreError> {
        let limit = filter.effective_limit();
        let rows = match filter.status {
            Some(status) => {
                let query = format!(
                    "SELECT {SELECT_COLUMNS} FROM tasks WHERE status = ? \
                     ORDER BY created_at DESC LIMIT ?"
                );
                sqlx::query(&query)
                    .bind(status.as_str())
                    .bind(limit as i64)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                let query = format!(
                    "SELECT {SELECT_COLUMNS} FROM tasks ORDER BY created_at DESC LIMIT ?"
                );
                sqlx::query(&query)
                    .bind(limit as i64)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(row_to_task).collect()
    }

    async fn delete(&self, id: Uuid) -> Result<bool, TaskStoreError> {
        let affected = sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(affected > 0)
    }

    async fn expired_terminal(
        &self,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<TaskRecord>, TaskStoreError> {
        let query = format!(
            "SELECT {SELECT_COLUMNS} FROM tasks \
             WHERE status IN ('completed', 'failed', 'cancelled') AND updated_at < ? \
             ORDER BY updated_at ASC LIMIT ?"
        );
        let rows = sqlx::query(&query)
            .bind(cutoff.to_rfc3339())
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_task).collect()
    }

    async fn reset_inflight(&self) -> Result<Vec<Uuid>, TaskStoreError> {
        let rows = sqlx::query(
            "SELECT id FROM tasks WHERE status IN ('downloading', 'processing')",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut ids = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: String = row.try_get("id")?;
            ids.push(parse_id(&id)?);
        }

        if !ids.is_empty() {
            sqlx::query(
                "UPDATE tasks SET status = 'pending', progress = 0, process_id = NULL, \
                 updated_at = ? WHERE status IN ('downloading', 'processing')",
            )
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;
            info!("Reset {} in-flight tasks to pending after restart", ids.len());
        }

        Ok(ids)
    }

    async fn count_by_status(&self, status: TaskStatus) -> Result<u64, TaskStoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tasks WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn ping(&self) -> Result<(), TaskStoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
