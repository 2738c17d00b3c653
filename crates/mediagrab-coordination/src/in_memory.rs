//! In-memory coordination backend.
//!
//! Suitable for tests and single-node development runs where a Redis
//! server is not worth operating. State is process-local and lost on
//! restart, matching the volatile contract of the store.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::{Duration, Instant};

use crate::error::CoordinationError;
use crate::traits::CoordinationStore;

#[derive(Default)]
struct Inner {
    rate: HashMap<String, (u64, Instant)>,
    queue: Vec<(f64, u64, String)>,
    queue_seq: u64,
    active: HashSet<String>,
    blobs: HashMap<String, (String, Instant)>,
    counters: HashMap<String, u64>,
}

/// In-memory implementation of [`CoordinationStore`].
#[derive(Clone, Default)]
pub struct InMemoryCoordination {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryCoordination {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CoordinationStore for InMemoryCoordination {
    fn backend_name(&self) -> &'static str {
        "in-memory"
    }

    async fn incr_with_ttl(&self, key: &str, window_secs: u64) -> Result<u64, CoordinationError> {
        let mut inner = self.inner.write().await;
        let now = Instant::now();

        match inner.rate.get_mut(key) {
            Some((count, expires_at)) if *expires_at > now => {
                *count += 1;
                Ok(*count)
            }
            _ => {
                inner.rate.insert(
                    key.to_string(),
                    (1, now + Duration::from_secs(window_secs)),
                );
                Ok(1)
            }
        }
    }

    async fn queue_add(&self, member: &str, score: f64) -> Result<(), CoordinationError> {
        let mut inner = self.inner.write().await;
        let seq = inner.queue_seq;
        inner.queue_seq += 1;
        inner.queue.push((score, seq, member.to_string()));
        Ok(())
    }

    async fn queue_pop_min(&self) -> Result<Option<String>, CoordinationError> {
        let mut inner = self.inner.write().await;
        let idx = inner
            .queue
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                a.0.partial_cmp(&b.0)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.1.cmp(&b.1))
            })
            .map(|(idx, _)| idx);
        Ok(idx.map(|i| inner.queue.remove(i).2))
    }

    async fn queue_remove(&self, member: &str) -> Result<bool, CoordinationError> {
        let mut inner = self.inner.write().await;
        let before = inner.queue.len();
        inner.queue.retain(|(_, _, m)| m != member);
        Ok(inner.queue.len() != before)
    }

    async fn queue_len(&self) -> Result<u64, CoordinationError> {
        Ok(self.inner.read().await.queue.len() as u64)
    }

    async fn queue_snapshot(&self) -> Result<Vec<String>, CoordinationError> {
        let inner = self.inner.read().await;
        let mut entries: Vec<_> = inner.queue.clone();
        entries.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.cmp(&b.1))
        });
        Ok(entries.into_iter().map(|(_, _, m)| m).collect())
    }

    async fn active_add(&self, task_id: &str) -> Result<bool, CoordinationError> {
        Ok(self.inner.write().await.active.insert(task_id.to_string()))
    }

    async fn active_remove(&self, task_id: &str) -> Result<bool, CoordinationError> {
        Ok(self.inner.write().await.active.remove(task_id))
    }

    async fn active_count(&self) -> Result<u64, CoordinationError> {
        Ok(self.inner.read().await.active.len() as u64)
    }

    async fn active_members(&self) -> Result<Vec<String>, CoordinationError> {
        Ok(self.inner.read().await.active.iter().cloned().collect())
    }

    async fn blob_set(
        &self,
        key: &str,
        value: &str,
        ttl_secs: u64,
    ) -> Result<(), CoordinationError> {
        let mut inner = self.inner.write().await;
        inner.blobs.insert(
            key.to_string(),
            (
                value.to_string(),
                Instant::now() + Duration::from_secs(ttl_secs),
            ),
        );
        Ok(())
    }

    async fn blob_get(&self, key: &str) -> Result<Option<String>, CoordinationError> {
        let mut inner = self.inner.write().await;
        match inner.blobs.get(key) {
            Some((value, expires_at)) if *expires_at > Instant::now() => Ok(Some(value.clone())),
            Some(_) => {
                inner.blobs.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn blob_delete(&self, key: &str) -> Result<(), CoordinationError> {
        self.inner.write().await.blobs.remove(key);
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, CoordinationError> {
        let now = Instant::now();
        let inner = self.inner.read().await;
        Ok(inner
            .blobs
            .iter()
            .filter(|(k, (_, expires_at))| k.starts_with(prefix) && *expires_at > now)
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn counter_incr(&self, key: &str) -> Result<u64, CoordinationError> {
        let mut inner = self.inner.write().await;
        let count = inner.counters.entry(key.to_string()).or_insert(0);
        *count += 1;
        Ok(*count)
    }

    async fn counter_get(&self, key: &str) -> Result<u64, CoordinationError> {
        Ok(self
            .inner
            .read()
            .await
            .counters
            .get(key)
            .copied()
            .unwrap_or(0))
    }

    async fn ping(&self) -> Result<(), CoordinationError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_queue_pops_lowest_score_fifo() {
        let store = InMemoryCoordination::new();
        store.queue_add("normal-1", -2.0).await.unwrap();
        store.queue_add("critical", -4.0).await.unwrap();
        store.queue_add("normal-2", -2.0).await.unwrap();

        assert_eq!(store.queue_pop_min().await.unwrap().as_deref(), Some("critical"));
        assert_eq!(store.queue_pop_min().await.unwrap().as_deref(), Some("normal-1"));
        assert_eq!(store.queue_pop_min().await.unwrap().as_deref(), Some("normal-2"));
        assert_eq!(store.queue_pop_min().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_queue_remove_and_snapshot() {
        let store = InMemoryCoordination::new();
        store.queue_add("a", 1.0).await.unwrap();
        store.queue_add("b", 0.0).await.unwrap();

        assert_eq!(store.queue_snapshot().await.unwrap(), vec!["b", "a"]);
        assert!(store.queue_remove("a").await.unwrap());
        assert!(!store.queue_remove("a").await.unwrap());
        assert_eq!(store.queue_len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_active_set_claim_semantics() {
        let store = InMemoryCoordination::new();
        assert!(store.active_add("t1").await.unwrap());
        // Second claim of the same id fails.
        assert!(!store.active_add("t1").await.unwrap());
        assert_eq!(store.active_count().await.unwrap(), 1);
        assert!(store.active_remove("t1").await.unwrap());
        assert_eq!(store.active_count().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_window_rolls() {
        let store = InMemoryCoordination::new();
        assert_eq!(store.incr_with_ttl("rate_limit:ip", 60).await.unwrap(), 1);
        assert_eq!(store.incr_with_ttl("rate_limit:ip", 60).await.unwrap(), 2);

        tokio::time::advance(Duration::from_secs(61)).await;
        // Window expired: the counter restarts.
        assert_eq!(store.incr_with_ttl("rate_limit:ip", 60).await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blob_ttl() {
        let store = InMemoryCoordination::new();
        store.blob_set("progress:x", "{}", 10).await.unwrap();
        assert!(store.blob_get("progress:x").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(store.blob_get("progress:x").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_scan_prefix() {
        let store = InMemoryCoordination::new();
        store.blob_set("auth:key:one", "{}", 60).await.unwrap();
        store.blob_set("auth:key:two", "{}", 60).await.unwrap();
        store.blob_set("progress:x", "{}", 60).await.unwrap();

        let mut keys = store.scan_prefix("auth:key:").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["auth:key:one", "auth:key:two"]);
    }

    #[tokio::test]
    async fn test_counters() {
        let store = InMemoryCoordination::new();
        assert_eq!(store.counter_get("stats:completed").await.unwrap(), 0);
        assert_eq!(store.counter_incr("stats:completed").await.unwrap(), 1);
        assert_eq!(store.counter_incr("stats:completed").await.unwrap(), 2);
        assert_eq!(store.counter_get("stats:completed").await.unwrap(), 2);
    }
}
