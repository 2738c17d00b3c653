//! Redis coordination backend.
//!
//! All operations go through a shared `ConnectionManager` (automatic
//! reconnection) and retry transient failures with the shared capped
//! backoff. Blob reads fall back to the in-process cache during an
//! outage so progress polling keeps answering for known tasks.

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::CoordinationError;
use crate::fallback::FallbackCache;
use crate::traits::CoordinationStore;
use mediagrab_types::RetryPolicy;

/// Configuration for the Redis coordination backend.
#[derive(Debug, Clone)]
pub struct RedisCoordinationConfig {
    /// Connection string, e.g. `redis://127.0.0.1:6379/0`.
    pub redis_url: String,
    /// Fallback cache capacity.
    pub fallback_max_items: usize,
    /// Fallback cache default TTL.
    pub fallback_ttl: Duration,
}

impl Default for RedisCoordinationConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379/0".to_string(),
            fallback_max_items: 1000,
            fallback_ttl: Duration::from_secs(3600),
        }
    }
}

/// Redis implementation of [`CoordinationStore`].
pub struct RedisCoordination {
    manager: ConnectionManager,
    retry: RetryPolicy,
    fallback: FallbackCache,
}

impl RedisCoordination {
    /// Connect with custom configuration. Fails fast when the server is
    /// unreachable; startup handles its own retry loop.
    pub async fn with_config(config: RedisCoordinationConfig) -> Result<Self, CoordinationError> {
        info!("Connecting to Redis coordination store");
        let client = redis::Client::open(config.redis_url.as_str())?;
        let manager = client.get_connection_manager().await?;

        let store = Self {
            manager,
            retry: RetryPolicy::default(),
            fallback: FallbackCache::new(config.fallback_max_items, config.fallback_ttl),
        };
        info!("Redis coordination store connected");
        Ok(store)
    }

    pub async fn connect(redis_url: &str) -> Result<Self, CoordinationError> {
        Self::with_config(RedisCoordinationConfig {
            redis_url: redis_url.to_string(),
            ..Default::default()
        })
        .await
    }
}

#[async_trait]
impl CoordinationStore for RedisCoordination {
    fn backend_name(&self) -> &'static str {
        "redis"
    }

    async fn incr_with_ttl(&self, key: &str, window_secs: u64) -> Result<u64, CoordinationError> {
        self.retry
            .run("coord.incr_with_ttl", || {
                let mut con = self.manager.clone();
                let key = key.to_string();
                async move {
                    let count: u64 = con.incr(&key, 1).await?;
                    if count == 1 {
                        let _: bool = con.expire(&key, window_secs as i64).await?;
                    }
                    Ok::<_, CoordinationError>(count)
                }
            })
            .await
    }

    async fn queue_add(&self, member: &str, score: f64) -> Result<(), CoordinationError> {
        self.retry
            .run("coord.queue_add", || {
                let mut con = self.manager.clone();
                let member = member.to_string();
                async move {
                    let _: i64 = con.zadd(crate::keys::QUEUE_PENDING, &member, score).await?;
                    Ok::<_, CoordinationError>(())
                }
            })
            .await
    }

    async fn queue_pop_min(&self) -> Result<Option<String>, CoordinationError> {
        self.retry
            .run("coord.queue_pop_min", || {
                let mut con = self.manager.clone();
                async move {
                    let popped: Vec<(String, f64)> =
                        con.zpopmin(crate::keys::QUEUE_PENDING, 1).await?;
                    Ok::<_, CoordinationError>(popped.into_iter().next().map(|(member, _)| member))
                }
            })
            .await
    }

    async fn queue_remove(&self, member: &str) -> Result<bool, CoordinationError> {
        self.retry
            .run("coord.queue_remove", || {
                let mut con = self.manager.clone();
                let member = member.to_string();
                async move {
                    let removed: i64 = con.zrem(crate::keys::QUEUE_PENDING, &member).await?;
                    Ok::<_, CoordinationError>(removed > 0)
                }
            })
            .await
    }

    async fn queue_len(&self) -> Result<u64, CoordinationError> {
        let mut con = self.manager.clone();
        let len: u64 = con.zcard(crate::keys::QUEUE_PENDING).await?;
        Ok(len)
    }

    async fn queue_snapshot(&self) -> Result<Vec<String>, CoordinationError> {
        let mut con = self.manager.clone();
        let members: Vec<String> = con.zrange(crate::keys::QUEUE_PENDING, 0, -1).await?;
        Ok(members)
    }

    async fn active_add(&self, task_id: &str) -> Result<bool, CoordinationError> {
        self.retry
            .run("coord.active_add", || {
                let mut con = self.manager.clone();
                let task_id = task_id.to_string();
                async move {
                    let added: i64 = con.sadd(crate::keys::QUEUE_ACTIVE, &task_id).await?;
                    Ok::<_, CoordinationError>(added > 0)
                }
            })
            .await
    }

    async fn active_remove(&self, task_id: &str) -> Result<bool, CoordinationError> {
        self.retry
            .run("coord.active_remove", || {
                let mut con = self.manager.clone();
                let task_id = task_id.to_string();
                async move {
                    let removed: i64 = con.srem(crate::keys::QUEUE_ACTIVE, &task_id).await?;
                    Ok::<_, CoordinationError>(removed > 0)
                }
            })
            .await
    }

    async fn active_count(&self) -> Result<u64, CoordinationError> {
        let mut con = self.manager.clone();
        let count: u64 = con.scard(crate::keys::QUEUE_ACTIVE).await?;
        Ok(count)
    }

    async fn active_members(&self) -> Result<Vec<String>, CoordinationError> {
        let mut con = self.manager.clone();
        let members: Vec<String> = con.smembers(crate::keys::QUEUE_ACTIVE).await?;
        Ok(members)
    }

    async fn blob_set(
        &self,
        key: &str,
        value: &str,
        ttl_secs: u64,
    ) -> Result<(), CoordinationError> {
        let result = self
            .retry
            .run("coord.blob_set", || {
                let mut con = self.manager.clone();
                let key = key.to_string();
                let value = value.to_string();
                async move {
                    let _: () = con.set_ex(&key, &value, ttl_secs).await?;
                    Ok::<_, CoordinationError>(())
                }
            })
            .await;

        if result.is_ok() {
            self.fallback
                .set(key, value, Some(Duration::from_secs(ttl_secs)));
        }
        result
    }

    async fn blob_get(&self, key: &str) -> Result<Option<String>, CoordinationError> {
        let result = self
            .retry
            .run("coord.blob_get", || {
                let mut con = self.manager.clone();
                let key = key.to_string();
                async move {
                    let value: Option<String> = con.get(&key).await?;
                    Ok::<_, CoordinationError>(value)
                }
            })
            .await;

        match result {
            Ok(Some(value)) => {
                self.fallback.set(key, &value, None);
                Ok(Some(value))
            }
            Ok(None) => Ok(None),
            Err(err) => match self.fallback.get(key) {
                Some(cached) => {
                    warn!("Coordination store unavailable, serving {key} from fallback cache");
                    Ok(Some(cached))
                }
                None => Err(err),
            },
        }
    }

    async fn blob_delete(&self, key: &str) -> Result<(), CoordinationError> {
        self.fallback.delete(key);
        self.retry
            .run("coord.blob_delete", || {
                let mut con = self.manager.clone();
                let key = key.to_string();
                async move {
                    let _: i64 = con.del(&key).await?;
                    Ok::<_, CoordinationError>(())
                }
            })
            .await
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, CoordinationError> {
        let mut con = self.manager.clone();
        let pattern = format!("{prefix}*");
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut con)
                .await?;
            keys.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        Ok(keys)
    }

    async fn counter_incr(&self, key: &str) -> Result<u64, CoordinationError> {
        let mut con = self.manager.clone();
        let count: u64 = con.incr(key, 1).await?;
        Ok(count)
    }

    async fn counter_get(&self, key: &str) -> Result<u64, CoordinationError> {
        let mut con = self.manager.clone();
        let count: Option<u64> = con.get(key).await?;
        Ok(count.unwrap_or(0))
    }

    async fn ping(&self) -> Result<(), CoordinationError> {
        let mut con = self.manager.clone();
        let _: String = redis::cmd("PING").query_async(&mut con).await?;
        Ok(())
    }
}
