//! Queue statistics counters.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use mediagrab_coordination::{CoordinationStore, keys};

/// Monotonic dispatch counters plus live queue gauges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStats {
    pub active: u64,
    pub queued: u64,
    pub max_workers: u64,
    pub capacity_used: f64,
    pub enqueued: u64,
    pub completed: u64,
    pub failed: u64,
    pub retried: u64,
    pub cancelled: u64,
}

/// Counter names kept in the coordination store.
pub mod counters {
    pub const ENQUEUED: &str = "jobs:enqueued";
    pub const COMPLETED: &str = "jobs:completed";
    pub const FAILED: &str = "jobs:failed";
    pub const RETRIED: &str = "jobs:retried";
    pub const CANCELLED: &str = "jobs:cancelled";
}

/// Increment a dispatch counter, absorbing store outages.
pub async fn bump(store: &Arc<dyn CoordinationStore>, counter: &str) {
    if let Err(err) = store.counter_incr(&keys::stat(counter)).await {
        debug!("stat counter {counter} not recorded: {err}");
    }
}

/// Read the full stats block.
pub async fn collect(store: &Arc<dyn CoordinationStore>, max_workers: u64) -> QueueStats {
    let active = store.active_count().await.unwrap_or(0);
    let queued = store.queue_len().await.unwrap_or(0);

    let read = |name: &'static str| {
        let store = Arc::clone(store);
        async move { store.counter_get(&keys::stat(name)).await.unwrap_or(0) }
    };

    QueueStats {
        active,
        queued,
        max_workers,
        capacity_used: if max_workers > 0 {
            active as f64 / max_workers as f64
        } else {
            0.0
        },
        enqueued: read(counters::ENQUEUED).await,
        completed: read(counters::COMPLETED).await,
        failed: read(counters::FAILED).await,
        retried: read(counters::RETRIED).await,
        cancelled: read(counters::CANCELLED).await,
    }
}
