//! In-process fallback cache for coordination-store outages.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

struct Entry {
    value: String,
    expires_at: Instant,
    last_used: Instant,
}

/// LRU cache with per-entry TTL.
///
/// Populated on every successful blob write/read so that reads keep
/// working for already-seen keys while the store is down. Never used as
/// a write path.
pub struct FallbackCache {
    max_items: usize,
    default_ttl: Duration,
    entries: Mutex<HashMap<String, Entry>>,
}

impl FallbackCache {
    pub fn new(max_items: usize, default_ttl: Duration) -> Self {
        Self {
            max_items,
            default_ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn set(&self, key: &str, value: &str, ttl: Option<Duration>) {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        if entries.len() >= self.max_items && !entries.contains_key(key) {
            // Evict the least recently used entry.
            if let Some(lru_key) = entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&lru_key);
            }
        }

        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: now + ttl.unwrap_or(self.default_ttl),
                last_used: now,
            },
        );
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        match entries.get_mut(key) {
            Some(entry) if entry.expires_at > now => {
                entry.last_used = now;
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn delete(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drop expired entries. Called opportunistically by the owner.
    pub fn cleanup_expired(&self) {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        let removed = before - entries.len();
        if removed > 0 {
            debug!("Fallback cache dropped {removed} expired entries");
        }
    }
}

impl Default for FallbackCache {
    fn default() -> Self {
        Self::new(1000, Duration::from_secs(3600))
    }
}
