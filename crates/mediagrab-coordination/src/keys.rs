//! Key naming for everything the coordination store owns.

/// Priority job queue (sorted set; lowest score pops first).
pub const QUEUE_PENDING: &str = "queue:pending";
/// Tasks currently holding a concurrency slot (set).
pub const QUEUE_ACTIVE: &str = "queue:active";

pub fn rate_limit(ip: &str) -> String {
    format!("rate_limit:{ip}")
}

pub fn progress(task_id: &str) -> String {
    format!("progress:{task_id}")
}

pub fn events(task_id: &str) -> String {
    format!("events:{task_id}")
}

pub fn api_key(key_id: &str) -> String {
    format!("auth:key:{key_id}")
}

/// Prefix for scanning issued API keys.
pub const API_KEY_PREFIX: &str = "auth:key:";

pub fn stat(name: &str) -> String {
    format!("stats:{name}")
}
