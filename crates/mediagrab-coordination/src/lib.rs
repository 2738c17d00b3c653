//! Volatile coordination store for the mediagrab download service.
//!
//! Owns everything short-lived and shared: the priority job queue, the
//! active-task set, progress snapshots, rate-limit counters and API-key
//! records. Two backends implement [`CoordinationStore`]: Redis for
//! production and an in-memory store for tests and single-node dev runs.
//!
//! The Redis backend retries transient failures with capped backoff and
//! serves reads from an in-process LRU fallback cache while the server is
//! unreachable. Writes during an outage surface
//! [`CoordinationError::Unavailable`] for the caller to classify.

pub mod error;
pub mod fallback;
pub mod in_memory;
pub mod keys;
pub mod redis_store;
pub mod traits;

pub use error::CoordinationError;
pub use fallback::FallbackCache;
pub use in_memory::InMemoryCoordination;
pub use redis_store::{RedisCoordination, RedisCoordinationConfig};
pub use traits::CoordinationStore;
