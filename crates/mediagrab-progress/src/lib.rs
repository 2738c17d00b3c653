//! Progress tracking for the mediagrab download service.
//!
//! Records lifecycle events and byte/percent/speed updates into the
//! coordination store and fans live deltas out to streaming subscribers.
//! Records here are best-effort and may trail the task store by
//! fractions of a second; durable truth lives in the task store.

pub mod events;
pub mod snapshot;
pub mod stream;
pub mod tracker;

pub use events::{ProgressEvent, ProgressEventKind};
pub use snapshot::ProgressSnapshot;
pub use stream::ProgressDelta;
pub use tracker::ProgressTracker;
