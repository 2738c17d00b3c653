//! Job queue and scheduler for the mediagrab download service.
//!
//! One supervisory loop dispatches queued jobs into N concurrency slots,
//! driving each task through its state machine: claim into the active
//! set, flip to downloading, stream progress, finalize exactly once.
//! Transient failures are re-enqueued with a priority penalty; permanent
//! ones surface as failed tasks. Circuit breakers guard the extractor
//! and the coordination store, a liveness loop recovers stuck slots, and
//! a periodic sweep garbage-collects expired artefacts.

pub mod breaker;
pub mod cleanup;
pub mod job;
pub mod queue;
pub mod scheduler;
pub mod stats;
pub mod supervisor;

pub use breaker::{BreakerRegistry, CircuitBreaker, CircuitState};
pub use cleanup::{CleanupConfig, CleanupSweep};
pub use job::Job;
pub use queue::JobQueue;
pub use scheduler::{Scheduler, SchedulerConfig};
pub use stats::QueueStats;
pub use supervisor::WorkerSupervisor;
