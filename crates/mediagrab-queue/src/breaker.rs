//! Circuit breakers for downstream dependencies.
//!
//! One breaker per logical downstream (extractor invocations as a unit,
//! the coordination store as another). Closed passes calls through and
//! counts consecutive failures; Open rejects fast until the recovery
//! window elapses; Half-Open admits a single probe.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<Instant>,
    last_failure_at: Option<Instant>,
}

/// A single circuit breaker.
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    recovery_timeout: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            failure_threshold,
            recovery_timeout,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                opened_at: None,
                last_failure_at: None,
            }),
        }
    }

    /// Whether a call may proceed. An Open breaker whose recovery window
    /// has elapsed transitions to Half-Open and admits one probe.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.recovery_timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.failure_count = 0;
                    info!("circuit {} transitioning to half-open", self.name);
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Closed;
                inner.failure_count = 0;
                inner.opened_at = None;
                info!("circuit {} recovered, now closed", self.name);
            }
            CircuitState::Closed => {
                inner.failure_count = inner.failure_count.saturating_sub(1);
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count += 1;
        inner.last_failure_at = Some(Instant::now());

        let trip = match inner.state {
            // A failed half-open probe reopens immediately.
            CircuitState::HalfOpen => true,
            CircuitState::Closed => inner.failure_count >= self.failure_threshold,
            CircuitState::Open => false,
        };

        if trip {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            error!(
                "circuit {} opened after {} failures (recovery in {:?})",
                self.name, inner.failure_count, self.recovery_timeout
            );
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_RECOVERY_TIMEOUT: Duration = Duration::from_secs(60);

/// Explicit registry passed into constructors; no hidden singletons.
#[derive(Default)]
pub struct BreakerRegistry {
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock();
        Arc::clone(breakers.entry(name.to_string()).or_insert_with(|| {
            Arc::new(CircuitBreaker::new(
                name,
                DEFAULT_FAILURE_THRESHOLD,
                DEFAULT_RECOVERY_TIMEOUT,
            ))
        }))
    }

    /// Name and state of every registered breaker, for health output.
    pub fn states(&self) -> Vec<(String, CircuitState)> {
        self.breakers
            .lock()
            .iter()
            .map(|(name, breaker)| (name.clone(), breaker.state()))
            .collect()
    }
}

/// Breaker names used by the scheduler.
pub mod names {
    pub const EXTRACTOR: &str = "extractor";
    pub const COORDINATION: &str = "coordination";
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_breaker() -> CircuitBreaker {
        CircuitBreaker::new("test", 3, Duration::from_millis(50))
    }

    #[test]
    fn test_opens_after_threshold() {
        let breaker = fast_breaker();
        assert!(breaker.allow_request());

        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow_request());
    }

    #[test]
    fn test_half_open_probe_after_recovery_window() {
        let breaker = fast_breaker();
        for _ in 0..3 {
            breaker.record_failure();
        }
        assert!(!breaker.allow_request());

        std::thread::sleep(Duration::from_millis(60));
        // Recovery window elapsed: exactly one probe admitted.
        assert!(breaker.allow_request());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_half_open_success_closes() {
        let breaker = fast_breaker();
        for _ in 0..3 {
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(60));
        assert!(breaker.allow_request());

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.allow_request());
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let breaker = fast_breaker();
        for _ in 0..3 {
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(60));
        assert!(breaker.allow_request());

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow_request());
    }

    #[test]
    fn test_success_decays_failure_count() {
        let breaker = fast_breaker();
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        // 2 - 1 + 1 = 2 < threshold 3
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_registry_reuses_instances() {
        let registry = BreakerRegistry::new();
        let a = registry.get_or_create(names::EXTRACTOR);
        let b = registry.get_or_create(names::EXTRACTOR);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.states().len(), 1);
    }
}
