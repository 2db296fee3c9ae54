//! Per-provider circuit breaker
//!
//! Tracks consecutive failures inside a sliding window and opens the circuit
//! when the threshold is crossed. After a cooldown the breaker moves to
//! half-open and admits a single probe call; success closes it, failure
//! re-opens it. State transitions are returned to the caller so the registry
//! can turn them into audit events.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::time::TimeService;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls flow normally.
    Closed,
    /// Calls are refused until the cooldown elapses.
    Open,
    /// One probe call is admitted to test recovery.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// A recorded state transition, suitable for auditing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitTransition {
    pub provider: String,
    pub from: CircuitState,
    pub to: CircuitState,
}

/// Breaker thresholds.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failures within `window_seconds` that open the circuit.
    pub failure_threshold: u32,
    /// Sliding window over which failures are counted.
    pub window_seconds: u64,
    /// Seconds the circuit stays open before admitting a probe.
    pub cooldown_seconds: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window_seconds: 60,
            cooldown_seconds: 30,
        }
    }
}

struct Inner {
    state: CircuitState,
    failure_times: Vec<f64>,
    opened_at: f64,
}

/// Per-provider open/half-open/closed state with cooldown.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    time: Arc<dyn TimeService>,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        time: Arc<dyn TimeService>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            time,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_times: Vec::new(),
                opened_at: 0.0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, applying the open → half-open cooldown lazily.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.maybe_half_open(&mut inner);
        inner.state
    }

    /// Whether a call may proceed right now. An open breaker whose cooldown
    /// has elapsed flips to half-open and admits the call as a probe.
    pub fn allow_call(&self) -> bool {
        let mut inner = self.inner.lock();
        self.maybe_half_open(&mut inner);
        !matches!(inner.state, CircuitState::Open)
    }

    /// Record a successful call. Returns the transition if one occurred.
    pub fn record_success(&self) -> Option<CircuitTransition> {
        let mut inner = self.inner.lock();
        inner.failure_times.clear();
        if inner.state == CircuitState::HalfOpen || inner.state == CircuitState::Open {
            let from = inner.state;
            inner.state = CircuitState::Closed;
            return Some(self.transition(from, CircuitState::Closed));
        }
        None
    }

    /// Record a failed call. Returns the transition if one occurred.
    pub fn record_failure(&self) -> Option<CircuitTransition> {
        let now = self.time.timestamp();
        let mut inner = self.inner.lock();

        if inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Open;
            inner.opened_at = now;
            return Some(self.transition(CircuitState::HalfOpen, CircuitState::Open));
        }

        let window_start = now - self.config.window_seconds as f64;
        inner.failure_times.retain(|t| *t >= window_start);
        inner.failure_times.push(now);

        if inner.state == CircuitState::Closed
            && inner.failure_times.len() as u32 >= self.config.failure_threshold
        {
            inner.state = CircuitState::Open;
            inner.opened_at = now;
            return Some(self.transition(CircuitState::Closed, CircuitState::Open));
        }
        None
    }

    /// Force the breaker back to closed, clearing failure history.
    pub fn reset(&self) -> Option<CircuitTransition> {
        let mut inner = self.inner.lock();
        inner.failure_times.clear();
        if inner.state != CircuitState::Closed {
            let from = inner.state;
            inner.state = CircuitState::Closed;
            return Some(self.transition(from, CircuitState::Closed));
        }
        None
    }

    fn maybe_half_open(&self, inner: &mut Inner) {
        if inner.state == CircuitState::Open {
            let elapsed = self.time.timestamp() - inner.opened_at;
            if elapsed >= self.config.cooldown_seconds as f64 {
                inner.state = CircuitState::HalfOpen;
            }
        }
    }

    fn transition(&self, from: CircuitState, to: CircuitState) -> CircuitTransition {
        tracing::debug!(provider = %self.name, %from, %to, "circuit breaker transition");
        CircuitTransition {
            provider: self.name.clone(),
            from,
            to,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::ManualTimeService;

    fn breaker(time: Arc<ManualTimeService>) -> CircuitBreaker {
        CircuitBreaker::new("provider-a", CircuitBreakerConfig::default(), time)
    }

    #[test]
    fn test_opens_at_threshold() {
        let time = Arc::new(ManualTimeService::new());
        let cb = breaker(time.clone());

        for _ in 0..4 {
            assert!(cb.record_failure().is_none());
        }
        let transition = cb.record_failure().expect("fifth failure opens");
        assert_eq!(transition.from, CircuitState::Closed);
        assert_eq!(transition.to, CircuitState::Open);
        assert!(!cb.allow_call());
    }

    #[test]
    fn test_failures_outside_window_expire() {
        let time = Arc::new(ManualTimeService::new());
        let cb = breaker(time.clone());

        for _ in 0..4 {
            cb.record_failure();
        }
        // Old failures age out before the fifth arrives.
        time.advance_secs(61);
        assert!(cb.record_failure().is_none());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_after_cooldown() {
        let time = Arc::new(ManualTimeService::new());
        let cb = breaker(time.clone());

        for _ in 0..5 {
            cb.record_failure();
        }
        assert!(!cb.allow_call());

        time.advance_secs(30);
        assert!(cb.allow_call());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_half_open_success_closes() {
        let time = Arc::new(ManualTimeService::new());
        let cb = breaker(time.clone());

        for _ in 0..5 {
            cb.record_failure();
        }
        time.advance_secs(30);
        assert!(cb.allow_call());

        let transition = cb.record_success().expect("probe success closes");
        assert_eq!(transition.to, CircuitState::Closed);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let time = Arc::new(ManualTimeService::new());
        let cb = breaker(time.clone());

        for _ in 0..5 {
            cb.record_failure();
        }
        time.advance_secs(30);
        assert!(cb.allow_call());

        let transition = cb.record_failure().expect("probe failure reopens");
        assert_eq!(transition.from, CircuitState::HalfOpen);
        assert_eq!(transition.to, CircuitState::Open);
        assert!(!cb.allow_call());
    }

    #[test]
    fn test_reset_forces_closed() {
        let time = Arc::new(ManualTimeService::new());
        let cb = breaker(time.clone());

        for _ in 0..5 {
            cb.record_failure();
        }
        assert_eq!(cb.state(), CircuitState::Open);
        let transition = cb.reset().expect("reset transitions");
        assert_eq!(transition.to, CircuitState::Closed);
        assert!(cb.allow_call());
    }
}
