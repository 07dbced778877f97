//! Per-key circuit breaker isolating failing upstreams.
//!
//! Transitions:
//! - closed -> open: consecutive failures reach the threshold with enough
//!   traffic, or the recent-window failure rate reaches 0.5.
//! - open -> half-open: the reset timeout elapses; the next call is a probe.
//! - half-open -> closed: the configured number of consecutive probe
//!   successes.
//! - half-open -> open: any probe failure, with exponential backoff of the
//!   reset timeout.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Observable circuit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitStatus {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitStatus::Closed => "closed",
            CircuitStatus::Open => "open",
            CircuitStatus::HalfOpen => "half-open",
        }
    }
}

/// Breaker tuning. Defaults match the deployment contract.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// Consecutive half-open successes before the circuit closes.
    pub success_threshold: u32,
    /// Base open duration before a half-open probe is allowed.
    pub timeout: Duration,
    /// Recent window for the failure-rate trigger.
    pub window: Duration,
    /// Minimum total requests before the circuit may open.
    pub min_request_count: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(30),
            window: Duration::from_secs(300),
            min_request_count: 5,
        }
    }
}

/// Per-key breaker state.
#[derive(Debug, Clone)]
pub struct CircuitState {
    pub status: CircuitStatus,
    /// Consecutive failures since the last success.
    pub failure_count: u32,
    /// Consecutive successes (meaningful in half-open).
    pub success_count: u32,
    pub last_failure: Option<Instant>,
    pub last_success: Option<Instant>,
    /// When an open circuit next allows a probe.
    pub next_attempt: Option<Instant>,
    pub total_requests: u64,
    pub total_failures: u64,
    pub total_successes: u64,
    /// How many times the circuit has opened; drives probe backoff.
    open_count: u32,
    /// Recent outcomes for the windowed failure-rate trigger.
    recent: VecDeque<(Instant, bool)>,
    last_activity: Instant,
}

impl CircuitState {
    fn new() -> Self {
        Self {
            status: CircuitStatus::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure: None,
            last_success: None,
            next_attempt: None,
            total_requests: 0,
            total_failures: 0,
            total_successes: 0,
            open_count: 0,
            recent: VecDeque::new(),
            last_activity: Instant::now(),
        }
    }

    fn prune_window(&mut self, now: Instant, window: Duration) {
        while let Some(&(at, _)) = self.recent.front() {
            if now.duration_since(at) > window {
                self.recent.pop_front();
            } else {
                break;
            }
        }
    }

    fn window_failure_rate(&self) -> (f64, usize) {
        let total = self.recent.len();
        if total == 0 {
            return (0.0, 0);
        }
        let failures = self.recent.iter().filter(|(_, ok)| !ok).count();
        (failures as f64 / total as f64, total)
    }
}

/// Snapshot of one circuit for the stats endpoint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CircuitSnapshot {
    pub status: CircuitStatus,
    #[serde(rename = "totalRequests")]
    pub total_requests: u64,
    #[serde(rename = "totalFailures")]
    pub total_failures: u64,
    #[serde(rename = "totalSuccesses")]
    pub total_successes: u64,
}

/// Error surfaced by the `execute` wrapper.
#[derive(Debug)]
pub enum BreakerError<E> {
    /// The circuit is open and no probe is due.
    Open,
    /// The wrapped operation failed.
    Inner(E),
}

/// Per-key circuit breaker.
pub struct CircuitBreaker {
    states: RwLock<HashMap<String, CircuitState>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Whether a call for `key` should currently be rejected. Transitions
    /// open -> half-open when the reset timeout has elapsed.
    pub fn is_open(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut states = self.states.write().expect("breaker lock poisoned");
        let state = states.entry(key.to_string()).or_insert_with(CircuitState::new);
        if state.status == CircuitStatus::Open {
            match state.next_attempt {
                Some(at) if now >= at => {
                    state.status = CircuitStatus::HalfOpen;
                    state.success_count = 0;
                    debug!(key = key, "circuit open -> half-open (probe allowed)");
                    false
                }
                _ => true,
            }
        } else {
            false
        }
    }

    pub fn status(&self, key: &str) -> CircuitStatus {
        let states = self.states.read().expect("breaker lock poisoned");
        states
            .get(key)
            .map(|s| s.status)
            .unwrap_or(CircuitStatus::Closed)
    }

    pub fn state(&self, key: &str) -> Option<CircuitState> {
        let states = self.states.read().expect("breaker lock poisoned");
        states.get(key).cloned()
    }

    pub fn record_success(&self, key: &str) {
        let now = Instant::now();
        let mut states = self.states.write().expect("breaker lock poisoned");
        let state = states.entry(key.to_string()).or_insert_with(CircuitState::new);
        state.total_requests += 1;
        state.total_successes += 1;
        state.failure_count = 0;
        state.last_success = Some(now);
        state.last_activity = now;
        state.recent.push_back((now, true));
        state.prune_window(now, self.config.window);

        if state.status == CircuitStatus::HalfOpen {
            state.success_count += 1;
            if state.success_count >= self.config.success_threshold {
                state.status = CircuitStatus::Closed;
                state.success_count = 0;
                state.open_count = 0;
                state.next_attempt = None;
                // Do not let pre-open failures immediately re-trip.
                state.recent.clear();
                debug!(key = key, "circuit half-open -> closed (recovered)");
            }
        }
    }

    pub fn record_failure(&self, key: &str) {
        let now = Instant::now();
        let mut states = self.states.write().expect("breaker lock poisoned");
        let state = states.entry(key.to_string()).or_insert_with(CircuitState::new);
        state.total_requests += 1;
        state.total_failures += 1;
        state.failure_count += 1;
        state.success_count = 0;
        state.last_failure = Some(now);
        state.last_activity = now;
        state.recent.push_back((now, false));
        state.prune_window(now, self.config.window);

        match state.status {
            CircuitStatus::HalfOpen => {
                // Probe failed: immediate re-open with exponential backoff.
                state.open_count = state.open_count.saturating_add(1);
                let backoff = exponential_backoff(self.config.timeout, state.open_count);
                state.status = CircuitStatus::Open;
                state.next_attempt = Some(now + backoff);
                warn!(
                    key = key,
                    backoff_ms = backoff.as_millis() as u64,
                    "circuit half-open -> open (probe failed)"
                );
            }
            CircuitStatus::Closed => {
                let consecutive_trip = state.failure_count >= self.config.failure_threshold
                    && state.total_requests >= self.config.min_request_count;
                let (rate, samples) = state.window_failure_rate();
                let rate_trip =
                    rate >= 0.5 && samples as u64 >= self.config.min_request_count;
                if consecutive_trip || rate_trip {
                    state.open_count = state.open_count.saturating_add(1);
                    state.status = CircuitStatus::Open;
                    state.next_attempt = Some(now + self.config.timeout);
                    warn!(
                        key = key,
                        failures = state.failure_count,
                        window_rate = rate,
                        "circuit closed -> open"
                    );
                }
            }
            CircuitStatus::Open => {}
        }
    }

    /// Restore a key to the canonical closed state with zeroed counters.
    pub fn reset(&self, key: &str) {
        let mut states = self.states.write().expect("breaker lock poisoned");
        states.insert(key.to_string(), CircuitState::new());
    }

    /// Drop state for keys idle longer than `max_age`. Returns removed count.
    pub fn cleanup_idle(&self, max_age: Duration) -> usize {
        let now = Instant::now();
        let mut states = self.states.write().expect("breaker lock poisoned");
        let before = states.len();
        states.retain(|_, s| now.duration_since(s.last_activity) < max_age);
        before - states.len()
    }

    /// Status of every tracked key, for the stats endpoint.
    pub fn summary(&self) -> HashMap<String, CircuitSnapshot> {
        let states = self.states.read().expect("breaker lock poisoned");
        states
            .iter()
            .map(|(k, s)| {
                (
                    k.clone(),
                    CircuitSnapshot {
                        status: s.status,
                        total_requests: s.total_requests,
                        total_failures: s.total_failures,
                        total_successes: s.total_successes,
                    },
                )
            })
            .collect()
    }

    /// Run `op` under the breaker for `key`, recording the outcome.
    ///
    /// An open circuit with no probe due fails fast with `BreakerError::Open`.
    pub async fn execute<T, E, F, Fut>(&self, key: &str, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if self.is_open(key) {
            return Err(BreakerError::Open);
        }
        match op().await {
            Ok(v) => {
                self.record_success(key);
                Ok(v)
            }
            Err(e) => {
                self.record_failure(key);
                Err(BreakerError::Inner(e))
            }
        }
    }

    /// Like `execute`, but an open circuit runs `fallback` instead of
    /// failing fast. A fallback failure surfaces as `BreakerError::Open`
    /// (the original condition), not the fallback's error.
    pub async fn execute_or<T, E, F, Fut, FB, FutB>(
        &self,
        key: &str,
        op: F,
        fallback: FB,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        FB: FnOnce() -> FutB,
        FutB: Future<Output = Result<T, E>>,
    {
        if self.is_open(key) {
            return match fallback().await {
                Ok(v) => Ok(v),
                Err(_) => Err(BreakerError::Open),
            };
        }
        match op().await {
            Ok(v) => {
                self.record_success(key);
                Ok(v)
            }
            Err(e) => {
                self.record_failure(key);
                Err(BreakerError::Inner(e))
            }
        }
    }
}

fn exponential_backoff(base: Duration, open_count: u32) -> Duration {
    // Cap the shift to keep the arithmetic well-defined.
    let exp = open_count.saturating_sub(1).min(8);
    base.saturating_mul(1u32 << exp)
}
