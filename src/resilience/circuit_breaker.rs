//! Per-service circuit breaker.
//!
//! ```text
//!            failures >= threshold
//!   Closed ───────────────────────────▶ Open
//!     ▲                                  │ now >= next_attempt_at
//!     │ successes >= half_open_max_calls ▼
//!     └────────────────────────────── HalfOpen ──any failure──▶ Open
//! ```
//!
//! Breakers are in-process. Each instance of the application keeps its own
//! view of a dependency's health.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_RECOVERY_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_HALF_OPEN_MAX_CALLS: u32 = 3;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open a closed breaker.
    pub failure_threshold: u32,
    /// How long an open breaker rejects calls before probing.
    pub recovery_timeout: Duration,
    /// Successful probes needed to close a half-open breaker.
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        CircuitBreakerConfig {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            recovery_timeout: DEFAULT_RECOVERY_TIMEOUT,
            half_open_max_calls: DEFAULT_HALF_OPEN_MAX_CALLS,
        }
    }
}

impl CircuitBreakerConfig {
    /// Validate configuration.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` for zero thresholds.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.failure_threshold == 0 {
            return Err(crate::error::Error::ConfigError(
                "circuit breaker failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.half_open_max_calls == 0 {
            return Err(crate::error::Error::ConfigError(
                "circuit breaker half_open_max_calls must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        };
        f.write_str(s)
    }
}

/// Emitted on every state transition, never on a call that leaves the state
/// unchanged.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateChange {
    pub service: String,
    pub from: CircuitState,
    pub to: CircuitState,
    pub failure_count: u32,
}

pub type StateListener = Arc<dyn Fn(&StateChange) + Send + Sync>;

/// Returned without invoking the operation while the breaker is open.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CircuitOpenError {
    pub service: String,
    /// Time left until the breaker lets a probe through.
    pub retry_after: Duration,
}

impl fmt::Display for CircuitOpenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Circuit breaker is OPEN for {}, next attempt in {:?}",
            self.service, self.retry_after
        )
    }
}

impl std::error::Error for CircuitOpenError {}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
    next_attempt_at: Option<Instant>,
    half_open_success_count: u32,
}

impl BreakerState {
    fn closed() -> Self {
        BreakerState {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_at: None,
            next_attempt_at: None,
            half_open_success_count: 0,
        }
    }
}

/// Point-in-time view of one breaker.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CircuitBreakerStats {
    pub service: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub half_open_success_count: u32,
    pub total_calls: u64,
    pub total_failures: u64,
    pub total_rejections: u64,
    /// Time since the most recent failure.
    pub since_last_failure: Option<Duration>,
    /// Time left before an open breaker admits a probe.
    pub next_attempt_in: Option<Duration>,
}

pub struct CircuitBreaker {
    service: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
    listener: Option<StateListener>,
    total_calls: AtomicU64,
    total_failures: AtomicU64,
    total_rejections: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(service: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        CircuitBreaker {
            service: service.into(),
            config,
            state: Mutex::new(BreakerState::closed()),
            listener: None,
            total_calls: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            total_rejections: AtomicU64::new(0),
        }
    }

    /// Deliver every state transition to `listener` as well as the log.
    pub fn with_listener(mut self, listener: StateListener) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        self.state.lock().state
    }

    /// Run `operation` under the breaker.
    ///
    /// While open and before the recovery deadline the operation is not
    /// invoked and a [`CircuitOpenError`] is converted into `E`. Otherwise the
    /// operation's own result is returned unchanged after being recorded.
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CircuitOpenError>,
    {
        self.try_acquire().map_err(E::from)?;
        self.total_calls.fetch_add(1, Ordering::Relaxed);

        match operation().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(err) => {
                self.on_failure();
                Err(err)
            }
        }
    }

    fn try_acquire(&self) -> Result<(), CircuitOpenError> {
        let now = Instant::now();
        let change = {
            let mut state = self.state.lock();
            if state.state != CircuitState::Open {
                return Ok(());
            }
            match state.next_attempt_at {
                Some(next) if now < next => {
                    self.total_rejections.fetch_add(1, Ordering::Relaxed);
                    return Err(CircuitOpenError {
                        service: self.service.clone(),
                        retry_after: next - now,
                    });
                }
                _ => {
                    state.half_open_success_count = 0;
                    self.transition(&mut state, CircuitState::HalfOpen)
                }
            }
        };
        self.notify(change);
        Ok(())
    }

    fn on_success(&self) {
        let change = {
            let mut state = self.state.lock();
            match state.state {
                CircuitState::Closed => {
                    state.failure_count = 0;
                    None
                }
                CircuitState::HalfOpen => {
                    state.half_open_success_count += 1;
                    if state.half_open_success_count >= self.config.half_open_max_calls {
                        state.failure_count = 0;
                        state.half_open_success_count = 0;
                        state.next_attempt_at = None;
                        self.transition(&mut state, CircuitState::Closed)
                    } else {
                        None
                    }
                }
                // A call admitted before the breaker opened; the probe
                // schedule stays as it is.
                CircuitState::Open => None,
            }
        };
        self.notify(change);
    }

    fn on_failure(&self) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        let change = {
            let mut state = self.state.lock();
            state.failure_count = state.failure_count.saturating_add(1);
            state.last_failure_at = Some(now);

            let should_open = match state.state {
                CircuitState::Closed => state.failure_count >= self.config.failure_threshold,
                CircuitState::HalfOpen => true,
                CircuitState::Open => false,
            };

            if should_open || state.state == CircuitState::Open {
                state.next_attempt_at = Some(now + self.config.recovery_timeout);
            }
            if should_open {
                state.half_open_success_count = 0;
                self.transition(&mut state, CircuitState::Open)
            } else {
                None
            }
        };
        self.notify(change);
    }

    fn transition(&self, state: &mut BreakerState, to: CircuitState) -> Option<StateChange> {
        let from = state.state;
        if from == to {
            return None;
        }
        state.state = to;
        Some(StateChange {
            service: self.service.clone(),
            from,
            to,
            failure_count: state.failure_count,
        })
    }

    fn notify(&self, change: Option<StateChange>) {
        let Some(change) = change else {
            return;
        };
        match change.to {
            CircuitState::Open => warn!(
                "Circuit breaker for {} OPEN after {} failures (was {})",
                change.service, change.failure_count, change.from
            ),
            CircuitState::HalfOpen => {
                info!("Circuit breaker for {} HALF_OPEN, probing", change.service)
            }
            CircuitState::Closed => info!("Circuit breaker for {} CLOSED", change.service),
        }
        if let Some(listener) = &self.listener {
            listener(&change);
        }
    }

    /// Force the breaker closed and clear its counters.
    pub fn reset(&self) {
        let change = {
            let mut state = self.state.lock();
            let change = self.transition(&mut state, CircuitState::Closed);
            *state = BreakerState::closed();
            change
        };
        self.notify(change);
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let now = Instant::now();
        let state = self.state.lock();
        CircuitBreakerStats {
            service: self.service.clone(),
            state: state.state,
            failure_count: state.failure_count,
            half_open_success_count: state.half_open_success_count,
            total_calls: self.total_calls.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            total_rejections: self.total_rejections.load(Ordering::Relaxed),
            since_last_failure: state.last_failure_at.map(|at| now.saturating_duration_since(at)),
            next_attempt_in: match state.state {
                CircuitState::Open => state.next_attempt_at.map(|at| at.saturating_duration_since(now)),
                _ => None,
            },
        }
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("service", &self.service)
            .field("config", &self.config)
            .field("state", &*self.state.lock())
            .finish()
    }
}

/// Breakers keyed by service name, created on first use.
#[derive(Clone)]
pub struct CircuitBreakerRegistry {
    breakers: Arc<DashMap<String, Arc<CircuitBreaker>>>,
    config: CircuitBreakerConfig,
    listener: Option<StateListener>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        CircuitBreakerRegistry {
            breakers: Arc::new(DashMap::new()),
            config,
            listener: None,
        }
    }

    /// Listener attached to every breaker created from now on.
    pub fn with_listener(mut self, listener: StateListener) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn get(&self, service: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.get(service) {
            return Arc::clone(breaker.value());
        }
        let entry = self.breakers.entry(service.to_string()).or_insert_with(|| {
            debug!("Creating circuit breaker for {}", service);
            let breaker = CircuitBreaker::new(service, self.config.clone());
            let breaker = match &self.listener {
                Some(listener) => breaker.with_listener(Arc::clone(listener)),
                None => breaker,
            };
            Arc::new(breaker)
        });
        Arc::clone(entry.value())
    }

    /// Reset one breaker. Returns `false` if the service has none yet.
    pub fn reset(&self, service: &str) -> bool {
        match self.breakers.get(service) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    pub fn reset_all(&self) {
        for breaker in self.breakers.iter() {
            breaker.reset();
        }
    }

    /// Stats of every breaker, ordered by service name.
    pub fn snapshot(&self) -> Vec<CircuitBreakerStats> {
        let mut stats: Vec<_> = self.breakers.iter().map(|b| b.stats()).collect();
        stats.sort_by(|a, b| a.service.cmp(&b.service));
        stats
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
