//! Resilience for calls to remote dependencies.
//!
//! [`ResilienceManager::execute_with_resilience`] composes
//! `breaker(retry(timeout(operation)))` for a named service, remembers the
//! last good result per fallback key, and turns whatever still fails into a
//! classified [`AppError`]:
//!
//! ```ignore
//! use resilient_cache::resilience::{ResilienceManager, ResilienceOptions};
//!
//! let resilience = ResilienceManager::default();
//! let listings = resilience
//!     .execute_with_resilience(
//!         || client.fetch_listings(),
//!         ResilienceOptions::new("autotrader")
//!             .timeout(Duration::from_secs(15))
//!             .fallback_cache_key("autotrader:listings"),
//!     )
//!     .await?;
//! ```

use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub mod circuit_breaker;
pub mod classify;
pub mod error_metrics;
pub mod fallback;
pub mod retry;
pub mod timeout;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitBreakerStats,
    CircuitOpenError, CircuitState, StateChange, StateListener,
};
pub use classify::{classify, AppError, Classify, ErrorCategory, ErrorSeverity, ServiceError};
pub use error_metrics::{AlertListener, CriticalAlert, ErrorAnalysis, ErrorMetrics, ErrorMetricsConfig};
pub use fallback::{FallbackCache, FallbackConfig};
pub use retry::{RetryManager, RetryOptions};
pub use timeout::{with_timeout, OperationClass, TimeoutConfig, TimeoutError, TimeoutManager};

/// Failure of one pass through the resilience pipeline.
#[derive(Debug)]
pub enum ResilienceError<E> {
    /// The service's breaker rejected the call.
    CircuitOpen(CircuitOpenError),
    /// The operation missed its deadline.
    Timeout(TimeoutError),
    /// The operation's own error.
    Operation(E),
}

impl<E> From<CircuitOpenError> for ResilienceError<E> {
    fn from(err: CircuitOpenError) -> Self {
        ResilienceError::CircuitOpen(err)
    }
}

impl<E> From<TimeoutError> for ResilienceError<E> {
    fn from(err: TimeoutError) -> Self {
        ResilienceError::Timeout(err)
    }
}

impl<E: fmt::Display> fmt::Display for ResilienceError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResilienceError::CircuitOpen(err) => err.fmt(f),
            ResilienceError::Timeout(err) => err.fmt(f),
            ResilienceError::Operation(err) => err.fmt(f),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for ResilienceError<E> {}

impl<E: Classify> Classify for ResilienceError<E> {
    fn app_error(&self) -> Option<AppError> {
        match self {
            ResilienceError::CircuitOpen(err) => Some(
                AppError::new(ErrorCategory::CircuitBreaker, err.to_string())
                    .with_service(err.service.clone()),
            ),
            ResilienceError::Timeout(err) => {
                Some(AppError::new(ErrorCategory::Timeout, err.to_string()))
            }
            ResilienceError::Operation(err) => err.app_error(),
        }
    }

    fn network_code(&self) -> Option<&str> {
        match self {
            ResilienceError::Operation(err) => err.network_code(),
            _ => None,
        }
    }

    fn http_status(&self) -> Option<u16> {
        match self {
            ResilienceError::Operation(err) => err.http_status(),
            _ => None,
        }
    }
}

/// Per-call options for [`ResilienceManager::execute_with_resilience`].
#[derive(Clone, Debug)]
pub struct ResilienceOptions<T> {
    pub service_name: String,
    /// Deadline per attempt. Takes precedence over `operation_class`.
    pub timeout: Option<Duration>,
    /// Picks the configured deadline for this kind of call when `timeout` is
    /// unset; the manager's default timeout when both are `None`.
    pub operation_class: Option<OperationClass>,
    /// Retry policy; the manager's default when `None`.
    pub retry: Option<RetryOptions>,
    /// Returned in preference to anything cached when the call fails.
    pub fallback_data: Option<T>,
    /// Successful results are remembered under this key and served when a
    /// later call fails.
    pub fallback_cache_key: Option<String>,
}

impl<T> ResilienceOptions<T> {
    pub fn new(service_name: impl Into<String>) -> Self {
        ResilienceOptions {
            service_name: service_name.into(),
            timeout: None,
            operation_class: None,
            retry: None,
            fallback_data: None,
            fallback_cache_key: None,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn operation_class(mut self, class: OperationClass) -> Self {
        self.operation_class = Some(class);
        self
    }

    pub fn retry(mut self, retry: RetryOptions) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn fallback_data(mut self, data: T) -> Self {
        self.fallback_data = Some(data);
        self
    }

    pub fn fallback_cache_key(mut self, key: impl Into<String>) -> Self {
        self.fallback_cache_key = Some(key.into());
        self
    }
}

/// Defaults and policies for a [`ResilienceManager`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResilienceConfig {
    pub circuit_breaker: CircuitBreakerConfig,
    pub retry: RetryOptions,
    pub timeout: TimeoutConfig,
    pub fallback: FallbackConfig,
    pub error_metrics: ErrorMetricsConfig,
}

impl ResilienceConfig {
    /// Validate every policy.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` describing the first invalid setting.
    pub fn validate(&self) -> crate::error::Result<()> {
        self.circuit_breaker.validate()?;
        self.retry.validate()?;
        if self.error_metrics.aggregation_window.is_zero() {
            return Err(crate::error::Error::ConfigError(
                "error aggregation window must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Summary of the resilience layer's state.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ResilienceHealth {
    /// `false` while any breaker is open.
    pub healthy: bool,
    pub open_circuits: Vec<String>,
    pub circuit_breakers: Vec<CircuitBreakerStats>,
    pub fallback_entries: usize,
    pub window_errors: u64,
}

/// Owns the breakers, fallback cache and error metrics shared by every
/// resilient call. Cheap to clone.
#[derive(Clone)]
pub struct ResilienceManager {
    config: ResilienceConfig,
    breakers: CircuitBreakerRegistry,
    fallback: FallbackCache,
    errors: ErrorMetrics,
}

impl ResilienceManager {
    pub fn new(config: ResilienceConfig) -> Self {
        ResilienceManager {
            breakers: CircuitBreakerRegistry::new(config.circuit_breaker.clone()),
            fallback: FallbackCache::new(config.fallback.clone()),
            errors: ErrorMetrics::new(config.error_metrics.clone()),
            config,
        }
    }

    /// Replace the breaker registry, e.g. to attach a state-change listener.
    pub fn with_breakers(mut self, breakers: CircuitBreakerRegistry) -> Self {
        self.breakers = breakers;
        self
    }

    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    pub fn fallback(&self) -> &FallbackCache {
        &self.fallback
    }

    pub fn error_metrics(&self) -> &ErrorMetrics {
        &self.errors
    }

    /// Start the periodic error analysis; it stops when `cancel` fires.
    pub fn start_error_analysis(&self, cancel: CancellationToken) -> JoinHandle<()> {
        self.errors.spawn_analyzer(cancel)
    }

    /// Run `operation` with breaker, retry, timeout and fallback.
    ///
    /// # Errors
    /// Returns the classified [`AppError`] when the call failed and neither
    /// explicit fallback data nor a fresh fallback cache entry was available.
    pub async fn execute_with_resilience<T, E, F, Fut>(
        &self,
        mut operation: F,
        options: ResilienceOptions<T>,
    ) -> Result<T, AppError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + fmt::Display,
        T: Clone + Send + Sync + 'static,
    {
        let ResilienceOptions {
            service_name,
            timeout,
            operation_class,
            retry,
            fallback_data,
            fallback_cache_key,
        } = options;

        let breaker = self.breakers.get(&service_name);
        let retry_manager = RetryManager::new(retry.unwrap_or_else(|| self.config.retry.clone()));
        let retry = &retry_manager;
        let deadline = timeout
            .or_else(|| operation_class.map(|class| self.config.timeout.for_class(class)))
            .unwrap_or(self.config.timeout.default);

        let result: Result<T, ResilienceError<E>> = breaker
            .execute(move || {
                retry.execute(move || {
                    let attempt = operation();
                    with_timeout(
                        async move { attempt.await.map_err(ResilienceError::Operation) },
                        deadline,
                    )
                })
            })
            .await;

        let err = match result {
            Ok(value) => {
                if let Some(key) = &fallback_cache_key {
                    self.fallback.store(key, value.clone());
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        let mut app_error = classify(&err);
        if app_error.service.is_none() {
            app_error.service = Some(service_name.clone());
        }
        self.errors.record(&app_error);

        if let Some(data) = fallback_data {
            warn!(
                "Service {} failed ({}), serving explicit fallback data",
                service_name, app_error
            );
            return Ok(data);
        }

        if let Some(key) = &fallback_cache_key {
            if let Some(data) = self.fallback.get::<T>(key) {
                warn!(
                    "Service {} failed ({}), serving cached fallback {}",
                    service_name, app_error, key
                );
                return Ok(data);
            }
        }

        error!("Service {} failed: {}", service_name, app_error);
        Err(app_error)
    }

    pub fn health(&self) -> ResilienceHealth {
        let circuit_breakers = self.breakers.snapshot();
        let open_circuits: Vec<String> = circuit_breakers
            .iter()
            .filter(|stats| stats.state == CircuitState::Open)
            .map(|stats| stats.service.clone())
            .collect();

        ResilienceHealth {
            healthy: open_circuits.is_empty(),
            open_circuits,
            circuit_breakers,
            fallback_entries: self.fallback.len(),
            window_errors: self.errors.window_total(),
        }
    }
}

impl Default for ResilienceManager {
    fn default() -> Self {
        Self::new(ResilienceConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick() -> RetryOptions {
        RetryOptions {
            max_attempts: 1,
            ..RetryOptions::default()
        }
    }

    fn unavailable() -> ServiceError {
        ServiceError::Http {
            status: 503,
            message: "service unavailable".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_fallback_wins_over_cached() {
        let manager = ResilienceManager::default();
        let options = || ResilienceOptions::new("pricing").retry(quick()).fallback_cache_key("pricing:golf");

        let fresh = manager
            .execute_with_resilience(|| async { Ok::<_, ServiceError>(18_995u32) }, options())
            .await;
        assert_eq!(fresh, Ok(18_995));

        let explicit = manager
            .execute_with_resilience(
                || async { Err::<u32, _>(unavailable()) },
                options().fallback_data(0),
            )
            .await;
        assert_eq!(explicit, Ok(0));

        let cached = manager
            .execute_with_resilience(|| async { Err::<u32, _>(unavailable()) }, options())
            .await;
        assert_eq!(cached, Ok(18_995));
    }

    #[tokio::test(start_paused = true)]
    async fn test_classified_error_without_fallback() {
        let manager = ResilienceManager::default();
        let err = manager
            .execute_with_resilience(
                || async { Err::<u32, _>(unavailable()) },
                ResilienceOptions::new("pricing").retry(quick()),
            )
            .await
            .unwrap_err();

        assert_eq!(err.category, ErrorCategory::ExternalService);
        assert_eq!(err.service.as_deref(), Some("pricing"));
        assert_eq!(
            manager
                .error_metrics()
                .total_for(ErrorCategory::ExternalService, ErrorSeverity::High),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_fallback_not_served() {
        let manager = ResilienceManager::default();
        let options = || ResilienceOptions::new("dvla").retry(quick()).fallback_cache_key("dvla:AB12CDE");

        manager
            .execute_with_resilience(|| async { Ok::<_, ServiceError>("Ford Focus".to_string()) }, options())
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(3601)).await;
        let result = manager
            .execute_with_resilience(|| async { Err::<String, _>(unavailable()) }, options())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_retried_then_classified() {
        let manager = ResilienceManager::default();
        let calls = AtomicU32::new(0);

        let err = manager
            .execute_with_resilience(
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok::<u32, ServiceError>(1)
                },
                ResilienceOptions::new("slow")
                    .timeout(Duration::from_secs(1))
                    .retry(RetryOptions {
                        jitter: false,
                        ..RetryOptions::default()
                    }),
            )
            .await
            .unwrap_err();

        assert_eq!(err.category, ErrorCategory::Timeout);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_operation_class_selects_deadline() {
        let manager = ResilienceManager::default();
        let slow_query = || async {
            tokio::time::sleep(Duration::from_secs(20)).await;
            Ok::<u32, ServiceError>(1)
        };

        let started = tokio::time::Instant::now();
        let err = manager
            .execute_with_resilience(
                slow_query,
                ResilienceOptions::new("stock-db")
                    .operation_class(OperationClass::Database)
                    .retry(quick()),
            )
            .await
            .unwrap_err();
        assert_eq!(err.category, ErrorCategory::Timeout);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(10) && elapsed < Duration::from_secs(11));

        // The default class deadline (30s) lets the same call finish.
        let ok = manager
            .execute_with_resilience(slow_query, ResilienceOptions::new("stock-db").retry(quick()))
            .await;
        assert_eq!(ok, Ok(1));

        // An explicit timeout wins over the class.
        let started = tokio::time::Instant::now();
        let err = manager
            .execute_with_resilience(
                slow_query,
                ResilienceOptions::new("stock-db")
                    .operation_class(OperationClass::FileOperation)
                    .timeout(Duration::from_secs(2))
                    .retry(quick()),
            )
            .await
            .unwrap_err();
        assert_eq!(err.category, ErrorCategory::Timeout);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(2) && elapsed < Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_breaker_is_classified() {
        let manager = ResilienceManager::new(ResilienceConfig {
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: 2,
                ..CircuitBreakerConfig::default()
            },
            ..ResilienceConfig::default()
        });
        let calls = AtomicU32::new(0);
        let call = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<u32, _>(unavailable())
        };

        for _ in 0..2 {
            let _ = manager
                .execute_with_resilience(call, ResilienceOptions::new("finance").retry(quick()))
                .await;
        }
        let err = manager
            .execute_with_resilience(call, ResilienceOptions::new("finance").retry(quick()))
            .await
            .unwrap_err();

        assert_eq!(err.category, ErrorCategory::CircuitBreaker);
        assert_eq!(err.severity, ErrorSeverity::High);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let health = manager.health();
        assert!(!health.healthy);
        assert_eq!(health.open_circuits, vec!["finance".to_string()]);
    }
}
