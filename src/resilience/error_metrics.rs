//! Aggregated counts of classified errors.
//!
//! Errors are bucketed by (category, severity). Each bucket carries a window
//! count that [`ErrorMetrics::analyze`] sums and resets, and a lifetime count
//! kept until the bucket has been idle for the retention period.

use super::classify::{AppError, ErrorCategory, ErrorSeverity};
use crate::entry::now_millis;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorMetricsConfig {
    /// How often the analyzer runs and resets the window counters.
    pub aggregation_window: Duration,
    /// Critical errors per window above which an alert is raised.
    pub critical_threshold: u64,
    /// Buckets idle longer than this are purged.
    pub retention: Duration,
}

impl Default for ErrorMetricsConfig {
    fn default() -> Self {
        ErrorMetricsConfig {
            aggregation_window: Duration::from_secs(5 * 60),
            critical_threshold: 10,
            retention: Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[derive(Debug)]
struct ErrorBucket {
    window_count: u64,
    total_count: u64,
    first_seen: u64,
    last_seen: u64,
    last_seen_at: Instant,
}

/// Summary produced by one analysis pass.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ErrorAnalysis {
    pub total_errors: u64,
    pub by_category: BTreeMap<ErrorCategory, u64>,
    pub by_severity: BTreeMap<ErrorSeverity, u64>,
    pub critical_errors: u64,
    pub threshold_exceeded: bool,
    pub purged_buckets: usize,
}

/// Raised when critical errors in a window exceed the threshold.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CriticalAlert {
    pub critical_errors: u64,
    pub threshold: u64,
    pub window: Duration,
}

pub type AlertListener = Arc<dyn Fn(&CriticalAlert) + Send + Sync>;

#[derive(Clone)]
pub struct ErrorMetrics {
    buckets: Arc<DashMap<(ErrorCategory, ErrorSeverity), ErrorBucket>>,
    config: ErrorMetricsConfig,
    listener: Arc<Mutex<Option<AlertListener>>>,
}

impl ErrorMetrics {
    pub fn new(config: ErrorMetricsConfig) -> Self {
        ErrorMetrics {
            buckets: Arc::new(DashMap::new()),
            config,
            listener: Arc::new(Mutex::new(None)),
        }
    }

    pub fn config(&self) -> &ErrorMetricsConfig {
        &self.config
    }

    pub fn set_alert_listener(&self, listener: AlertListener) {
        *self.listener.lock() = Some(listener);
    }

    pub fn record(&self, error: &AppError) {
        let now = Instant::now();
        let wall = now_millis();
        let mut bucket = self
            .buckets
            .entry((error.category, error.severity))
            .or_insert_with(|| ErrorBucket {
                window_count: 0,
                total_count: 0,
                first_seen: wall,
                last_seen: wall,
                last_seen_at: now,
            });
        bucket.window_count += 1;
        bucket.total_count += 1;
        bucket.last_seen = wall;
        bucket.last_seen_at = now;
    }

    /// Errors recorded since the last analysis.
    pub fn window_total(&self) -> u64 {
        self.buckets.iter().map(|b| b.window_count).sum()
    }

    /// Lifetime count for one bucket.
    pub fn total_for(&self, category: ErrorCategory, severity: ErrorSeverity) -> u64 {
        self.buckets
            .get(&(category, severity))
            .map(|b| b.total_count)
            .unwrap_or(0)
    }

    /// Sum and reset the window counters, alert on excess critical errors,
    /// and purge idle buckets.
    pub fn analyze(&self) -> ErrorAnalysis {
        let mut analysis = ErrorAnalysis::default();

        for mut bucket in self.buckets.iter_mut() {
            let (category, severity) = *bucket.key();
            let count = std::mem::take(&mut bucket.window_count);
            if count == 0 {
                continue;
            }
            analysis.total_errors += count;
            *analysis.by_category.entry(category).or_default() += count;
            *analysis.by_severity.entry(severity).or_default() += count;
            if severity == ErrorSeverity::Critical {
                analysis.critical_errors += count;
            }
        }

        let retention = self.config.retention;
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| bucket.last_seen_at.elapsed() <= retention);
        analysis.purged_buckets = before.saturating_sub(self.buckets.len());

        if analysis.critical_errors > self.config.critical_threshold {
            analysis.threshold_exceeded = true;
            let alert = CriticalAlert {
                critical_errors: analysis.critical_errors,
                threshold: self.config.critical_threshold,
                window: self.config.aggregation_window,
            };
            error!(
                "Critical error threshold exceeded: {} critical errors in {:?} (threshold {})",
                alert.critical_errors, alert.window, alert.threshold
            );
            let listener = self.listener.lock().clone();
            if let Some(listener) = listener {
                listener(&alert);
            }
        }

        if analysis.total_errors > 0 {
            info!(
                "Error analysis: {} errors in window ({} critical)",
                analysis.total_errors, analysis.critical_errors
            );
        }
        analysis
    }

    /// Run [`analyze`](Self::analyze) every aggregation window until `cancel`
    /// fires.
    pub fn spawn_analyzer(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let metrics = self.clone();
        let period = self.config.aggregation_window;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Error analyzer stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        metrics.analyze();
                    }
                }
            }
        })
    }
}

impl Default for ErrorMetrics {
    fn default() -> Self {
        Self::new(ErrorMetricsConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn critical() -> AppError {
        AppError::database("replica lag").with_severity(ErrorSeverity::Critical)
    }

    #[tokio::test(start_paused = true)]
    async fn test_analyze_sums_and_resets_window() {
        let metrics = ErrorMetrics::default();
        metrics.record(&AppError::validation("bad postcode"));
        metrics.record(&AppError::validation("bad postcode"));
        metrics.record(&AppError::not_found("no such vehicle"));

        let analysis = metrics.analyze();
        assert_eq!(analysis.total_errors, 3);
        assert_eq!(analysis.by_category.get(&ErrorCategory::Validation), Some(&2));
        assert_eq!(analysis.by_severity.get(&ErrorSeverity::Low), Some(&3));
        assert!(!analysis.threshold_exceeded);

        assert_eq!(metrics.window_total(), 0);
        assert_eq!(metrics.total_for(ErrorCategory::Validation, ErrorSeverity::Low), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_critical_threshold_alert() {
        let metrics = ErrorMetrics::default();
        let alerts = Arc::new(AtomicU64::new(0));
        let seen = Arc::clone(&alerts);
        metrics.set_alert_listener(Arc::new(move |alert: &CriticalAlert| {
            seen.store(alert.critical_errors, Ordering::SeqCst);
        }));

        for _ in 0..10 {
            metrics.record(&critical());
        }
        assert!(!metrics.analyze().threshold_exceeded);

        for _ in 0..11 {
            metrics.record(&critical());
        }
        assert!(metrics.analyze().threshold_exceeded);
        assert_eq!(alerts.load(Ordering::SeqCst), 11);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_buckets_purged() {
        let metrics = ErrorMetrics::default();
        metrics.record(&AppError::internal("boom"));

        tokio::time::advance(Duration::from_secs(25 * 60 * 60)).await;
        let analysis = metrics.analyze();
        assert_eq!(analysis.total_errors, 1);
        assert_eq!(analysis.purged_buckets, 1);
        assert_eq!(metrics.total_for(ErrorCategory::Internal, ErrorSeverity::Medium), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_analyzer_runs_each_window() {
        let metrics = ErrorMetrics::default();
        let cancel = CancellationToken::new();
        let handle = metrics.spawn_analyzer(cancel.clone());

        metrics.record(&AppError::internal("boom"));
        tokio::time::sleep(Duration::from_secs(5 * 60 + 1)).await;
        assert_eq!(metrics.window_total(), 0);

        cancel.cancel();
        handle.await.expect("analyzer task panicked");
    }
}
