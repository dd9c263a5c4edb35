//! Runtime configuration.
//!
//! [`Settings`] groups the cache and resilience settings. Every value has a
//! default; [`Settings::from_env`] overrides them from environment variables
//! and fails on values that do not parse.
//!
//! | Variable | Default |
//! |---|---|
//! | `CACHE_NAMESPACE` | `cache` |
//! | `CACHE_TTL_STATIC` / `_VEHICLE` / `_SEARCH` / `_USER` / `_DYNAMIC` / `_ANALYTICS` / `_EXTERNAL` | 86400 / 1800 / 300 / 900 / 60 / 600 / 3600 s |
//! | `CACHE_COMPRESSION_ENABLED` | `true` |
//! | `CACHE_COMPRESSION_THRESHOLD` | 1024 bytes |
//! | `CACHE_MAX_RESPONSE_SAMPLES` | 100 |
//! | `CACHE_TAG_INDEX_MARGIN` | 300 s |
//! | `CIRCUIT_BREAKER_FAILURE_THRESHOLD` | 5 |
//! | `CIRCUIT_BREAKER_RECOVERY_TIMEOUT_MS` | 60000 |
//! | `CIRCUIT_BREAKER_HALF_OPEN_MAX_CALLS` | 3 |
//! | `RETRY_MAX_ATTEMPTS` | 3 |
//! | `RETRY_BASE_DELAY_MS` / `RETRY_MAX_DELAY_MS` | 1000 / 30000 |
//! | `RETRY_BACKOFF_MULTIPLIER` | 2 |
//! | `RETRY_JITTER` | `true` |
//! | `TIMEOUT_DEFAULT_MS` / `_DATABASE_MS` / `_EXTERNAL_API_MS` / `_FILE_OPERATION_MS` | 30000 / 10000 / 15000 / 60000 |
//! | `FALLBACK_CACHE_TTL_SECONDS` | 3600 |
//! | `ERROR_AGGREGATION_WINDOW_MS` | 300000 |
//! | `ERROR_CRITICAL_THRESHOLD` | 10 |
//! | `ERROR_RETENTION_SECONDS` | 86400 |

use crate::error::{Error, Result};
use crate::observability::DEFAULT_RESPONSE_SAMPLES;
use crate::resilience::{
    CircuitBreakerConfig, ErrorMetricsConfig, FallbackConfig, ResilienceConfig, RetryOptions,
    TimeoutConfig,
};
use crate::serialization::compression::DEFAULT_COMPRESSION_THRESHOLD;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

/// Kinds of data with their own freshness requirements.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DataCategory {
    /// Reference data that rarely changes (makes, models, branches).
    Static,
    Vehicle,
    Search,
    User,
    /// Fast-moving values such as availability or counters.
    Dynamic,
    Analytics,
    /// Responses from third-party APIs.
    External,
}

impl DataCategory {
    pub const ALL: [DataCategory; 7] = [
        DataCategory::Static,
        DataCategory::Vehicle,
        DataCategory::Search,
        DataCategory::User,
        DataCategory::Dynamic,
        DataCategory::Analytics,
        DataCategory::External,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataCategory::Static => "static",
            DataCategory::Vehicle => "vehicle",
            DataCategory::Search => "search",
            DataCategory::User => "user",
            DataCategory::Dynamic => "dynamic",
            DataCategory::Analytics => "analytics",
            DataCategory::External => "external",
        }
    }
}

/// TTL in seconds per [`DataCategory`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TtlConfig {
    pub static_data: u64,
    pub vehicle: u64,
    pub search: u64,
    pub user: u64,
    pub dynamic: u64,
    pub analytics: u64,
    pub external: u64,
}

impl Default for TtlConfig {
    fn default() -> Self {
        TtlConfig {
            static_data: 86_400,
            vehicle: 1_800,
            search: 300,
            user: 900,
            dynamic: 60,
            analytics: 600,
            external: 3_600,
        }
    }
}

impl TtlConfig {
    pub fn for_category(&self, category: DataCategory) -> u64 {
        match category {
            DataCategory::Static => self.static_data,
            DataCategory::Vehicle => self.vehicle,
            DataCategory::Search => self.search,
            DataCategory::User => self.user,
            DataCategory::Dynamic => self.dynamic,
            DataCategory::Analytics => self.analytics,
            DataCategory::External => self.external,
        }
    }

    fn slot(&mut self, category: DataCategory) -> &mut u64 {
        match category {
            DataCategory::Static => &mut self.static_data,
            DataCategory::Vehicle => &mut self.vehicle,
            DataCategory::Search => &mut self.search,
            DataCategory::User => &mut self.user,
            DataCategory::Dynamic => &mut self.dynamic,
            DataCategory::Analytics => &mut self.analytics,
            DataCategory::External => &mut self.external,
        }
    }
}

/// Settings for [`CacheEngine`](crate::CacheEngine).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheConfig {
    /// Prefix of every value key: `<namespace>:<logical-key>`.
    pub namespace: String,
    pub ttl: TtlConfig,
    pub compression_enabled: bool,
    /// Encoded payloads larger than this many bytes are gzip-compressed.
    pub compression_threshold: usize,
    /// Response-time samples kept for the rolling average.
    pub max_response_samples: usize,
    /// Extra seconds a tag index outlives the entries it points at.
    pub tag_index_margin: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            namespace: "cache".to_string(),
            ttl: TtlConfig::default(),
            compression_enabled: true,
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
            max_response_samples: DEFAULT_RESPONSE_SAMPLES,
            tag_index_margin: 300,
        }
    }
}

impl CacheConfig {
    /// Validate configuration.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` if the namespace is empty or no response
    /// samples are kept.
    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() {
            return Err(Error::ConfigError("cache namespace cannot be empty".to_string()));
        }
        if self.namespace == "tag" {
            return Err(Error::ConfigError(
                "cache namespace 'tag' collides with tag index keys".to_string(),
            ));
        }
        if self.max_response_samples == 0 {
            return Err(Error::ConfigError(
                "max_response_samples must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// All settings of the crate.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Settings {
    pub cache: CacheConfig,
    pub resilience: ResilienceConfig,
}

impl Settings {
    /// Load settings from the process environment.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` for a variable that is set but does not
    /// parse, or for settings that fail validation.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings through `lookup`, which returns the raw value of a
    /// variable or `None` if it is unset.
    ///
    /// # Errors
    /// Same as [`Settings::from_env`].
    pub fn from_lookup<L>(lookup: L) -> Result<Self>
    where
        L: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup: &lookup };
        let defaults = Settings::default();

        let mut ttl = defaults.cache.ttl.clone();
        for category in DataCategory::ALL {
            let key = format!("CACHE_TTL_{}", category.as_str().to_uppercase());
            let slot = ttl.slot(category);
            *slot = vars.parse(&key, *slot)?;
        }

        let cache = CacheConfig {
            namespace: vars.raw("CACHE_NAMESPACE").unwrap_or(defaults.cache.namespace),
            ttl,
            compression_enabled: vars
                .flag("CACHE_COMPRESSION_ENABLED", defaults.cache.compression_enabled)?,
            compression_threshold: vars.parse(
                "CACHE_COMPRESSION_THRESHOLD",
                defaults.cache.compression_threshold,
            )?,
            max_response_samples: vars.parse(
                "CACHE_MAX_RESPONSE_SAMPLES",
                defaults.cache.max_response_samples,
            )?,
            tag_index_margin: vars.parse("CACHE_TAG_INDEX_MARGIN", defaults.cache.tag_index_margin)?,
        };

        let d = defaults.resilience;
        let resilience = ResilienceConfig {
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: vars.parse(
                    "CIRCUIT_BREAKER_FAILURE_THRESHOLD",
                    d.circuit_breaker.failure_threshold,
                )?,
                recovery_timeout: vars.millis(
                    "CIRCUIT_BREAKER_RECOVERY_TIMEOUT_MS",
                    d.circuit_breaker.recovery_timeout,
                )?,
                half_open_max_calls: vars.parse(
                    "CIRCUIT_BREAKER_HALF_OPEN_MAX_CALLS",
                    d.circuit_breaker.half_open_max_calls,
                )?,
            },
            retry: RetryOptions {
                max_attempts: vars.parse("RETRY_MAX_ATTEMPTS", d.retry.max_attempts)?,
                base_delay: vars.millis("RETRY_BASE_DELAY_MS", d.retry.base_delay)?,
                max_delay: vars.millis("RETRY_MAX_DELAY_MS", d.retry.max_delay)?,
                backoff_multiplier: vars
                    .parse("RETRY_BACKOFF_MULTIPLIER", d.retry.backoff_multiplier)?,
                jitter: vars.flag("RETRY_JITTER", d.retry.jitter)?,
            },
            timeout: TimeoutConfig {
                default: vars.millis("TIMEOUT_DEFAULT_MS", d.timeout.default)?,
                database: vars.millis("TIMEOUT_DATABASE_MS", d.timeout.database)?,
                external_api: vars.millis("TIMEOUT_EXTERNAL_API_MS", d.timeout.external_api)?,
                file_operation: vars
                    .millis("TIMEOUT_FILE_OPERATION_MS", d.timeout.file_operation)?,
            },
            fallback: FallbackConfig {
                ttl: vars.seconds("FALLBACK_CACHE_TTL_SECONDS", d.fallback.ttl)?,
            },
            error_metrics: ErrorMetricsConfig {
                aggregation_window: vars
                    .millis("ERROR_AGGREGATION_WINDOW_MS", d.error_metrics.aggregation_window)?,
                critical_threshold: vars
                    .parse("ERROR_CRITICAL_THRESHOLD", d.error_metrics.critical_threshold)?,
                retention: vars.seconds("ERROR_RETENTION_SECONDS", d.error_metrics.retention)?,
            },
        };

        let settings = Settings { cache, resilience };
        settings.validate()?;
        debug!(
            "Loaded settings: namespace={}, breaker threshold={}, retry attempts={}",
            settings.cache.namespace,
            settings.resilience.circuit_breaker.failure_threshold,
            settings.resilience.retry.max_attempts
        );
        Ok(settings)
    }

    /// Validate every section.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        self.cache.validate()?;
        self.resilience.validate()
    }
}

struct Vars<'a, L> {
    lookup: &'a L,
}

impl<L> Vars<'_, L>
where
    L: Fn(&str) -> Option<String>,
{
    fn raw(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.raw(key) {
            None => Ok(default),
            Some(value) => value
                .parse()
                .map_err(|e| Error::ConfigError(format!("{}='{}': {}", key, value, e))),
        }
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool> {
        match self.raw(key).map(|v| v.to_ascii_lowercase()) {
            None => Ok(default),
            Some(value) => match value.as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(Error::ConfigError(format!(
                    "{}='{}': expected a boolean",
                    key, value
                ))),
            },
        }
    }

    fn millis(&self, key: &str, default: Duration) -> Result<Duration> {
        self.parse(key, default.as_millis() as u64)
            .map(Duration::from_millis)
    }

    fn seconds(&self, key: &str, default: Duration) -> Result<Duration> {
        self.parse(key, default.as_secs()).map(Duration::from_secs)
    }
}
