//! Deadlines for async operations.
//!
//! An operation that misses its deadline is dropped at its next suspension
//! point. Work it already handed off elsewhere (a request on the wire, a
//! spawned task) is not cancelled.

use std::fmt;
use std::future::Future;
use std::time::Duration;

/// Kind of operation, each with its own default deadline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperationClass {
    Default,
    Database,
    ExternalApi,
    FileOperation,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimeoutConfig {
    pub default: Duration,
    pub database: Duration,
    pub external_api: Duration,
    pub file_operation: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        TimeoutConfig {
            default: Duration::from_secs(30),
            database: Duration::from_secs(10),
            external_api: Duration::from_secs(15),
            file_operation: Duration::from_secs(60),
        }
    }
}

impl TimeoutConfig {
    pub fn for_class(&self, class: OperationClass) -> Duration {
        match class {
            OperationClass::Default => self.default,
            OperationClass::Database => self.database,
            OperationClass::ExternalApi => self.external_api,
            OperationClass::FileOperation => self.file_operation,
        }
    }
}

/// The operation did not finish within `after`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimeoutError {
    pub after: Duration,
}

impl fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Operation timed out after {}ms", self.after.as_millis())
    }
}

impl std::error::Error for TimeoutError {}

#[derive(Clone, Debug, Default)]
pub struct TimeoutManager {
    config: TimeoutConfig,
}

impl TimeoutManager {
    pub fn new(config: TimeoutConfig) -> Self {
        TimeoutManager { config }
    }

    pub fn config(&self) -> &TimeoutConfig {
        &self.config
    }

    /// Race `operation` against `after`.
    pub async fn execute<T, E, Fut>(&self, operation: Fut, after: Duration) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        E: From<TimeoutError>,
    {
        with_timeout(operation, after).await
    }

    /// Race `operation` against the configured deadline for `class`.
    pub async fn execute_class<T, E, Fut>(&self, operation: Fut, class: OperationClass) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        E: From<TimeoutError>,
    {
        with_timeout(operation, self.config.for_class(class)).await
    }
}

pub async fn with_timeout<T, E, Fut>(operation: Fut, after: Duration) -> Result<T, E>
where
    Fut: Future<Output = Result<T, E>>,
    E: From<TimeoutError>,
{
    match tokio::time::timeout(after, operation).await {
        Ok(result) => result,
        Err(_) => {
            debug!("Operation timed out after {:?}", after);
            Err(E::from(TimeoutError { after }))
        }
    }
}
