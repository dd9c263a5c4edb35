//! Error taxonomy and classification.
//!
//! Every failure leaving the resilience façade is an [`AppError`] carrying a
//! category, a severity, an HTTP-ish status code and a retryable flag.
//! Operation errors are mapped through the [`Classify`] trait:
//!
//! 1. errors that already are an `AppError` keep their classification;
//! 2. errors exposing a known network code (`ECONNRESET`, `ENOTFOUND`, ...)
//!    become `network`/`medium`, retryable;
//! 3. errors exposing an HTTP status map 401/403/404/429/5xx;
//! 4. everything else is `internal`/`medium`.

use crate::entry::now_millis;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Network error codes treated as transient connectivity failures.
pub const NETWORK_ERROR_CODES: &[&str] = &[
    "ECONNRESET",
    "ECONNREFUSED",
    "ECONNABORTED",
    "ENOTFOUND",
    "EAI_AGAIN",
    "ETIMEDOUT",
    "EPIPE",
    "ENETUNREACH",
    "EHOSTUNREACH",
    "ENOTCONN",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Validation,
    Authentication,
    Authorization,
    NotFound,
    RateLimit,
    ExternalService,
    Database,
    Network,
    Internal,
    Timeout,
    CircuitBreaker,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Validation => "validation",
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::Authorization => "authorization",
            ErrorCategory::NotFound => "not_found",
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::ExternalService => "external_service",
            ErrorCategory::Database => "database",
            ErrorCategory::Network => "network",
            ErrorCategory::Internal => "internal",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::CircuitBreaker => "circuit_breaker",
        }
    }

    /// Severity, retryability and status code an error of this category gets
    /// unless the producer says otherwise.
    fn defaults(&self) -> (ErrorSeverity, bool, u16) {
        match self {
            ErrorCategory::Validation => (ErrorSeverity::Low, false, 400),
            ErrorCategory::Authentication => (ErrorSeverity::High, false, 401),
            ErrorCategory::Authorization => (ErrorSeverity::High, false, 403),
            ErrorCategory::NotFound => (ErrorSeverity::Low, false, 404),
            ErrorCategory::RateLimit => (ErrorSeverity::Medium, true, 429),
            ErrorCategory::ExternalService => (ErrorSeverity::High, true, 502),
            ErrorCategory::Database => (ErrorSeverity::High, true, 500),
            ErrorCategory::Network => (ErrorSeverity::Medium, true, 503),
            ErrorCategory::Internal => (ErrorSeverity::Medium, false, 500),
            ErrorCategory::Timeout => (ErrorSeverity::Medium, true, 408),
            ErrorCategory::CircuitBreaker => (ErrorSeverity::High, false, 503),
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ErrorSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorSeverity::Low => "low",
            ErrorSeverity::Medium => "medium",
            ErrorSeverity::High => "high",
            ErrorSeverity::Critical => "critical",
        }
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified application error.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AppError {
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub message: String,
    pub status_code: u16,
    pub retryable: bool,
    /// Logical service the failing call targeted, when known.
    pub service: Option<String>,
    pub context: BTreeMap<String, String>,
    /// Unix epoch milliseconds.
    pub occurred_at: u64,
}

impl AppError {
    /// Build an error with the category's default severity, status and
    /// retryability.
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        let (severity, retryable, status_code) = category.defaults();
        AppError {
            category,
            severity,
            message: message.into(),
            status_code,
            retryable,
            service: None,
            context: BTreeMap::new(),
            occurred_at: now_millis(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Validation, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::NotFound, message)
    }

    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Database, message)
    }

    pub fn external_service(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::ExternalService, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Internal, message)
    }

    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = status_code;
        self
    }

    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}/{}] {}", self.category, self.severity, self.message)?;
        if let Some(service) = &self.service {
            write!(f, " (service: {})", service)?;
        }
        Ok(())
    }
}

impl std::error::Error for AppError {}

/// Signals an error type exposes to the classifier.
///
/// All methods default to "no signal"; implement the ones that apply.
pub trait Classify {
    /// A complete classification the error already carries.
    fn app_error(&self) -> Option<AppError> {
        None
    }

    /// Low-level network error code such as `ECONNRESET`.
    fn network_code(&self) -> Option<&str> {
        None
    }

    /// HTTP status returned by a remote service.
    fn http_status(&self) -> Option<u16> {
        None
    }
}

/// Classify any error according to the rules in the module docs.
pub fn classify<E: Classify + fmt::Display + ?Sized>(error: &E) -> AppError {
    if let Some(app) = error.app_error() {
        return app;
    }

    let message = error.to_string();

    if let Some(code) = error.network_code() {
        if NETWORK_ERROR_CODES.contains(&code) {
            return AppError::new(ErrorCategory::Network, message).with_context("code", code);
        }
    }

    if let Some(status) = error.http_status() {
        return from_http_status(status, message);
    }

    AppError::internal(message)
}

fn from_http_status(status: u16, message: String) -> AppError {
    let category = match status {
        401 => ErrorCategory::Authentication,
        403 => ErrorCategory::Authorization,
        404 => ErrorCategory::NotFound,
        429 => ErrorCategory::RateLimit,
        s if s >= 500 => ErrorCategory::ExternalService,
        s if (400..500).contains(&s) => ErrorCategory::Validation,
        _ => ErrorCategory::Internal,
    };
    AppError::new(category, message).with_status(status)
}

impl Classify for AppError {
    fn app_error(&self) -> Option<AppError> {
        Some(self.clone())
    }
}

impl Classify for crate::error::Error {
    fn app_error(&self) -> Option<AppError> {
        use crate::error::Error;

        let category = match self {
            Error::BackendError(_) => ErrorCategory::Database,
            Error::Timeout(_) => ErrorCategory::Timeout,
            Error::ConfigError(_) => {
                return Some(AppError::internal(self.to_string()).with_severity(ErrorSeverity::High))
            }
            Error::Other(_) => return None,
            _ => ErrorCategory::Internal,
        };
        Some(AppError::new(category, self.to_string()))
    }
}

impl Classify for std::io::Error {
    fn network_code(&self) -> Option<&str> {
        use std::io::ErrorKind;

        match self.kind() {
            ErrorKind::ConnectionReset => Some("ECONNRESET"),
            ErrorKind::ConnectionRefused => Some("ECONNREFUSED"),
            ErrorKind::ConnectionAborted => Some("ECONNABORTED"),
            ErrorKind::TimedOut => Some("ETIMEDOUT"),
            ErrorKind::BrokenPipe => Some("EPIPE"),
            ErrorKind::NotConnected => Some("ENOTCONN"),
            _ if self.to_string().contains("failed to lookup address") => Some("ENOTFOUND"),
            _ => None,
        }
    }
}

/// A transport-level failure from a remote dependency.
///
/// Applications wrapping HTTP clients can map their errors into this type to
/// get the standard classification without implementing [`Classify`].
#[derive(Clone, Debug, PartialEq)]
pub enum ServiceError {
    Http { status: u16, message: String },
    Network { code: String, message: String },
    Other(String),
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceError::Http { status, message } => write!(f, "HTTP {}: {}", status, message),
            ServiceError::Network { code, message } => write!(f, "{}: {}", code, message),
            ServiceError::Other(message) => f.write_str(message),
        }
    }
}

impl std::error::Error for ServiceError {}

impl Classify for ServiceError {
    fn network_code(&self) -> Option<&str> {
        match self {
            ServiceError::Network { code, .. } => Some(code),
            _ => None,
        }
    }

    fn http_status(&self) -> Option<u16> {
        match self {
            ServiceError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http(status: u16) -> ServiceError {
        ServiceError::Http {
            status,
            message: "upstream said no".to_string(),
        }
    }

    #[test]
    fn test_typed_error_keeps_classification() {
        let original = AppError::validation("bad VIN").with_severity(ErrorSeverity::Critical);
        let classified = classify(&original);
        assert_eq!(classified.category, ErrorCategory::Validation);
        assert_eq!(classified.severity, ErrorSeverity::Critical);
    }

    #[test]
    fn test_network_codes() {
        let err = ServiceError::Network {
            code: "ECONNRESET".to_string(),
            message: "socket hang up".to_string(),
        };
        let classified = classify(&err);
        assert_eq!(classified.category, ErrorCategory::Network);
        assert_eq!(classified.severity, ErrorSeverity::Medium);
        assert!(classified.retryable);
        assert_eq!(classified.context.get("code").map(String::as_str), Some("ECONNRESET"));
    }

    #[test]
    fn test_unknown_network_code_is_internal() {
        let err = ServiceError::Network {
            code: "EWHATEVER".to_string(),
            message: "odd".to_string(),
        };
        assert_eq!(classify(&err).category, ErrorCategory::Internal);
    }

    #[test]
    fn test_http_status_mapping() {
        let auth = classify(&http(401));
        assert_eq!(auth.category, ErrorCategory::Authentication);
        assert_eq!(auth.severity, ErrorSeverity::High);

        let forbidden = classify(&http(403));
        assert_eq!(forbidden.category, ErrorCategory::Authorization);
        assert_eq!(forbidden.severity, ErrorSeverity::High);

        assert_eq!(classify(&http(404)).category, ErrorCategory::NotFound);

        let limited = classify(&http(429));
        assert_eq!(limited.category, ErrorCategory::RateLimit);
        assert!(limited.retryable);

        let upstream = classify(&http(503));
        assert_eq!(upstream.category, ErrorCategory::ExternalService);
        assert_eq!(upstream.severity, ErrorSeverity::High);
        assert!(upstream.retryable);
        assert_eq!(upstream.status_code, 503);

        assert!(!classify(&http(422)).retryable);
    }

    #[test]
    fn test_unclassified_defaults_to_internal() {
        let classified = classify(&ServiceError::Other("boom".to_string()));
        assert_eq!(classified.category, ErrorCategory::Internal);
        assert_eq!(classified.severity, ErrorSeverity::Medium);
        assert!(!classified.retryable);
        assert_eq!(classified.message, "boom");
    }

    #[test]
    fn test_io_errors() {
        let reset = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert_eq!(classify(&reset).category, ErrorCategory::Network);

        let missing = std::io::Error::new(std::io::ErrorKind::NotFound, "no file");
        assert_eq!(classify(&missing).category, ErrorCategory::Internal);
    }

    #[test]
    fn test_store_errors() {
        let backend = crate::error::Error::BackendError("pool exhausted".to_string());
        let classified = classify(&backend);
        assert_eq!(classified.category, ErrorCategory::Database);
        assert!(classified.retryable);
    }

    #[test]
    fn test_display_includes_service() {
        let err = AppError::external_service("payment gateway down").with_service("stripe");
        assert_eq!(
            err.to_string(),
            "[external_service/high] payment gateway down (service: stripe)"
        );
    }
}
