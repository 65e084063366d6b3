//! Error types for proxywall services
//!
//! A single error enum shared across the firewall. By policy (firewall
//! availability must not depend on dependency correctness) most of these are
//! logged and absorbed rather than propagated to the request path.

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for proxywall services
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Redis error: {0}")]
    Redis(#[from] deadpool_redis::redis::RedisError),

    #[error("Redis pool error: {0}")]
    RedisPool(String),

    #[error("Geo database error: {0}")]
    Geo(#[from] maxminddb::MaxMindDBError),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("External service error: {service} - {message}")]
    ExternalService { service: String, message: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create an internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Error::Internal(msg.into())
    }

    /// Create a forbidden error
    pub fn forbidden<S: Into<String>>(msg: S) -> Self {
        Error::Forbidden(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Error::InvalidInput(msg.into())
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        Error::Timeout(msg.into())
    }

    /// Create an external service error
    pub fn external_service<S: Into<String>, M: Into<String>>(service: S, message: M) -> Self {
        Error::ExternalService {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Errors caused by a dependency being slow or unreachable. These always
    /// degrade to cache-miss behavior, never fail a request.
    pub fn is_dependency_failure(&self) -> bool {
        matches!(
            self,
            Error::Redis(_)
                | Error::RedisPool(_)
                | Error::Timeout(_)
                | Error::ExternalService { .. }
        )
    }

    /// Short error code string for logging and metrics
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Config(_) => "CONFIG_ERROR",
            Error::Redis(_) => "REDIS_ERROR",
            Error::RedisPool(_) => "REDIS_POOL_ERROR",
            Error::Geo(_) => "GEO_ERROR",
            Error::Forbidden(_) => "FORBIDDEN",
            Error::InvalidInput(_) => "INVALID_INPUT",
            Error::Timeout(_) => "TIMEOUT",
            Error::Internal(_) => "INTERNAL_ERROR",
            Error::ExternalService { .. } => "EXTERNAL_SERVICE_ERROR",
            Error::Other(_) => "UNKNOWN_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let err = Error::timeout("redis call exceeded 5s");
        assert!(err.is_dependency_failure());
        assert_eq!(err.error_code(), "TIMEOUT");

        let err = Error::forbidden("country blocked");
        assert!(!err.is_dependency_failure());
        assert_eq!(err.error_code(), "FORBIDDEN");

        let err = Error::external_service("bot-feed", "http 503");
        assert!(err.is_dependency_failure());
        assert_eq!(err.error_code(), "EXTERNAL_SERVICE_ERROR");
    }
}
