// Error types for issue-lens.
// Classifies GitHub, analysis provider, cache, and input failures into distinct kinds.

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LensError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Rate limit exceeded{}", retry_hint(.retry_after))]
    RateLimited { retry_after: Option<Duration> },

    #[error("Authentication failed: invalid or expired credential")]
    Unauthorized,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Upstream service unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Invalid upstream response: {0}")]
    InvalidResponse(String),

    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing {0} environment variable")]
    MissingCredential(&'static str),

    #[error("Server error: {0}")]
    Server(String),
}

fn retry_hint(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!(", retry after {}s", d.as_secs()),
        None => String::new(),
    }
}

impl LensError {
    /// Whether the upstream call that produced this error may be attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LensError::RateLimited { .. } | LensError::UpstreamUnavailable(_)
        )
    }

    /// Server-supplied wait hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            LensError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Short machine-readable kind, used in HTTP error bodies and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            LensError::InvalidInput(_) => "invalid_input",
            LensError::RateLimited { .. } => "rate_limited",
            LensError::Unauthorized => "upstream_unauthorized",
            LensError::NotFound(_) => "not_found",
            LensError::UpstreamUnavailable(_) => "upstream_unavailable",
            LensError::InvalidResponse(_) => "invalid_response",
            LensError::CacheUnavailable(_) => "cache_unavailable",
            LensError::Config(_) => "config",
            LensError::MissingCredential(_) => "missing_credential",
            LensError::Server(_) => "server",
        }
    }
}

impl From<reqwest::Error> for LensError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            LensError::InvalidResponse(err.to_string())
        } else {
            LensError::UpstreamUnavailable(err.to_string())
        }
    }
}

impl From<serde_json::Error> for LensError {
    fn from(err: serde_json::Error) -> Self {
        LensError::InvalidResponse(err.to_string())
    }
}

impl From<std::io::Error> for LensError {
    fn from(err: std::io::Error) -> Self {
        LensError::CacheUnavailable(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LensError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(LensError::RateLimited { retry_after: None }.is_retryable());
        assert!(LensError::UpstreamUnavailable("502".into()).is_retryable());
        assert!(!LensError::Unauthorized.is_retryable());
        assert!(!LensError::NotFound("x".into()).is_retryable());
        assert!(!LensError::InvalidInput("x".into()).is_retryable());
    }

    #[test]
    fn test_rate_limit_message_includes_hint() {
        let err = LensError::RateLimited {
            retry_after: Some(Duration::from_secs(30)),
        };
        assert_eq!(err.to_string(), "Rate limit exceeded, retry after 30s");
        assert_eq!(err.retry_after(), Some(Duration::from_secs(30)));

        let err = LensError::RateLimited { retry_after: None };
        assert_eq!(err.to_string(), "Rate limit exceeded");
    }

    #[test]
    fn test_io_error_is_cache_unavailable() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert_eq!(LensError::from(io).kind(), "cache_unavailable");
    }
}
