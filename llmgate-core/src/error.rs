use serde::Serialize;
use thiserror::Error;

/// Default `Retry-After` hint (seconds) when upstream sends none.
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Fieldless mirror of [`GatewayError`] carrying the fixed status/code table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    RateLimit,
    Retryable,
    CircuitBreakerOpen,
    Internal,
}

impl ErrorKind {
    pub const fn status(self) -> u16 {
        match self {
            Self::Validation => 400,
            Self::Unauthorized => 401,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::RateLimit => 429,
            Self::Retryable | Self::CircuitBreakerOpen => 503,
            Self::Internal => 500,
        }
    }

    pub const fn code(self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION_ERROR",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::RateLimit => "RATE_LIMIT_EXCEEDED",
            Self::Retryable => "RETRYABLE_ERROR",
            Self::CircuitBreakerOpen => "CIRCUIT_BREAKER_OPEN",
            Self::Internal => "INTERNAL_ERROR",
        }
    }

    /// Operational errors are expected runtime conditions; the rest are bugs.
    pub const fn is_operational(self) -> bool {
        !matches!(self, Self::Internal)
    }
}

/// Core error type for the gateway.
/// This is the only failure vocabulary that leaves the crate; transport
/// errors are classified into one of these before they surface.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("{message}")]
    RateLimit {
        message: String,
        retry_after_secs: u64,
    },

    #[error("{0}")]
    Retryable(String),

    #[error("{message}")]
    CircuitBreakerOpen {
        message: String,
        metadata: serde_json::Value,
    },

    #[error("internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
    },
}

pub type CoreResult<T> = std::result::Result<T, GatewayError>;

impl GatewayError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    pub fn rate_limited(message: impl Into<String>, retry_after_secs: Option<u64>) -> Self {
        Self::RateLimit {
            message: message.into(),
            retry_after_secs: retry_after_secs.unwrap_or(DEFAULT_RETRY_AFTER_SECS),
        }
    }

    pub fn circuit_open(service_key: &str, failures: u32) -> Self {
        Self::CircuitBreakerOpen {
            message: format!("Circuit breaker is open for {service_key}"),
            metadata: serde_json::json!({ "service": service_key, "failures": failures }),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::RateLimit { .. } => ErrorKind::RateLimit,
            Self::Retryable(_) => ErrorKind::Retryable,
            Self::CircuitBreakerOpen { .. } => ErrorKind::CircuitBreakerOpen,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    pub fn status(&self) -> u16 {
        self.kind().status()
    }

    pub fn code(&self) -> &'static str {
        self.kind().code()
    }

    pub fn is_operational(&self) -> bool {
        self.kind().is_operational()
    }

    /// Client-visible rendering for the outermost boundary.
    pub fn to_body(&self) -> ErrorBody {
        let message = if self.is_operational() {
            self.to_string()
        } else {
            "Internal server error".to_string()
        };
        let (retry_after, metadata) = match self {
            Self::RateLimit {
                retry_after_secs, ..
            } => (Some(*retry_after_secs), None),
            Self::CircuitBreakerOpen { metadata, .. } => (None, Some(metadata.clone())),
            _ => (None, None),
        };
        ErrorBody {
            status: self.status(),
            code: self.code(),
            message,
            retry_after,
            metadata,
        }
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(e: std::io::Error) -> Self {
        Self::Internal {
            message: format!("io error: {e}"),
            source: Some(Box::new(e)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBody {
    pub status: u16,
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kind_table_matches_taxonomy() {
        let table = [
            (ErrorKind::Validation, 400, "VALIDATION_ERROR", true),
            (ErrorKind::Unauthorized, 401, "UNAUTHORIZED", true),
            (ErrorKind::Forbidden, 403, "FORBIDDEN", true),
            (ErrorKind::NotFound, 404, "NOT_FOUND", true),
            (ErrorKind::Conflict, 409, "CONFLICT", true),
            (ErrorKind::RateLimit, 429, "RATE_LIMIT_EXCEEDED", true),
            (ErrorKind::Retryable, 503, "RETRYABLE_ERROR", true),
            (ErrorKind::CircuitBreakerOpen, 503, "CIRCUIT_BREAKER_OPEN", true),
            (ErrorKind::Internal, 500, "INTERNAL_ERROR", false),
        ];
        for (kind, status, code, operational) in table {
            assert_eq!(kind.status(), status, "{kind:?}");
            assert_eq!(kind.code(), code, "{kind:?}");
            assert_eq!(kind.is_operational(), operational, "{kind:?}");
        }
    }

    #[test]
    fn rate_limit_defaults_retry_after() {
        let err = GatewayError::rate_limited("slow down", None);
        match err {
            GatewayError::RateLimit {
                retry_after_secs, ..
            } => assert_eq!(retry_after_secs, 60),
            other => panic!("expected RateLimit, got: {other:?}"),
        }
        let err = GatewayError::rate_limited("slow down", Some(7));
        assert_eq!(err.to_body().retry_after, Some(7));
    }

    #[test]
    fn circuit_open_carries_metadata() {
        let err = GatewayError::circuit_open("openrouter", 6);
        assert_eq!(err.to_string(), "Circuit breaker is open for openrouter");
        assert_eq!(err.status(), 503);
        let body = err.to_body();
        assert_eq!(body.code, "CIRCUIT_BREAKER_OPEN");
        assert_eq!(body.metadata, Some(json!({"service": "openrouter", "failures": 6})));
    }

    #[test]
    fn internal_body_hides_message() {
        let err = GatewayError::internal("choices[0] missing");
        assert!(!err.is_operational());
        let body = serde_json::to_value(err.to_body()).unwrap();
        assert_eq!(body["status"], json!(500));
        assert_eq!(body["message"], json!("Internal server error"));
        assert!(body.get("retry_after").is_none());
    }

    #[test]
    fn io_error_maps_to_internal_with_source() {
        use std::error::Error as _;
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = GatewayError::from(io);
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(err.source().is_some());
    }
}
