//! Retry policy: exponential backoff plus the attempt classification table.

use std::time::Duration;

use crate::error::{ErrorKind, GatewayError};
use crate::http_client::truncate;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Retries after the first attempt; total attempts = `max_retries + 1`.
    pub max_retries: u32,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(30_000),
            max_retries: 2,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// `min(max_delay, initial_delay * multiplier^retry_index)`, where
    /// `retry_index` is 0 for the first retry.
    pub fn delay_for(&self, retry_index: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(retry_index.min(i32::MAX as u32) as i32);
        let millis = self.initial_delay.as_millis() as f64 * factor;
        let cap = self.max_delay.as_millis() as f64;
        if !millis.is_finite() || millis >= cap {
            self.max_delay
        } else {
            Duration::from_millis(millis as u64)
        }
    }

    /// Full delay schedule for one call (one entry per retry).
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_retries).map(move |i| self.delay_for(i))
    }

    /// Should the loop sleep and try again after the failed attempt at `retry_index`?
    pub fn should_retry(&self, classification: Classification, retry_index: u32) -> bool {
        classification.retryable && retry_index < self.max_retries
    }
}

/// Retry decision for a single failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub retryable: bool,
    pub kind: ErrorKind,
}

impl Classification {
    const fn retry(kind: ErrorKind) -> Self {
        Self {
            retryable: true,
            kind,
        }
    }

    const fn stop(kind: ErrorKind) -> Self {
        Self {
            retryable: false,
            kind,
        }
    }
}

/// Exact-status rows, checked before the range fallbacks in [`classify`].
const STATUS_TABLE: &[(u16, Classification)] = &[
    (400, Classification::stop(ErrorKind::Validation)),
    (401, Classification::stop(ErrorKind::Unauthorized)),
    (403, Classification::stop(ErrorKind::Forbidden)),
    (404, Classification::stop(ErrorKind::NotFound)),
    (409, Classification::stop(ErrorKind::Conflict)),
    (429, Classification::retry(ErrorKind::RateLimit)),
    (503, Classification::retry(ErrorKind::Retryable)),
];

/// Classify a failed attempt. `None` means no response arrived (network error).
///
/// A 2xx status only reaches here when its body failed to parse; that is a
/// malformed upstream response and is not transient.
pub fn classify(status: Option<u16>) -> Classification {
    let Some(status) = status else {
        return Classification::retry(ErrorKind::Retryable);
    };
    if let Some((_, c)) = STATUS_TABLE.iter().find(|(s, _)| *s == status) {
        return *c;
    }
    match status {
        500..=599 => Classification::retry(ErrorKind::Retryable),
        400..=499 => Classification::stop(ErrorKind::Validation),
        _ => Classification::stop(ErrorKind::Internal),
    }
}

/// Why a single attempt did not produce content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptFailure {
    /// No response: connect, timeout or body-read failure.
    Transport(String),
    /// Upstream answered with a non-2xx status.
    Status {
        status: u16,
        retry_after: Option<u64>,
        request_id: Option<String>,
        body: String,
    },
    /// 2xx whose body did not have the expected shape.
    Malformed {
        status: u16,
        request_id: Option<String>,
        reason: String,
    },
}

impl AttemptFailure {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transport(_) => None,
            Self::Status { status, .. } | Self::Malformed { status, .. } => Some(*status),
        }
    }

    /// Upstream request id, when a response arrived and carried one.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::Transport(_) => None,
            Self::Status { request_id, .. } | Self::Malformed { request_id, .. } => {
                request_id.as_deref()
            }
        }
    }

    pub fn classification(&self) -> Classification {
        classify(self.status())
    }

    /// Convert into the taxonomy error a caller sees.
    pub fn into_error(self, service_key: &str) -> GatewayError {
        let kind = self.classification().kind;
        let detail = match &self {
            Self::Transport(msg) => format!("network error calling {service_key}: {msg}"),
            Self::Status { status, body, .. } => {
                format!("{service_key} returned {status}: {}", truncate(body, 300))
            }
            Self::Malformed { reason, .. } => {
                format!("malformed response from {service_key}: {reason}")
            }
        };
        match kind {
            ErrorKind::Validation => GatewayError::Validation(detail),
            ErrorKind::Unauthorized => GatewayError::Unauthorized(detail),
            ErrorKind::Forbidden => GatewayError::Forbidden(detail),
            ErrorKind::NotFound => GatewayError::NotFound(detail),
            ErrorKind::Conflict => GatewayError::Conflict(detail),
            ErrorKind::RateLimit => {
                let retry_after = match self {
                    Self::Status { retry_after, .. } => retry_after,
                    _ => None,
                };
                GatewayError::rate_limited(detail, retry_after)
            }
            ErrorKind::Retryable | ErrorKind::CircuitBreakerOpen => GatewayError::Retryable(detail),
            ErrorKind::Internal => GatewayError::internal(detail),
        }
    }
}
