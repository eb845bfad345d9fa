use serde::{Deserialize, Serialize};

use crate::breaker::CircuitState;

/// One HTTP attempt made by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptTrace {
    pub service_key: String,
    pub model: String,
    /// 1-based attempt number within a single `invoke`.
    pub attempt: u32,
    /// HTTP status, or `None` when no response arrived.
    pub status: Option<u16>,
    /// Upstream request id, for correlating with provider-side logs.
    pub provider_request_id: Option<String>,
    pub latency_ms: u64,
    pub succeeded: bool,
    pub retryable: bool,
    /// Backoff scheduled before the next attempt, if any.
    pub delay_ms: Option<u64>,
    /// Taxonomy code for failed attempts.
    pub error_code: Option<String>,
    /// Breaker state right after this attempt was recorded.
    pub breaker_state: CircuitState,
}
