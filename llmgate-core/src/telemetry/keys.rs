/// Span/log field keys for gateway calls.
/// Keep these stable; changing them is a breaking change for dashboards.
pub const KEY_SERVICE: &str = "gateway.service";
pub const KEY_MODEL: &str = "gateway.model";
pub const KEY_ATTEMPTS: &str = "gateway.attempts";
pub const KEY_OUTCOME: &str = "gateway.outcome";

/// Error-related (if applicable)
pub const KEY_ERROR_CODE: &str = "error.code";
