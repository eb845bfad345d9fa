//! Telemetry primitives for the gateway.
//! Nothing is emitted unless a sink is attached with `Gateway::with_telemetry`.

pub mod keys;
pub mod types;
#[cfg(test)]
pub mod test_span;

pub use keys::*;
pub use types::*;

use std::sync::{Arc, Mutex};

/// Implement this to receive one record per HTTP attempt.
///
/// Requirements:
/// - Implementations must be thread-safe (`Send + Sync`) and `'static`.
/// - `record` runs inline on the calling task between attempts; keep it cheap
///   and never panic.
pub trait TelemetrySink: Send + Sync + 'static {
    fn record(&self, trace: AttemptTrace);
}

/// Sink that keeps every trace in memory. Handy for tests and the CLI.
#[derive(Debug, Default)]
pub struct MemorySink {
    traces: Mutex<Vec<AttemptTrace>>,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn traces(&self) -> Vec<AttemptTrace> {
        self.traces
            .lock()
            .map(|t| t.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

impl TelemetrySink for MemorySink {
    fn record(&self, trace: AttemptTrace) {
        match self.traces.lock() {
            Ok(mut t) => t.push(trace),
            Err(poisoned) => poisoned.into_inner().push(trace),
        }
    }
}
