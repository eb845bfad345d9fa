//! Per-service circuit breakers.
//!
//! Each service key owns an independent record, created lazily in CLOSED
//! state. The registry is an owned value handed to the gateway; nothing here
//! is process-global, so tests can run isolated registries side by side.
//!
//! State machine:
//! - CLOSED -> OPEN once `consecutive_failures >= failure_threshold`
//! - OPEN -> HALF_OPEN when `can_call` runs after the cooldown (one probe)
//! - HALF_OPEN -> CLOSED on success, HALF_OPEN -> OPEN on failure
//! - any -> CLOSED on success
//!
//! The gateway records one result per HTTP attempt, not per `invoke`, so a
//! threshold of 5 with 3 attempts per call trips during the second fully
//! failed call.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive recorded attempt failures that open the circuit.
    pub failure_threshold: u32,
    /// Minimum time OPEN before a probe is granted.
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
struct BreakerRecord {
    consecutive_failures: u32,
    state: CircuitState,
    opened_at: Option<Instant>,
    /// Set while a HALF_OPEN probe has been granted but not yet reported.
    probe_granted_at: Option<Instant>,
}

impl BreakerRecord {
    fn new() -> Self {
        Self {
            consecutive_failures: 0,
            state: CircuitState::Closed,
            opened_at: None,
            probe_granted_at: None,
        }
    }

    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.probe_granted_at = None;
    }

    fn close(&mut self) {
        self.consecutive_failures = 0;
        self.state = CircuitState::Closed;
        self.opened_at = None;
        self.probe_granted_at = None;
    }
}

/// Point-in-time view of one breaker, for operators and logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub service_key: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    /// Milliseconds since the circuit last opened, if it is OPEN or HALF_OPEN.
    pub open_for_ms: Option<u64>,
}

/// Lock-guarded map of service key -> breaker record.
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    config: BreakerConfig,
    records: Mutex<HashMap<String, BreakerRecord>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            records: Mutex::new(HashMap::new()),
        }
    }

    // Records only see plain field stores, so a poisoned map is still consistent.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, BreakerRecord>> {
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// May a call to `service_key` proceed now?
    ///
    /// The OPEN -> HALF_OPEN flip happens under the lock, so only one caller
    /// receives the probe for a given cooldown expiry.
    pub fn can_call(&self, service_key: &str) -> bool {
        let now = Instant::now();
        let cooldown = self.config.cooldown;
        let mut records = self.lock();
        let rec = records
            .entry(service_key.to_string())
            .or_insert_with(BreakerRecord::new);

        match rec.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = rec.opened_at.map(|t| now.saturating_duration_since(t));
                if elapsed.is_none_or(|e| e >= cooldown) {
                    rec.state = CircuitState::HalfOpen;
                    rec.probe_granted_at = Some(now);
                    tracing::info!(service = service_key, "circuit half-open; granting probe");
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => match rec.probe_granted_at {
                // The previous probe never reported back (its caller went away).
                Some(granted) if now.saturating_duration_since(granted) >= cooldown => {
                    rec.probe_granted_at = Some(now);
                    tracing::info!(service = service_key, "stale probe; granting another");
                    true
                }
                Some(_) => false,
                None => {
                    rec.probe_granted_at = Some(now);
                    true
                }
            },
        }
    }

    pub fn record_success(&self, service_key: &str) {
        let mut records = self.lock();
        let rec = records
            .entry(service_key.to_string())
            .or_insert_with(BreakerRecord::new);
        if rec.state != CircuitState::Closed {
            tracing::info!(service = service_key, from = %rec.state, "circuit closed");
        }
        rec.close();
    }

    pub fn record_failure(&self, service_key: &str) {
        let now = Instant::now();
        let threshold = self.config.failure_threshold;
        let mut records = self.lock();
        let rec = records
            .entry(service_key.to_string())
            .or_insert_with(BreakerRecord::new);
        rec.consecutive_failures = rec.consecutive_failures.saturating_add(1);

        match rec.state {
            CircuitState::HalfOpen => {
                rec.open(now);
                tracing::error!(
                    service = service_key,
                    failures = rec.consecutive_failures,
                    "probe failed; circuit re-opened"
                );
            }
            CircuitState::Closed if rec.consecutive_failures >= threshold => {
                rec.open(now);
                tracing::error!(
                    service = service_key,
                    failures = rec.consecutive_failures,
                    threshold,
                    "circuit opened"
                );
            }
            _ => {}
        }
    }

    /// Current state without side effects. An OPEN record whose cooldown has
    /// elapsed still reads OPEN until a `can_call` claims the probe.
    pub fn state(&self, service_key: &str) -> CircuitState {
        self.lock()
            .get(service_key)
            .map(|r| r.state)
            .unwrap_or(CircuitState::Closed)
    }

    pub fn consecutive_failures(&self, service_key: &str) -> u32 {
        self.lock()
            .get(service_key)
            .map(|r| r.consecutive_failures)
            .unwrap_or(0)
    }

    pub fn reset(&self, service_key: &str) {
        let mut records = self.lock();
        if let Some(rec) = records.get_mut(service_key) {
            rec.close();
        }
        tracing::info!(service = service_key, "circuit reset");
    }

    pub fn snapshot(&self, service_key: &str) -> BreakerSnapshot {
        let now = Instant::now();
        let records = self.lock();
        match records.get(service_key) {
            Some(rec) => snapshot_of(service_key, rec, now),
            None => snapshot_of(service_key, &BreakerRecord::new(), now),
        }
    }

    /// Snapshots for every key seen so far, sorted by key.
    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let now = Instant::now();
        let records = self.lock();
        let mut out: Vec<_> = records
            .iter()
            .map(|(k, rec)| snapshot_of(k, rec, now))
            .collect();
        out.sort_by(|a, b| a.service_key.cmp(&b.service_key));
        out
    }
}

fn snapshot_of(service_key: &str, rec: &BreakerRecord, now: Instant) -> BreakerSnapshot {
    BreakerSnapshot {
        service_key: service_key.to_string(),
        state: rec.state,
        consecutive_failures: rec.consecutive_failures,
        open_for_ms: rec
            .opened_at
            .map(|t| now.saturating_duration_since(t).as_millis() as u64),
    }
}
