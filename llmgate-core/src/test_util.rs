//! Scripted transport for gateway tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::http_client::{RawResponse, Transport, TransportError};

/// One scripted attempt outcome.
#[derive(Debug, Clone)]
pub enum Step {
    /// Respond with this status and body.
    Status(u16, String),
    /// Respond 429 with a numeric `Retry-After`.
    RateLimited(u64),
    /// No response at all.
    NetworkError,
    /// Wait before resolving the inner step (an upstream that hangs).
    Delayed(Duration, Box<Step>),
    /// Resolve the inner step with this upstream request id attached.
    Identified(String, Box<Step>),
}

impl Step {
    /// A well-formed 200 chat completion carrying `content`.
    pub fn ok(content: &str) -> Self {
        let body = json!({
            "id": "gen-test",
            "choices": [{ "message": { "role": "assistant", "content": content } }]
        });
        Self::Status(200, body.to_string())
    }

    pub fn status(code: u16) -> Self {
        Self::Status(code, format!("upstream said {code}"))
    }

    pub fn after(self, delay: Duration) -> Self {
        Self::Delayed(delay, Box::new(self))
    }

    pub fn with_request_id(self, id: &str) -> Self {
        Self::Identified(id.to_string(), Box::new(self))
    }
}

/// Replays `steps` in order; once exhausted it keeps repeating `fallback`.
pub struct ScriptedTransport {
    steps: Mutex<VecDeque<Step>>,
    fallback: Step,
    calls: AtomicUsize,
    last_body: Mutex<Option<serde_json::Value>>,
}

impl ScriptedTransport {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self::with_fallback(steps, Step::status(503))
    }

    pub fn always(step: Step) -> Self {
        Self::with_fallback([], step)
    }

    pub fn with_fallback(steps: impl IntoIterator<Item = Step>, fallback: Step) -> Self {
        Self {
            steps: Mutex::new(steps.into_iter().collect()),
            fallback,
            calls: AtomicUsize::new(0),
            last_body: Mutex::new(None),
        }
    }

    /// Append a step after whatever is still queued.
    pub fn push(&self, step: Step) {
        self.steps.lock().unwrap().push_back(step);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_body(&self) -> Option<serde_json::Value> {
        self.last_body.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn post_json(
        &self,
        _url: &str,
        body: &serde_json::Value,
        _headers: &[(&str, &str)],
    ) -> Result<RawResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_body.lock().unwrap() = Some(body.clone());
        let mut step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        let mut request_id = None;
        let (status, retry_after, body) = loop {
            match step {
                Step::NetworkError => return Err(TransportError("connection refused".into())),
                Step::RateLimited(secs) => break (429, Some(secs), "rate limited".to_string()),
                Step::Status(status, body) => break (status, None, body),
                Step::Delayed(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    step = *inner;
                }
                Step::Identified(id, inner) => {
                    request_id = Some(id);
                    step = *inner;
                }
            }
        };
        Ok(RawResponse {
            status,
            retry_after,
            provider_request_id: request_id,
            body,
        })
    }
}
