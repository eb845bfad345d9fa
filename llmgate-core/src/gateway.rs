//! Resilient entry point for outbound generation calls.
//!
//! `invoke` order of operations:
//! 1. resolve the service key and validate the request (no breaker activity)
//! 2. ask the breaker for permission; refuse with `CircuitBreakerOpen` and
//!    make no HTTP call if it is open
//! 3. run the attempt loop, reporting *every* attempt to the breaker
//! 4. classify the last failure into the taxonomy once retries run out
//!
//! The breaker is consulted once per `invoke` and updated once per attempt.
//! Dropping the returned future cancels the in-flight attempt or backoff
//! sleep; an attempt that never completes is never recorded.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::field::Empty;
use tracing_futures::Instrument;

use crate::breaker::{BreakerRegistry, CircuitState};
use crate::config::GatewayConfig;
use crate::error::{CoreResult, GatewayError};
use crate::http_client::{HttpClient, Transport};
use crate::model::InvokeOptions;
use crate::provider::ChatEndpoint;
use crate::provider_factory::EndpointRegistry;
use crate::retry::{AttemptFailure, RetryPolicy};
use crate::telemetry::{
    AttemptTrace, KEY_ATTEMPTS, KEY_ERROR_CODE, KEY_MODEL, KEY_OUTCOME, KEY_SERVICE, TelemetrySink,
};

/// A 2xx attempt whose body yielded content.
struct Completion {
    status: u16,
    request_id: Option<String>,
    content: String,
}

pub struct Gateway {
    transport: Arc<dyn Transport>,
    endpoints: EndpointRegistry,
    breakers: Arc<BreakerRegistry>,
    policy: RetryPolicy,
    telemetry: Option<Arc<dyn TelemetrySink>>,
}

impl Gateway {
    pub fn new(
        transport: Arc<dyn Transport>,
        endpoints: EndpointRegistry,
        breakers: Arc<BreakerRegistry>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            endpoints,
            breakers,
            policy,
            telemetry: None,
        }
    }

    /// Real HTTP transport, endpoints from config + environment.
    pub fn from_config(cfg: &GatewayConfig) -> CoreResult<Self> {
        let http = HttpClient::new(&cfg.http)?;
        let endpoints = EndpointRegistry::from_config(cfg);
        let breakers = Arc::new(BreakerRegistry::new(cfg.breaker.breaker_config()));
        Ok(Self::new(Arc::new(http), endpoints, breakers, cfg.retry.policy()))
    }

    pub fn with_telemetry(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(sink);
        self
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    pub fn endpoints(&self) -> &EndpointRegistry {
        &self.endpoints
    }

    pub fn circuit_state(&self, service_key: &str) -> CircuitState {
        self.breakers.state(service_key)
    }

    pub fn reset_circuit(&self, service_key: &str) {
        self.breakers.reset(service_key);
    }

    /// Generate text for `user_prompt` under `system_prompt` via `service_key`.
    pub async fn invoke(
        &self,
        service_key: &str,
        system_prompt: &str,
        user_prompt: &str,
        opts: InvokeOptions,
    ) -> CoreResult<String> {
        let endpoint = self.endpoints.get(service_key).ok_or_else(|| {
            GatewayError::NotFound(format!("no upstream registered for service '{service_key}'"))
        })?;
        if user_prompt.trim().is_empty() {
            return Err(GatewayError::Validation("user prompt must not be empty".into()));
        }
        opts.validate()?;
        let body = endpoint.body(system_prompt, user_prompt, &opts)?;

        let span = tracing::info_span!(
            "gateway.invoke",
            { KEY_SERVICE } = service_key,
            { KEY_MODEL } = endpoint.model(),
            { KEY_ATTEMPTS } = Empty,
            { KEY_OUTCOME } = Empty,
            { KEY_ERROR_CODE } = Empty,
        );
        async move {
            let result = self.call_with_retry(service_key, endpoint, &body).await;
            let span = tracing::Span::current();
            match &result {
                Ok(_) => {
                    span.record(KEY_OUTCOME, "ok");
                }
                Err(e) => {
                    span.record(KEY_OUTCOME, "error");
                    span.record(KEY_ERROR_CODE, e.code());
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn call_with_retry(
        &self,
        service_key: &str,
        endpoint: &ChatEndpoint,
        body: &serde_json::Value,
    ) -> CoreResult<String> {
        if !self.breakers.can_call(service_key) {
            let failures = self.breakers.consecutive_failures(service_key);
            tracing::warn!(service = service_key, failures, "circuit open; failing fast");
            return Err(GatewayError::circuit_open(service_key, failures));
        }

        let url = endpoint.url();
        let owned_headers = endpoint.headers();
        let hdrs: Vec<(&str, &str)> = owned_headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        let mut retry_index: u32 = 0;
        loop {
            let attempt = retry_index + 1;
            tracing::Span::current().record(KEY_ATTEMPTS, attempt);
            let started = Instant::now();
            let outcome = self.attempt(&url, body, &hdrs).await;
            let latency_ms = started.elapsed().as_millis() as u64;

            let failure = match outcome {
                Ok(done) => {
                    self.breakers.record_success(service_key);
                    tracing::debug!(
                        service = service_key,
                        attempt,
                        latency_ms,
                        request_id = ?done.request_id,
                        "attempt succeeded"
                    );
                    self.emit(AttemptTrace {
                        service_key: service_key.to_string(),
                        model: endpoint.model().to_string(),
                        attempt,
                        status: Some(done.status),
                        provider_request_id: done.request_id,
                        latency_ms,
                        succeeded: true,
                        retryable: false,
                        delay_ms: None,
                        error_code: None,
                        breaker_state: self.breakers.state(service_key),
                    });
                    return Ok(done.content);
                }
                Err(failure) => failure,
            };

            self.breakers.record_failure(service_key);
            let class = failure.classification();
            let delay = self
                .policy
                .should_retry(class, retry_index)
                .then(|| self.policy.delay_for(retry_index));
            self.emit(AttemptTrace {
                service_key: service_key.to_string(),
                model: endpoint.model().to_string(),
                attempt,
                status: failure.status(),
                provider_request_id: failure.request_id().map(str::to_string),
                latency_ms,
                succeeded: false,
                retryable: class.retryable,
                delay_ms: delay.map(|d| d.as_millis() as u64),
                error_code: Some(class.kind.code().to_string()),
                breaker_state: self.breakers.state(service_key),
            });

            match delay {
                Some(delay) => {
                    tracing::warn!(
                        service = service_key,
                        attempt,
                        status = ?failure.status(),
                        request_id = ?failure.request_id(),
                        delay_ms = delay.as_millis() as u64,
                        "attempt failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    retry_index += 1;
                }
                None => {
                    if class.retryable {
                        tracing::warn!(
                            service = service_key,
                            attempts = attempt,
                            request_id = ?failure.request_id(),
                            "retries exhausted"
                        );
                    } else {
                        tracing::warn!(
                            service = service_key,
                            status = ?failure.status(),
                            request_id = ?failure.request_id(),
                            code = class.kind.code(),
                            "non-retryable failure"
                        );
                    }
                    return Err(failure.into_error(service_key));
                }
            }
        }
    }

    async fn attempt(
        &self,
        url: &str,
        body: &serde_json::Value,
        hdrs: &[(&str, &str)],
    ) -> Result<Completion, AttemptFailure> {
        let raw = self
            .transport
            .post_json(url, body, hdrs)
            .await
            .map_err(|e| AttemptFailure::Transport(e.0))?;
        if !raw.is_success() {
            return Err(AttemptFailure::Status {
                status: raw.status,
                retry_after: raw.retry_after,
                request_id: raw.provider_request_id,
                body: raw.body,
            });
        }
        match ChatEndpoint::parse_content(&raw.body) {
            Ok(content) => Ok(Completion {
                status: raw.status,
                request_id: raw.provider_request_id,
                content,
            }),
            Err(reason) => Err(AttemptFailure::Malformed {
                status: raw.status,
                request_id: raw.provider_request_id,
                reason,
            }),
        }
    }

    fn emit(&self, trace: AttemptTrace) {
        if let Some(sink) = &self.telemetry {
            sink.record(trace);
        }
    }
}
