use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use std::{fs, path::Path};

use crate::breaker::BreakerConfig;
use crate::error::{CoreResult, GatewayError};
use crate::retry::RetryPolicy;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ProviderCfg {
    /// Base URL; `/v1/chat/completions` is appended.
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable that contains the API key.
    pub api_key_env: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RetryCfg {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for RetryCfg {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_retries: default_max_retries(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryCfg {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            max_retries: self.max_retries,
            backoff_multiplier: self.backoff_multiplier,
        }
    }
}

fn default_initial_delay_ms() -> u64 {
    1_000
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_max_retries() -> u32 {
    2
}
fn default_backoff_multiplier() -> f64 {
    2.0
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct BreakerCfg {
    /// Counted per HTTP attempt, so with 3 attempts per call a threshold of 5
    /// opens during the second fully failed call.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
}

impl Default for BreakerCfg {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_ms: default_cooldown_ms(),
        }
    }
}

impl BreakerCfg {
    pub fn breaker_config(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.failure_threshold,
            cooldown: Duration::from_millis(self.cooldown_ms),
        }
    }
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_cooldown_ms() -> u64 {
    60_000
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HttpCfg {
    /// TCP connect timeout in milliseconds (default 5000ms)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Per-attempt request timeout in milliseconds (default 60000ms)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Optional per-host idle connection pool cap (None = reqwest default)
    #[serde(default)]
    pub pool_max_idle_per_host: Option<usize>,
}

impl Default for HttpCfg {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            pool_max_idle_per_host: None,
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_request_timeout_ms() -> u64 {
    60_000
}

fn default_providers() -> BTreeMap<String, ProviderCfg> {
    let mut m = BTreeMap::new();
    m.insert(
        "openrouter".to_string(),
        ProviderCfg {
            base_url: "https://openrouter.ai/api".into(),
            model: "openai/gpt-4o-mini".into(),
            api_key_env: "OPENROUTER_API_KEY".into(),
        },
    );
    m
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GatewayConfig {
    /// Service key -> upstream endpoint.
    #[serde(default = "default_providers")]
    pub providers: BTreeMap<String, ProviderCfg>,
    #[serde(default)]
    pub retry: RetryCfg,
    #[serde(default)]
    pub breaker: BreakerCfg,
    #[serde(default)]
    pub http: HttpCfg,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            providers: default_providers(),
            retry: RetryCfg::default(),
            breaker: BreakerCfg::default(),
            http: HttpCfg::default(),
        }
    }
}

/// Environment variables that override file/default values.
pub const ENV_RETRY_INITIAL_DELAY: &str = "RETRY_INITIAL_DELAY";
pub const ENV_RETRY_MAX_DELAY: &str = "RETRY_MAX_DELAY";
pub const ENV_RETRY_MAX_RETRIES: &str = "RETRY_MAX_RETRIES";
pub const ENV_RETRY_BACKOFF_MULTIPLIER: &str = "RETRY_BACKOFF_MULTIPLIER";
pub const ENV_BREAKER_THRESHOLD: &str = "CIRCUIT_BREAKER_THRESHOLD";
pub const ENV_BREAKER_COOLDOWN: &str = "CIRCUIT_BREAKER_COOLDOWN";

impl GatewayConfig {
    /// Load a config from a file path (JSON or TOML by extension). If the
    /// extension is missing or unrecognized, try JSON first, then TOML.
    pub fn from_path<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path)?;
        let s = std::str::from_utf8(&bytes)
            .map_err(|e| GatewayError::Validation(format!("config is not utf-8: {e}")))?;
        let parse_json = |s: &str| {
            serde_json::from_str::<Self>(s)
                .map_err(|e| GatewayError::Validation(format!("invalid JSON config: {e}")))
        };
        let parse_toml = |s: &str| {
            toml::from_str::<Self>(s)
                .map_err(|e| GatewayError::Validation(format!("invalid TOML config: {e}")))
        };
        let cfg = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => parse_json(s)?,
            Some("toml") => parse_toml(s)?,
            _ => parse_json(s).or_else(|_| parse_toml(s))?,
        };
        Ok(cfg)
    }

    /// Defaults (or `path`, when given) with process environment overrides, validated.
    pub fn load(path: Option<&Path>) -> CoreResult<Self> {
        let mut cfg = match path {
            Some(p) => Self::from_path(p)?,
            None => Self::default(),
        };
        cfg.apply_env_with(|k| std::env::var(k).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply overrides from `lookup` (variable name -> value).
    pub fn apply_env_with<F>(&mut self, lookup: F) -> CoreResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_env(&lookup, ENV_RETRY_INITIAL_DELAY)? {
            self.retry.initial_delay_ms = v;
        }
        if let Some(v) = parse_env(&lookup, ENV_RETRY_MAX_DELAY)? {
            self.retry.max_delay_ms = v;
        }
        if let Some(v) = parse_env(&lookup, ENV_RETRY_MAX_RETRIES)? {
            self.retry.max_retries = v;
        }
        if let Some(v) = parse_env(&lookup, ENV_RETRY_BACKOFF_MULTIPLIER)? {
            self.retry.backoff_multiplier = v;
        }
        if let Some(v) = parse_env(&lookup, ENV_BREAKER_THRESHOLD)? {
            self.breaker.failure_threshold = v;
        }
        if let Some(v) = parse_env(&lookup, ENV_BREAKER_COOLDOWN)? {
            self.breaker.cooldown_ms = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> CoreResult<()> {
        let r = &self.retry;
        if r.max_delay_ms < r.initial_delay_ms {
            return Err(GatewayError::Validation(format!(
                "retry.max_delay_ms ({}) is below retry.initial_delay_ms ({})",
                r.max_delay_ms, r.initial_delay_ms
            )));
        }
        if !(r.backoff_multiplier.is_finite() && r.backoff_multiplier >= 1.0) {
            return Err(GatewayError::Validation(format!(
                "retry.backoff_multiplier must be >= 1.0, got {}",
                r.backoff_multiplier
            )));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(GatewayError::Validation(
                "breaker.failure_threshold must be at least 1".into(),
            ));
        }
        for (key, p) in &self.providers {
            if p.base_url.trim().is_empty() || p.model.trim().is_empty() {
                return Err(GatewayError::Validation(format!(
                    "provider '{key}' needs a base_url and a model"
                )));
            }
        }
        Ok(())
    }
}

fn parse_env<T, F>(lookup: &F, name: &str) -> CoreResult<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| {
            GatewayError::Validation(format!("{name}={raw:?} is not valid: {e}"))
        }),
    }
}
