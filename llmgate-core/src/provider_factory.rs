use std::collections::HashMap;

use secrecy::SecretString;

use crate::config::GatewayConfig;
use crate::provider::ChatEndpoint;

/// Registry of upstream endpoints by service key.
/// Keys correspond to `[providers.<key>]` entries in the config and are also
/// the circuit-breaker partition keys.
#[derive(Debug, Clone, Default)]
pub struct EndpointRegistry {
    endpoints: HashMap<String, ChatEndpoint>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from configuration, reading each provider's API key from the
    /// process environment. Providers without a key are skipped.
    pub fn from_config(cfg: &GatewayConfig) -> Self {
        Self::from_config_with(cfg, |k| std::env::var(k).ok())
    }

    pub fn from_config_with<F>(cfg: &GatewayConfig, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut reg = Self::new();
        for (key, p) in &cfg.providers {
            match lookup(&p.api_key_env).filter(|v| !v.trim().is_empty()) {
                Some(api_key) => {
                    let secret = SecretString::new(api_key.into());
                    reg.insert(
                        key.clone(),
                        ChatEndpoint::new(p.base_url.clone(), p.model.clone(), secret),
                    );
                }
                None => {
                    tracing::warn!(
                        service = %key,
                        env = %p.api_key_env,
                        "API key not set; provider disabled"
                    );
                }
            }
        }
        reg
    }

    pub fn insert(&mut self, service_key: impl Into<String>, endpoint: ChatEndpoint) {
        self.endpoints.insert(service_key.into(), endpoint);
    }

    pub fn get(&self, service_key: &str) -> Option<&ChatEndpoint> {
        self.endpoints.get(service_key)
    }

    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.endpoints.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}
