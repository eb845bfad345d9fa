pub mod breaker;
pub mod config;
pub mod error;
pub mod gateway;
pub mod http_client;
pub mod model;
pub mod provider;
pub mod provider_factory;
pub mod retry;
pub mod telemetry;
#[cfg(test)]
pub mod test_util;

pub use breaker::{BreakerConfig, BreakerRegistry, BreakerSnapshot, CircuitState};
pub use config::GatewayConfig;
pub use error::{CoreResult, ErrorBody, ErrorKind, GatewayError};
pub use gateway::Gateway;
pub use model::InvokeOptions;
pub use retry::RetryPolicy;
