use serde::{Deserialize, Serialize};

use crate::error::{CoreResult, GatewayError};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Sampling knobs for one `invoke`.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct InvokeOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for InvokeOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 1024,
        }
    }
}

impl InvokeOptions {
    pub fn temperature(mut self, t: f32) -> Self {
        self.temperature = t;
        self
    }

    pub fn max_tokens(mut self, n: u32) -> Self {
        self.max_tokens = n;
        self
    }

    pub fn validate(&self) -> CoreResult<()> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(GatewayError::Validation(format!(
                "temperature must be within 0.0..=2.0, got {}",
                self.temperature
            )));
        }
        if self.max_tokens == 0 {
            return Err(GatewayError::Validation(
                "max_tokens must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_serializes_lowercase() {
        let msg = ChatMessage::system("be brief");
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"role":"system","content":"be brief"}"#);
    }

    #[test]
    fn options_validation() {
        assert!(InvokeOptions::default().validate().is_ok());
        assert!(InvokeOptions::default().temperature(2.0).validate().is_ok());
        assert!(InvokeOptions::default().temperature(2.5).validate().is_err());
        assert!(InvokeOptions::default().temperature(f32::NAN).validate().is_err());
        assert!(InvokeOptions::default().max_tokens(0).validate().is_err());
    }
}
