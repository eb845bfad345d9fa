//! Chat-completion endpoint (OpenAI-compatible wire format, as served by OpenRouter).

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::{CoreResult, GatewayError};
use crate::model::{ChatMessage, InvokeOptions};

#[derive(Debug, Clone)]
pub struct ChatEndpoint {
    base: String,
    model: String,
    api_key: SecretString,
}

// ----- Wire structs -----
#[derive(Serialize)]
struct ChatReq<'a> {
    model: &'a str,
    messages: [ChatMessage; 2],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResp {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl ChatEndpoint {
    pub fn new(base: impl Into<String>, model: impl Into<String>, api_key: SecretString) -> Self {
        let base: String = base.into();
        Self {
            base: base.trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn url(&self) -> String {
        format!("{}/v1/chat/completions", self.base)
    }

    /// Auth only; the transport sets `Content-Type` when it encodes the body.
    pub fn headers(&self) -> Vec<(String, String)> {
        vec![(
            "Authorization".to_string(),
            format!("Bearer {}", self.api_key.expose_secret()),
        )]
    }

    pub fn body(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        opts: &InvokeOptions,
    ) -> CoreResult<serde_json::Value> {
        let req = ChatReq {
            model: &self.model,
            messages: [
                ChatMessage::system(system_prompt),
                ChatMessage::user(user_prompt),
            ],
            temperature: opts.temperature,
            max_tokens: opts.max_tokens,
        };
        serde_json::to_value(&req)
            .map_err(|e| GatewayError::internal(format!("request encode failed: {e}")))
    }

    /// Extract `choices[0].message.content`; `Err` carries why the shape is wrong.
    pub fn parse_content(body: &str) -> Result<String, String> {
        let resp: ChatResp =
            serde_json::from_str(body).map_err(|e| format!("json decode error: {e}"))?;
        let choice = resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| "response has no choices".to_string())?;
        choice
            .message
            .content
            .ok_or_else(|| "choices[0].message.content is missing".to_string())
    }
}
