use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::llm::{ModelConfig, ModelCredentials};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub kind: String,
}

/// Body of a `/chat/completions` request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
}

#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection, TLS or timeout failure.
    #[error("{0}")]
    Network(String),

    /// Non-2xx status; `body` is the raw response text.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid response body: {0}")]
    Decode(String),
}

impl TransportError {
    /// Best human-readable message: the provider's `error.message` when the
    /// body carries one, else the error text.
    pub fn message(&self) -> String {
        if let TransportError::Status { body, .. } = self {
            if let Ok(value) = serde_json::from_str::<Value>(body) {
                if let Some(msg) = value.pointer("/error/message").and_then(Value::as_str) {
                    return msg.to_string();
                }
            }
        }
        self.to_string()
    }
}

/// Sends one chat-completions request and returns the decoded JSON body.
pub trait ChatTransport: Send + Sync {
    fn send(&self, request: &ChatRequest) -> Result<Value, TransportError>;
}

/// Blocking HTTP transport over a shared `ureq` agent.
pub struct UreqTransport {
    agent: ureq::Agent,
    url: String,
    credentials: ModelCredentials,
    referer: String,
}

impl UreqTransport {
    pub fn new(config: &ModelConfig, credentials: ModelCredentials) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.timeout_secs))
            .timeout_connect(Duration::from_secs(config.timeout_secs.min(30)))
            .build();
        Self {
            agent,
            url: config.completions_url(),
            credentials,
            referer: config.referer.clone(),
        }
    }
}

impl ChatTransport for UreqTransport {
    fn send(&self, request: &ChatRequest) -> Result<Value, TransportError> {
        let response = self
            .agent
            .post(&self.url)
            .set("Authorization", &format!("Bearer {}", self.credentials.api_key()))
            .set("Content-Type", "application/json")
            .set("HTTP-Referer", &self.referer)
            .send_json(request);

        match response {
            Ok(resp) => resp.into_json::<Value>().map_err(|e| TransportError::Decode(e.to_string())),
            Err(ureq::Error::Status(status, resp)) => {
                let body = resp.into_string().unwrap_or_default();
                Err(TransportError::Status { status, body })
            }
            Err(err) => Err(TransportError::Network(err.to_string())),
        }
    }
}
