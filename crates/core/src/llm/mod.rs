//! Chat-completions model client.
//!
//! - `ModelConfig`: endpoint, model id and sampling parameters, built once
//!   and passed by reference.
//! - `ChatTransport`: the HTTP seam (`UreqTransport` in production, fakes in
//!   tests).
//! - `ModelClient`: request building, token-limit retry and fallback replies.
//! - `MainQueue`: the main-thread job queue that receives async replies.

pub mod client;
pub mod queue;
pub mod transport;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use client::{parse_context_limit, ContextLimit, FallbackReason, ModelClient, ModelReply};
pub use queue::{MainHandle, MainQueue};
pub use transport::{
    ChatMessage, ChatRequest, ChatTransport, ResponseFormat, TransportError, UreqTransport,
};

use crate::analysis::prompt::LARGE_FUNCTION_THRESHOLD;

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_MODEL: &str = "google/gemini-2.5-flash-preview-05-20:thinking";
pub const DEFAULT_API_KEY_ENV: &str = "OPENROUTER_API_KEY";

/// Model endpoint and request parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Sent as `HTTP-Referer`.
    pub referer: String,
    pub temperature: f32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
    pub max_tokens: u32,
    /// Smallest completion budget worth retrying with after a context-length error.
    pub min_completion_tokens: u32,
    pub timeout_secs: u64,
    pub json_response_format: bool,
    /// Ask once more for JSON when a reply cannot be recovered at all.
    pub reformat_retry: bool,
    pub large_function_threshold: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            referer: "http://localhost".to_string(),
            temperature: 0.4,
            top_p: 1.0,
            frequency_penalty: 1.0,
            presence_penalty: 1.0,
            max_tokens: 100_000,
            min_completion_tokens: 1024,
            timeout_secs: 180,
            json_response_format: true,
            reformat_retry: false,
            large_function_threshold: LARGE_FUNCTION_THRESHOLD,
        }
    }
}

impl ModelConfig {
    /// `{base_url}/chat/completions`, tolerating a trailing slash.
    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("no API key: set the {0} environment variable")]
    MissingApiKey(String),
}

/// Resolved secrets for the model endpoint.
#[derive(Clone)]
pub struct ModelCredentials {
    api_key: String,
}

impl std::fmt::Debug for ModelCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelCredentials").field("api_key", &"<redacted>").finish()
    }
}

impl ModelCredentials {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self { api_key: api_key.into() }
    }

    pub fn from_env(config: &ModelConfig) -> Result<Self, ClientError> {
        match std::env::var(&config.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(Self { api_key: key.trim().to_string() }),
            _ => Err(ClientError::MissingApiKey(config.api_key_env.clone())),
        }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}
