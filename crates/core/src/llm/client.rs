use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::thread;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::analysis::prompt::SYSTEM_PROMPT;
use crate::llm::transport::{ChatMessage, ChatRequest, ChatTransport, ResponseFormat, UreqTransport};
use crate::llm::{ClientError, MainHandle, ModelConfig, ModelCredentials};
use crate::model::ModelEditSet;
use crate::oracle::SymbolOracle;

/// Why a reply was synthesized instead of coming from the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    /// Network failure, timeout or non-2xx status.
    Transport,
    /// The provider answered with an error envelope.
    Provider,
    /// The prompt does not fit even with the smallest completion budget.
    TooLarge,
    /// The response body had no message content.
    Malformed,
    /// The worker thread could not run or panicked.
    Internal,
}

/// The single result of one model request.
///
/// Fallback replies carry a JSON edit-set explaining the failure, so
/// downstream recovery treats both variants the same way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelReply {
    Completed(String),
    Fallback { reason: FallbackReason, text: String },
}

impl ModelReply {
    pub fn fallback(reason: FallbackReason, edits: ModelEditSet) -> Self {
        ModelReply::Fallback { reason, text: edits.to_json() }
    }

    pub fn text(&self) -> &str {
        match self {
            ModelReply::Completed(text) => text,
            ModelReply::Fallback { text, .. } => text,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, ModelReply::Fallback { .. })
    }
}

/// Numbers extracted from a context-length error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextLimit {
    pub hard_limit: u32,
    pub prompt_tokens: u32,
}

impl ContextLimit {
    pub fn completion_budget(self) -> u32 {
        self.hard_limit.saturating_sub(self.prompt_tokens)
    }
}

static CONTEXT_LIMIT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"maximum context length is (\d+) tokens[^(]*\((\d+) in (?:your|the) (?:prompt|messages)")
        .expect("context limit pattern")
});

/// Parse "maximum context length is N tokens ... (M in your prompt; ...)".
pub fn parse_context_limit(message: &str) -> Option<ContextLimit> {
    let caps = CONTEXT_LIMIT_RE.captures(message)?;
    Some(ContextLimit {
        hard_limit: caps.get(1)?.as_str().parse().ok()?,
        prompt_tokens: caps.get(2)?.as_str().parse().ok()?,
    })
}

/// Pull `choices[0].message.content` out of a response body, or the
/// provider's error message.
fn interpret_body(body: &Value) -> Result<String, (FallbackReason, String)> {
    if let Some(error) = body.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err((FallbackReason::Provider, message));
    }
    body.pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            (FallbackReason::Malformed, "response has no choices[0].message.content".to_string())
        })
}

fn failure_edits(reason: FallbackReason, message: &str) -> ModelEditSet {
    match reason {
        FallbackReason::Provider => {
            ModelEditSet::with_comment(format!("Analysis failed with API error: {message}"))
        }
        FallbackReason::Transport => {
            ModelEditSet::with_comment(format!("Analysis failed with request error: {message}"))
        }
        FallbackReason::TooLarge => ModelEditSet {
            comment: "This function is too large to be analyzed with the current API limits."
                .to_string(),
            function_name: "large_function".to_string(),
            ..ModelEditSet::default()
        },
        FallbackReason::Malformed | FallbackReason::Internal => {
            ModelEditSet::with_comment(format!("Analysis failed with error: {message}"))
        }
    }
}

/// Chat-completions client with token-limit retry.
#[derive(Clone)]
pub struct ModelClient {
    config: ModelConfig,
    transport: Arc<dyn ChatTransport>,
}

impl ModelClient {
    pub fn new(config: &ModelConfig, transport: Arc<dyn ChatTransport>) -> Self {
        Self { config: config.clone(), transport }
    }

    /// Production client: API key from the environment, HTTP via ureq.
    pub fn from_config(config: &ModelConfig) -> Result<Self, ClientError> {
        let credentials = ModelCredentials::from_env(config)?;
        Ok(Self::new(config, Arc::new(UreqTransport::new(config, credentials))))
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn build_request(&self, prompt: &str, max_tokens: u32) -> ChatRequest {
        ChatRequest {
            model: self.config.model.clone(),
            messages: vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)],
            temperature: self.config.temperature,
            max_tokens,
            top_p: self.config.top_p,
            frequency_penalty: self.config.frequency_penalty,
            presence_penalty: self.config.presence_penalty,
            response_format: self
                .config
                .json_response_format
                .then(|| ResponseFormat { kind: "json_object".to_string() }),
        }
    }

    /// Send `prompt` and block for the reply. Never fails: every error
    /// becomes a [`ModelReply::Fallback`].
    pub fn invoke(&self, prompt: &str) -> ModelReply {
        self.invoke_with_budget(prompt, self.config.max_tokens, true)
    }

    fn invoke_with_budget(&self, prompt: &str, max_tokens: u32, allow_retry: bool) -> ModelReply {
        let request = self.build_request(prompt, max_tokens);
        debug!(model = %request.model, max_tokens, chars = prompt.len(), "sending model request");

        let (reason, message) = match self.transport.send(&request) {
            Ok(body) => match interpret_body(&body) {
                Ok(text) => {
                    info!(chars = text.len(), "model reply received");
                    return ModelReply::Completed(text);
                }
                Err(failure) => failure,
            },
            Err(err) => (FallbackReason::Transport, err.message()),
        };

        if let Some(limit) = parse_context_limit(&message) {
            let budget = limit.completion_budget();
            if allow_retry && budget >= self.config.min_completion_tokens {
                warn!(
                    hard_limit = limit.hard_limit,
                    prompt_tokens = limit.prompt_tokens,
                    budget,
                    "context length exceeded; retrying with a smaller completion budget"
                );
                return self.invoke_with_budget(prompt, budget, false);
            }
            warn!(budget, "prompt too large for the model's context window");
            return ModelReply::fallback(
                FallbackReason::TooLarge,
                failure_edits(FallbackReason::TooLarge, &message),
            );
        }

        if message.contains("maximum context length") {
            warn!(error = %message, "context length error without token counts");
            return ModelReply::fallback(
                reason,
                ModelEditSet::with_comment(format!("Analysis failed: {message}")),
            );
        }

        warn!(?reason, error = %message, "model request failed");
        ModelReply::fallback(reason, failure_edits(reason, &message))
    }

    /// Run [`ModelClient::invoke`] on a worker thread and deliver the reply
    /// to `callback` through `main`, exactly once.
    pub fn invoke_async<F>(&self, prompt: String, main: &MainHandle, callback: F)
    where
        F: FnOnce(&mut dyn SymbolOracle, ModelReply) + Send + 'static,
    {
        let pending = Arc::new(Mutex::new(Some(callback)));
        let worker_pending = Arc::clone(&pending);
        let worker_main = main.clone();
        let client = self.clone();

        let spawned = thread::Builder::new().name("namesmith-model".to_string()).spawn(move || {
            let reply = panic::catch_unwind(AssertUnwindSafe(|| client.invoke(&prompt)))
                .unwrap_or_else(|_| {
                    warn!("model worker panicked");
                    ModelReply::fallback(
                        FallbackReason::Internal,
                        failure_edits(FallbackReason::Internal, "model worker panicked"),
                    )
                });
            deliver(&worker_pending, &worker_main, reply);
        });

        if let Err(err) = spawned {
            warn!(error = %err, "could not start model worker");
            let reply = ModelReply::fallback(
                FallbackReason::Internal,
                failure_edits(FallbackReason::Internal, &err.to_string()),
            );
            deliver(&pending, main, reply);
        }
    }
}

fn deliver<F>(slot: &Mutex<Option<F>>, main: &MainHandle, reply: ModelReply)
where
    F: FnOnce(&mut dyn SymbolOracle, ModelReply) + Send + 'static,
{
    let callback = match slot.lock() {
        Ok(mut guard) => guard.take(),
        Err(poisoned) => poisoned.into_inner().take(),
    };
    if let Some(callback) = callback {
        main.post(move |oracle| callback(oracle, reply));
    }
}
