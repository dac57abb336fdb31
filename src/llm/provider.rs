//! LLM Provider trait — common interface for chat-completion backends.

use async_trait::async_trait;
use thiserror::Error;

pub use crate::llm::openai::Message;

// ── Common Parameters ──────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct LlmParams {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Error)]
pub enum LlmError {
    /// Transport-level failure.
    #[error("llm request failed: {0}")]
    Request(String),
    /// HTTP non-2xx from the service.
    #[error("llm returned HTTP {status}: {body}")]
    Remote { status: u16, body: String },
    /// Body did not have the expected completion shape.
    #[error("llm response unparseable: {0}")]
    Parse(String),
}

/// Common interface for LLM providers. The transcript cleaner only
/// needs one-shot completions, so there is no streaming surface.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Non-streaming chat completion.
    async fn chat(
        &self,
        messages: Vec<Message>,
        options: Option<LlmParams>,
    ) -> Result<String, LlmError>;

    /// Provider identifier (e.g. "openai").
    fn id(&self) -> &str;
}

// ── OpenAI adapter ─────────────────────────────────────

use crate::llm::openai::OpenAIClient;

/// Wraps [`OpenAIClient`] to implement `LlmProvider`.
pub struct OpenAIProvider {
    client: OpenAIClient,
    provider_id: String,
}

impl OpenAIProvider {
    pub fn new(api_key: String, base_url: Option<String>, model: Option<String>) -> Self {
        Self {
            client: OpenAIClient::new(api_key, base_url, model),
            provider_id: "openai".to_string(),
        }
    }

    pub fn with_id(mut self, id: String) -> Self {
        self.provider_id = id;
        self
    }
}

#[async_trait]
impl LlmProvider for OpenAIProvider {
    async fn chat(
        &self,
        messages: Vec<Message>,
        options: Option<LlmParams>,
    ) -> Result<String, LlmError> {
        self.client.chat(messages, options).await
    }

    fn id(&self) -> &str {
        &self.provider_id
    }
}
