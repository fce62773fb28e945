//! LLM crate wrapper implementing [`GenerateProvider`].
//!
//! [`LlmChatProvider`] stores backend configuration and builds an llm
//! provider per request, because the token limit and the system prompt are
//! fixed at build time in the llm crate. Prompts go out as a single
//! user message of a chat.

use async_trait::async_trait;
use futures_util::StreamExt;
use llm::LLMProvider;
use llm::builder::{LLMBackend, LLMBuilder};
use llm::chat::{ChatMessage, StreamChunk};
use tracing::instrument;

use crate::types::{FinishReason, GenerateEvent, GenerateOptions, GenerateResponse};
use crate::{Result, SkaldError};

use super::traits::{GenerateProvider, GenerateStream};

/// Wraps llm crate provider configuration to implement [`GenerateProvider`].
///
/// # Example
///
/// ```ignore
/// use llm::builder::LLMBackend;
/// use skald::providers::LlmChatProvider;
///
/// let provider = LlmChatProvider::new(LLMBackend::OpenRouter, Some("your-key"), "openrouter");
/// ```
pub struct LlmChatProvider {
    backend: LLMBackend,
    api_key: Option<String>,
    name: String,
    /// Endpoint override (self-hosted Ollama, proxies).
    base_url: Option<String>,
    timeout_secs: u64,
}

impl LlmChatProvider {
    /// Create a provider for `backend`.
    ///
    /// * `api_key` - `None` for keyless backends such as a local Ollama
    /// * `name` - label used in logs and metrics (e.g. "openrouter")
    pub fn new(
        backend: LLMBackend,
        api_key: Option<impl Into<String>>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            api_key: api_key.map(Into::into),
            name: name.into(),
            base_url: None,
            timeout_secs: 120,
        }
    }

    /// Send requests to `url` instead of the backend's default endpoint.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the request timeout in seconds.
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    fn build_provider(&self, options: &GenerateOptions) -> Result<Box<dyn LLMProvider>> {
        let mut builder = LLMBuilder::new()
            .backend(self.backend.clone())
            .model(&options.model)
            .timeout_seconds(self.timeout_secs);
        if let Some(ref key) = self.api_key {
            builder = builder.api_key(key);
        }
        if let Some(ref system) = options.system {
            builder = builder.system(system);
        }
        if let Some(max) = options.max_tokens {
            builder = builder.max_tokens(max as u32);
        }
        if let Some(ref url) = self.base_url {
            builder = builder.base_url(url.clone());
        }

        builder.build().map_err(|e| SkaldError::Llm(e.to_string()))
    }
}

#[async_trait]
impl GenerateProvider for LlmChatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(name = "llm.generate", skip(self, prompt, options), fields(model = %options.model, provider = %self.name))]
    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<GenerateResponse> {
        let provider = self.build_provider(options)?;
        let messages = [ChatMessage::user().content(prompt).build()];

        let response = provider
            .chat(&messages)
            .await
            .map_err(SkaldError::from)?;

        Ok(GenerateResponse {
            text: reply_text(response.text())?,
            model: Some(options.model.clone()),
            finish_reason: FinishReason::Stop,
        })
    }

    #[instrument(name = "llm.generate_stream", skip(self, prompt, options), fields(model = %options.model, provider = %self.name))]
    async fn generate_stream(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<GenerateStream> {
        let provider = self.build_provider(options)?;
        let messages = [ChatMessage::user().content(prompt).build()];

        let stream = provider
            .chat_stream_with_tools(&messages, provider.tools())
            .await
            .map_err(SkaldError::from)?;

        // Reasoning and tool events have no place in authoring output.
        let events = stream.filter_map(|result| async move {
            match result {
                Ok(StreamChunk::Text(text)) => Some(Ok(GenerateEvent::Text(text))),
                Ok(StreamChunk::Done { .. }) => Some(Ok(GenerateEvent::Done(FinishReason::Stop))),
                Ok(_) => None,
                Err(e) => Some(Err(SkaldError::from(e))),
            }
        });

        Ok(Box::pin(events))
    }
}

/// The text of a chat reply; a reply without text is an error.
fn reply_text(text: Option<String>) -> Result<String> {
    text.filter(|t| !t.trim().is_empty())
        .ok_or(SkaldError::EmptyResponse)
}
