//! Authoring operations: the decision between cache, synchronous call and
//! stream for every generation request.
//!
//! ```text
//!  request ──► validate ──► ResultCache hit? ──yes──► Text(cached)
//!                               │ no
//!                               ▼
//!                          streaming? ──no──► generate ─► sanitize ─► (cache) ─► Text
//!                               │ yes
//!                               ▼
//!               ResponseChannel ─► ChannelRegistry::register ─► spawn_generation ─► Stream(id)
//! ```
//!
//! A later fetch-stream request redeems the id through
//! [`AuthoringService::fetch_stream`] and drains the channel.
//!
//! Input errors are reported before any backend call is made or any
//! channel is created. Backend errors are logged in full here and
//! propagated; the web layer turns them into a generic message.

pub mod prompts;
mod sanitize;
mod streaming;

pub use sanitize::{MarkupSanitizer, Sanitizer};
pub use streaming::spawn_generation;

use std::sync::Arc;

use tracing::{debug, error, instrument};

use crate::cache::{CacheConfig, ResultCache, TranslationKey};
use crate::channel::{ChannelConfig, Outcome, ResponseChannel};
use crate::providers::GenerateProvider;
use crate::registry::ChannelRegistry;
use crate::types::{
    CreateRequest, GenerateOptions, Initiated, PromptRequest, TranslateRequest,
};
use crate::{Result, SkaldError};

use self::prompts::Prompt;

/// Configuration for an [`AuthoringService`].
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Model passed to the provider.
    pub model: String,
    /// Token limit of content creation when none is requested. Default: 400.
    pub default_max_tokens: usize,
    /// Word budget of the text sent for keyword extraction. Default: 1000.
    pub keywords_max_words: usize,
    /// Cache translations that were delivered as a stream. Default: false.
    pub cache_streamed: bool,
    /// Settings of the channels created for streamed results.
    pub channel: ChannelConfig,
    /// Bounds of the translation cache.
    pub cache: CacheConfig,
}

impl ServiceConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            default_max_tokens: 400,
            keywords_max_words: 1000,
            cache_streamed: false,
            channel: ChannelConfig::default(),
            cache: CacheConfig::default(),
        }
    }

    pub fn default_max_tokens(mut self, n: usize) -> Self {
        self.default_max_tokens = n;
        self
    }

    pub fn keywords_max_words(mut self, n: usize) -> Self {
        self.keywords_max_words = n;
        self
    }

    pub fn cache_streamed(mut self, enabled: bool) -> Self {
        self.cache_streamed = enabled;
        self
    }

    pub fn channel(mut self, channel: ChannelConfig) -> Self {
        self.channel = channel;
        self
    }

    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }
}

/// Entry point of the authoring operations.
///
/// Shared by all request handlers (`Arc<AuthoringService>`); the
/// per-session [`ChannelRegistry`] is passed into the operations that
/// may stream.
pub struct AuthoringService {
    provider: Arc<dyn GenerateProvider>,
    sanitizer: Arc<dyn Sanitizer>,
    translations: Arc<ResultCache<TranslationKey>>,
    config: ServiceConfig,
}

impl AuthoringService {
    pub fn new(provider: Arc<dyn GenerateProvider>, config: ServiceConfig) -> Self {
        Self {
            provider,
            sanitizer: Arc::new(MarkupSanitizer),
            translations: Arc::new(ResultCache::new(&config.cache)),
            config,
        }
    }

    /// Replace the default [`MarkupSanitizer`].
    pub fn with_sanitizer(mut self, sanitizer: Arc<dyn Sanitizer>) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// The process-wide translation cache.
    pub fn translation_cache(&self) -> &ResultCache<TranslationKey> {
        &self.translations
    }

    // ========================================================================
    // Initiating operations
    // ========================================================================

    /// Translate a text, from the cache when possible.
    ///
    /// A cached translation is returned as text even when a stream was
    /// requested.
    #[instrument(skip_all, fields(operation = "translate", source = %request.source_language, target = %request.target_language, streaming = request.streaming))]
    pub async fn translate(
        &self,
        registry: &ChannelRegistry,
        request: &TranslateRequest,
    ) -> Result<Initiated> {
        require(&request.text, "No text given")?;
        require(&request.source_language, "No sourceLanguage given")?;
        require(&request.target_language, "No targetLanguage given")?;

        let key = TranslationKey::new(
            &request.source_language,
            &request.target_language,
            &request.text,
        );
        if let Some(cached) = self.translations.get(&key).filter(|t| !t.trim().is_empty()) {
            debug!("using cached translation");
            return Ok(Initiated::Text(cached));
        }

        let prompt = prompts::translation(
            &request.text,
            &request.source_language,
            &request.target_language,
            request.rich_text,
        );

        if request.streaming {
            let channel = self.new_channel();
            let id = registry.register(&channel)?;
            if self.config.cache_streamed {
                self.cache_on_completion(&channel, key);
            }
            self.start_stream(prompt, None, channel);
            return Ok(Initiated::Stream(id));
        }

        let translation = self.generate(prompt, None).await?;
        if !translation.trim().is_empty() {
            self.translations.put(key, translation.clone());
        }
        Ok(Initiated::Text(translation))
    }

    /// Create content from the authoring dialog's prompt.
    #[instrument(skip_all, fields(operation = "create", streaming = request.streaming))]
    pub async fn create(
        &self,
        registry: &ChannelRegistry,
        request: &CreateRequest,
    ) -> Result<Initiated> {
        require(&request.prompt, "No prompt given")?;

        let creation = prompts::creation(
            &request.prompt,
            request.text_length.as_deref(),
            request.rich_text,
            self.config.default_max_tokens,
        );
        let prompt = prompts::on_text(&creation.instruction, request.input_text.as_deref());

        if request.streaming {
            let channel = self.new_channel();
            let id = registry.register(&channel)?;
            self.start_stream(prompt, Some(creation.max_tokens), channel);
            return Ok(Initiated::Stream(id));
        }

        let text = self.generate(prompt, Some(creation.max_tokens)).await?;
        Ok(Initiated::Text(text))
    }

    // ========================================================================
    // Synchronous operations
    // ========================================================================

    /// Keywords describing `text`.
    #[instrument(skip_all, fields(operation = "keywords"))]
    pub async fn keywords(&self, text: &str) -> Result<Vec<String>> {
        require(text, "No text given")?;
        let reply = self
            .generate(prompts::keywords(text, self.config.keywords_max_words), None)
            .await?;
        Ok(prompts::parse_keywords(&reply))
    }

    /// A short description of `text`, optionally limited to `max_words`.
    #[instrument(skip_all, fields(operation = "description"))]
    pub async fn description(&self, text: &str, max_words: Option<usize>) -> Result<String> {
        require(text, "No text given")?;
        self.generate(prompts::description(text, max_words), None)
            .await
    }

    /// Execute a free-form prompt, optionally on a supplied text.
    #[instrument(skip_all, fields(operation = "prompt"))]
    pub async fn prompt(&self, request: &PromptRequest) -> Result<String> {
        require(&request.prompt, "No prompt given")?;
        let prompt = prompts::on_text(&request.prompt, request.text.as_deref());
        self.generate(prompt, request.max_tokens).await
    }

    // ========================================================================
    // Fetch-stream
    // ========================================================================

    /// Redeem a stream id. Works once per id.
    pub fn fetch_stream(&self, registry: &ChannelRegistry, id: &str) -> Result<ResponseChannel> {
        require(id, "No stream id given")?;
        registry.retrieve(id)
    }

    // ========================================================================
    // Backend plumbing
    // ========================================================================

    fn options(&self, system: String, max_tokens: Option<usize>) -> GenerateOptions {
        let options = GenerateOptions::new(&self.config.model).system(system);
        match max_tokens {
            Some(n) => options.max_tokens(n),
            None => options,
        }
    }

    /// Synchronous backend call; the result comes back sanitized.
    ///
    /// A blank reply fails with [`SkaldError::EmptyResponse`].
    async fn generate(&self, prompt: Prompt, max_tokens: Option<usize>) -> Result<String> {
        let options = self.options(prompt.system, max_tokens);
        let reply = self
            .provider
            .generate(&prompt.user, &options)
            .await
            .and_then(|response| {
                if response.text.trim().is_empty() {
                    Err(SkaldError::EmptyResponse)
                } else {
                    Ok(response.text)
                }
            });
        match reply {
            Ok(text) => Ok(self.sanitizer.sanitize(&text)),
            Err(e) => {
                error!(provider = self.provider.name(), error = %e, "generation failed");
                Err(e)
            }
        }
    }

    fn new_channel(&self) -> ResponseChannel {
        ResponseChannel::with_config(self.config.channel.clone())
    }

    fn start_stream(&self, prompt: Prompt, max_tokens: Option<usize>, channel: ResponseChannel) {
        let options = self.options(prompt.system, max_tokens);
        spawn_generation(self.provider.clone(), prompt.user, options, channel);
    }

    fn cache_on_completion(&self, channel: &ResponseChannel, key: TranslationKey) {
        let cache = Arc::clone(&self.translations);
        let sanitizer = Arc::clone(&self.sanitizer);
        channel.on_complete(move |outcome| {
            if let Outcome::Completed { whole, .. } = outcome
                && !whole.trim().is_empty()
            {
                cache.put(key, sanitizer.sanitize(&whole));
            }
        });
    }
}

fn require(value: &str, message: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(SkaldError::InvalidRequest(message.to_owned()));
    }
    Ok(())
}
