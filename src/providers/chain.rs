//! Ordered fallback across generation providers.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::telemetry;
use crate::types::{GenerateOptions, GenerateResponse};
use crate::{Result, SkaldError};

use super::retry::{RetryConfig, RetryingGenerateProvider};
use super::traits::{GenerateProvider, GenerateStream};

/// Tries providers in the order they were added.
///
/// `ModelNotAvailable` always moves on to the next provider. A transient
/// error moves on too; with a retry policy set, that happens only once the
/// provider's retries are exhausted. Any other error ends the walk.
///
/// ```rust,ignore
/// let mut chain = ProviderChain::new().with_retry(RetryConfig::default());
/// chain.push(Arc::new(openrouter));
/// chain.push(Arc::new(local_ollama));
/// ```
#[derive(Default)]
pub struct ProviderChain {
    providers: Vec<Arc<dyn GenerateProvider>>,
    retry_config: Option<RetryConfig>,
}

impl ProviderChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap every provider added afterwards in a [`RetryingGenerateProvider`].
    pub fn with_retry(mut self, config: RetryConfig) -> Self {
        self.retry_config = Some(config);
        self
    }

    /// Append a provider at the lowest priority.
    pub fn push(&mut self, provider: Arc<dyn GenerateProvider>) {
        let provider = match &self.retry_config {
            Some(config) => Arc::new(RetryingGenerateProvider::new(provider, config.clone())),
            None => provider,
        };
        self.providers.push(provider);
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Provider names in priority order.
    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_owned()).collect()
    }

    fn is_fallback_trigger(e: &SkaldError) -> bool {
        matches!(e, SkaldError::ModelNotAvailable) || e.is_transient()
    }

    fn record_request(operation: &'static str, provider: &str, start: Instant, ok: bool) {
        let status = if ok { "ok" } else { "error" };
        metrics::counter!(telemetry::REQUESTS_TOTAL,
            "provider" => provider.to_owned(),
            "operation" => operation,
            "status" => status,
        )
        .increment(1);
        metrics::histogram!(telemetry::REQUEST_DURATION_SECONDS,
            "provider" => provider.to_owned(),
            "operation" => operation,
        )
        .record(start.elapsed().as_secs_f64());
    }
}

#[async_trait]
impl GenerateProvider for ProviderChain {
    fn name(&self) -> &str {
        "chain"
    }

    #[instrument(skip(self, prompt, options), fields(operation = "generate", model = %options.model))]
    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<GenerateResponse> {
        let start = Instant::now();
        let mut last_err = None;
        for provider in &self.providers {
            match provider.generate(prompt, options).await {
                Ok(response) => {
                    Self::record_request("generate", provider.name(), start, true);
                    return Ok(response);
                }
                Err(e) if Self::is_fallback_trigger(&e) => {
                    debug!(provider = provider.name(), error = %e, "falling back to next provider");
                    last_err = Some(e);
                }
                Err(e) => {
                    Self::record_request("generate", provider.name(), start, false);
                    return Err(e);
                }
            }
        }
        Self::record_request("generate", "none", start, false);
        Err(last_err.unwrap_or(SkaldError::NoProvider))
    }

    #[instrument(skip(self, prompt, options), fields(operation = "generate_stream", model = %options.model))]
    async fn generate_stream(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<GenerateStream> {
        let start = Instant::now();
        let mut last_err = None;
        for provider in &self.providers {
            match provider.generate_stream(prompt, options).await {
                Ok(stream) => {
                    Self::record_request("generate_stream", provider.name(), start, true);
                    return Ok(stream);
                }
                Err(e) if Self::is_fallback_trigger(&e) => {
                    debug!(provider = provider.name(), error = %e, "falling back to next provider");
                    last_err = Some(e);
                }
                Err(e) => {
                    Self::record_request("generate_stream", provider.name(), start, false);
                    return Err(e);
                }
            }
        }
        Self::record_request("generate_stream", "none", start, false);
        Err(last_err.unwrap_or(SkaldError::NoProvider))
    }
}
