//! Backend traits.
//!
//! The authoring service talks to the language model through
//! [`GenerateProvider`] only. Decorators ([`RetryingGenerateProvider`](super::RetryingGenerateProvider))
//! and fallback chains ([`ProviderChain`](super::ProviderChain)) implement
//! the same trait, so they stack freely.
//!
//! # Fallback Semantics
//!
//! Providers receive the model in [`GenerateOptions`] and self-report
//! availability:
//! - Return `ModelNotAvailable` to signal the chain should try the next provider
//! - Other errors are terminal and propagated to the caller

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;

use crate::Result;
use crate::types::{GenerateEvent, GenerateOptions, GenerateResponse};

/// Stream of generation events as returned by [`GenerateProvider::generate_stream`].
pub type GenerateStream = Pin<Box<dyn Stream<Item = Result<GenerateEvent>> + Send>>;

/// Provider for single-turn text generation.
#[async_trait]
pub trait GenerateProvider: Send + Sync {
    /// Provider name for logging/debugging.
    fn name(&self) -> &str;

    /// Non-streaming text generation.
    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<GenerateResponse>;

    /// Streaming text generation.
    ///
    /// The stream yields `Text` events in order and ends with `Done`, or with
    /// an error item. Dropping it abandons the generation.
    async fn generate_stream(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<GenerateStream>;
}
