//! Skald - streaming hand-off and result caching for AI-generated text
//!
//! Skald sits between an authoring UI and a language model. Long
//! generations are not returned inline: the initiating request gets a
//! stream id back, the generation keeps running on its own task and writes
//! into a [`ResponseChannel`], and a second request redeems the id to read
//! the text as it is produced.
//!
//! - [`ResponseChannel`] buffers chunks so a late reader replays them.
//! - [`ChannelRegistry`] hands channels out once by id and evicts
//!   unredeemed ones by age and count, cancelling their generations.
//! - [`ResultCache`] keeps finished results (translations) in memory.
//! - [`AuthoringService`] decides between cache, synchronous call and
//!   stream for every operation.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use skald::{
//!     AuthoringService, ChannelRegistry, LlmChatProvider, RegistryConfig, ServiceConfig,
//!     TranslateRequest,
//! };
//!
//! #[tokio::main]
//! async fn main() -> skald::Result<()> {
//!     let provider = LlmChatProvider::new(
//!         llm::builder::LLMBackend::OpenRouter,
//!         Some("sk-or-your-key"),
//!         "openrouter",
//!     );
//!     let service = AuthoringService::new(
//!         Arc::new(provider),
//!         ServiceConfig::new("anthropic/claude-sonnet-4"),
//!     );
//!     let registry = ChannelRegistry::new(&RegistryConfig::default());
//!
//!     let request = TranslateRequest::new("Guten Morgen", "German", "English").streaming(true);
//!     let id = service.translate(&registry, &request).await?;
//!
//!     if let Some(id) = id.stream_id() {
//!         let channel = service.fetch_stream(&registry, id)?;
//!         let mut text = String::new();
//!         channel.drain(&mut text).await?;
//!         println!("{text}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod channel;
pub mod error;
pub mod providers;
pub mod registry;
#[cfg(feature = "server")]
pub mod server;
pub mod service;
pub mod telemetry;
pub mod types;

/// Package version from Cargo.toml.
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

// Re-export main types at crate root
pub use cache::{CacheConfig, ResultCache, TranslationKey};
pub use channel::{ChannelConfig, ChunkSink, Drained, Outcome, ResponseChannel, SinkClosed};
pub use error::{Result, SkaldError};
pub use providers::{GenerateProvider, LlmChatProvider, ProviderChain, RetryConfig};
pub use registry::{ChannelRegistry, RegistryConfig, SessionConfig, SessionStore};
pub use service::{
    AuthoringService, MarkupSanitizer, Sanitizer, ServiceConfig, spawn_generation,
};

// Re-export all types
pub use types::{
    CreateRequest, FinishReason, GenerateEvent, GenerateOptions, GenerateResponse, Initiated,
    PromptRequest, TranslateRequest,
};
