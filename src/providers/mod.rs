//! Generation backends.
//!
//! The language model itself is reached through the llm crate
//! ([`LlmChatProvider`]); everything else here composes providers.

pub mod chain;
pub mod llm_chat;
pub mod retry;
pub mod traits;

pub use chain::ProviderChain;
pub use llm_chat::LlmChatProvider;
pub use retry::{RetryConfig, RetryingGenerateProvider};
pub use traits::{GenerateProvider, GenerateStream};
