//! Types for text generation operations.

use serde::{Deserialize, Serialize};

use super::response::FinishReason;

/// Options for text generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateOptions {
    /// Model to use for generation.
    pub model: String,

    /// System instructions sent ahead of the prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    /// Maximum number of tokens to generate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,
}

impl GenerateOptions {
    /// Create options with the specified model.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system: None,
            max_tokens: None,
        }
    }

    /// Set the system instructions.
    pub fn system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Set max tokens.
    pub fn max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Response from text generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateResponse {
    /// Generated text.
    pub text: String,

    /// Model used for generation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Reason generation stopped.
    pub finish_reason: FinishReason,
}

/// Events emitted during streaming generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
#[non_exhaustive]
pub enum GenerateEvent {
    /// Text chunk generated.
    #[serde(rename = "text")]
    Text(String),

    /// Generation complete.
    #[serde(rename = "done")]
    Done(FinishReason),
}
