//! Request and result types of the authoring operations.

use serde::{Deserialize, Serialize};

/// Translate a text between two languages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslateRequest {
    pub text: String,
    pub source_language: String,
    pub target_language: String,
    /// The text is HTML and its markup should survive translation.
    #[serde(default)]
    pub rich_text: bool,
    #[serde(default)]
    pub streaming: bool,
}

impl TranslateRequest {
    pub fn new(
        text: impl Into<String>,
        source_language: impl Into<String>,
        target_language: impl Into<String>,
    ) -> Self {
        Self {
            text: text.into(),
            source_language: source_language.into(),
            target_language: target_language.into(),
            rich_text: false,
            streaming: false,
        }
    }

    pub fn rich_text(mut self, rich_text: bool) -> Self {
        self.rich_text = rich_text;
        self
    }

    pub fn streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }
}

/// Free-form prompt execution, optionally on a supplied text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptRequest {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,
}

impl PromptRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            text: None,
            max_tokens: None,
        }
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Content creation as driven by the authoring dialog.
///
/// `text_length` is either a plain instruction ("one short paragraph") or
/// `"<tokens> | <instruction>"`, in which case the number becomes the token
/// limit of the generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRequest {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_length: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_text: Option<String>,
    #[serde(default)]
    pub rich_text: bool,
    #[serde(default)]
    pub streaming: bool,
}

impl CreateRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            text_length: None,
            input_text: None,
            rich_text: false,
            streaming: false,
        }
    }

    pub fn text_length(mut self, text_length: impl Into<String>) -> Self {
        self.text_length = Some(text_length.into());
        self
    }

    pub fn input_text(mut self, input_text: impl Into<String>) -> Self {
        self.input_text = Some(input_text.into());
        self
    }

    pub fn rich_text(mut self, rich_text: bool) -> Self {
        self.rich_text = rich_text;
        self
    }

    pub fn streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }
}

/// What an initiating operation hands back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Initiated {
    /// The finished, sanitized text.
    Text(String),
    /// Id of a registered response channel, redeemable by a fetch-stream call.
    Stream(String),
}

impl Initiated {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Initiated::Text(text) => Some(text),
            Initiated::Stream(_) => None,
        }
    }

    pub fn stream_id(&self) -> Option<&str> {
        match self {
            Initiated::Stream(id) => Some(id),
            Initiated::Text(_) => None,
        }
    }
}
