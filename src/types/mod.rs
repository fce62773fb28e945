//! Public types of the skald API.

mod authoring;
mod generate;
mod response;

pub use authoring::{CreateRequest, Initiated, PromptRequest, TranslateRequest};
pub use generate::{GenerateEvent, GenerateOptions, GenerateResponse};
pub use response::FinishReason;
