pub mod openai;
pub mod provider;

pub use openai::{Message, OpenAIClient};
pub use provider::{LlmError, LlmParams, LlmProvider, OpenAIProvider};
