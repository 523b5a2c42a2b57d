pub mod client;
pub mod json;
pub mod provider;
pub mod retry;
pub mod types;

pub use client::{hash_embedding, LlmClient};
pub use provider::Provider;
pub use retry::RetryPolicy;
pub use types::{ChatMessage, ChatOptions, ChatSuccess, Evaluation, LlmApi, TokenUsage};
