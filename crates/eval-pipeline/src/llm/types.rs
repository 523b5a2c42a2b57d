use crate::utils::error::EvalError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatOptions {
    /// Requested model id; the client substitutes the provider default when
    /// unset or foreign to the detected provider.
    pub model: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            model: None,
            temperature: 0.3,
            max_tokens: 2000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct ChatSuccess {
    pub content: String,
    pub model: String,
    pub finish_reason: Option<String>,
    pub usage: Option<TokenUsage>,
}

/// A chat response paired with its best-effort JSON interpretation. `parsed`
/// is `None` when no balanced object could be recovered; callers still get
/// the raw text.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub raw: String,
    pub parsed: Option<serde_json::Value>,
    pub model: String,
}

/// The uniform LLM surface the engine and retrieval layers depend on.
/// Production uses [`super::LlmClient`]; tests substitute scripted fakes.
#[async_trait]
pub trait LlmApi: Send + Sync {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<ChatSuccess, EvalError>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EvalError>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EvalError> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed(text).await?);
        }
        Ok(embeddings)
    }

    async fn evaluate(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<Evaluation, EvalError> {
        let chat = self.chat(messages, options).await?;
        let parsed = super::json::extract_json(&chat.content);
        Ok(Evaluation {
            raw: chat.content,
            parsed,
            model: chat.model,
        })
    }
}
