use crate::config::LlmConfig;
use crate::llm::json::parse_float_list;
use crate::llm::provider::Provider;
use crate::llm::retry::{with_backoff, RetryPolicy};
use crate::llm::types::{ChatMessage, ChatOptions, ChatSuccess, LlmApi, TokenUsage};
use crate::utils::error::EvalError;
use crate::utils::vectors::l2_normalize;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a str,
    model: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Single point of contact with the LLM backend. Safe for concurrent use;
/// retry state is per call.
pub struct LlmClient {
    http: Client,
    provider: Provider,
    config: LlmConfig,
    policy: RetryPolicy,
    dimension: usize,
}

impl LlmClient {
    pub fn new(config: LlmConfig, dimension: usize) -> Self {
        let provider = match config.provider.as_deref() {
            Some("openai") => Provider::OpenAi,
            Some("openrouter") => Provider::OpenRouter,
            Some(other) => {
                warn!("Unknown provider override '{}', autodetecting", other);
                Provider::detect(&config.api_key, &config.base_url)
            }
            None => Provider::detect(&config.api_key, &config.base_url),
        };
        info!(
            "LLM backend classified as {} at {}",
            provider, config.base_url
        );
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());
        let policy = RetryPolicy::new(config.retry_attempts, config.retry_base_delay_ms);
        Self {
            http,
            provider,
            config,
            policy,
            dimension,
        }
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    /// Connectivity probe against the model listing. Failure is logged, not
    /// fatal; the worker can still start and degrade per call.
    pub async fn connect_probe(&self) {
        let url = format!("{}/models", self.config.base_url);
        let request = self
            .authorized(self.http.get(&url))
            .timeout(Duration::from_secs(10));
        match request.send().await {
            Ok(response) if response.status().is_success() => {
                info!("✅ LLM backend reachable ({})", self.provider);
            }
            Ok(response) => {
                warn!(
                    "LLM backend answered {} to the model listing probe",
                    response.status()
                );
            }
            Err(e) => warn!("LLM backend unreachable: {}", e),
        }
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        let mut builder = builder;
        if !self.config.api_key.is_empty() {
            builder = builder.header(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {}", self.config.api_key),
            );
        }
        if self.provider == Provider::OpenRouter {
            if let Some(referer) = &self.config.http_referer {
                builder = builder.header("HTTP-Referer", referer);
            }
            if let Some(app_name) = &self.config.app_name {
                builder = builder.header("X-Title", app_name);
            }
        }
        builder
    }

    async fn chat_once(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<ChatSuccess, EvalError> {
        // The token-limit field is named differently by the two dialects.
        let (max_tokens, max_completion_tokens) = match self.provider {
            Provider::OpenRouter => (Some(options.max_tokens), None),
            Provider::OpenAi => (None, Some(options.max_tokens)),
        };
        let request = ChatCompletionRequest {
            model,
            messages,
            temperature: options.temperature,
            max_tokens,
            max_completion_tokens,
            stream: false,
        };

        let url = format!("{}/chat/completions", self.config.base_url);
        let response = self
            .authorized(self.http.post(&url))
            .timeout(Duration::from_secs(self.config.chat_timeout_seconds))
            .json(&request)
            .send()
            .await
            .map_err(|e| EvalError::Transient(format!("chat request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_seconds(&response);
            let body = response.text().await.unwrap_or_default();
            return Err(classify_http_failure(status, retry_after, &body));
        }

        let body: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| EvalError::Transient(format!("chat response unreadable: {e}")))?;
        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| EvalError::Engine("chat response carried no choices".to_string()))?;

        Ok(ChatSuccess {
            content: choice.message.content.unwrap_or_default(),
            model: body.model.unwrap_or_else(|| model.to_string()),
            finish_reason: choice.finish_reason,
            usage: body.usage,
        })
    }

    async fn embed_once(&self, text: &str) -> Result<Vec<f32>, EvalError> {
        let request = EmbeddingRequest {
            input: text,
            model: self.provider.default_embedding_model(),
        };
        let url = format!("{}/embeddings", self.config.base_url);
        let response = self
            .authorized(self.http.post(&url))
            .timeout(Duration::from_secs(self.config.embed_timeout_seconds))
            .json(&request)
            .send()
            .await
            .map_err(|e| EvalError::Transient(format!("embedding request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_seconds(&response);
            let body = response.text().await.unwrap_or_default();
            return Err(classify_http_failure(status, retry_after, &body));
        }

        let body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EvalError::Transient(format!("embedding response unreadable: {e}")))?;
        let embedding = body
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| EvalError::Engine("embedding response carried no data".to_string()))?;

        if embedding.len() != self.dimension {
            return Err(EvalError::Engine(format!(
                "embedding dimension mismatch: expected {}, got {}",
                self.dimension,
                embedding.len()
            )));
        }
        Ok(embedding)
    }

    /// Second embedding tier: ask the chat model for comma-separated floats
    /// and parse whatever comes back.
    async fn embed_via_chat(&self, text: &str) -> Result<Vec<f32>, EvalError> {
        let excerpt: String = text.chars().take(2000).collect();
        let messages = [
            ChatMessage::system("You convert text into fixed-width numeric embeddings."),
            ChatMessage::user(format!(
                "Reply with exactly {} comma-separated floating point numbers between -1 and 1 \
                 that represent the text below. No prose, no brackets.\n\nTEXT:\n{}",
                self.dimension, excerpt
            )),
        ];
        let options = ChatOptions {
            model: None,
            temperature: 0.0,
            max_tokens: 2000,
        };
        let chat = LlmApi::chat(self, &messages, &options).await?;

        let mut values = parse_float_list(&chat.content);
        if values.len() < self.dimension / 2 {
            return Err(EvalError::Engine(format!(
                "chat produced {} usable floats, need at least {}",
                values.len(),
                self.dimension / 2
            )));
        }
        values.truncate(self.dimension);
        values.resize(self.dimension, 0.0);
        if !l2_normalize(&mut values) {
            return Err(EvalError::Engine(
                "chat-derived embedding had zero magnitude".to_string(),
            ));
        }
        Ok(values)
    }
}

#[async_trait]
impl LlmApi for LlmClient {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<ChatSuccess, EvalError> {
        let model = self.provider.resolve_model(options.model.as_deref());
        debug!("Chat completion via {} ({} messages)", model, messages.len());
        with_backoff(&self.policy, "chat completion", || {
            self.chat_once(&model, messages, options)
        })
        .await
    }

    /// Three-tier strategy: embeddings endpoint, then chat-prompted floats,
    /// then the deterministic hash embedding. The last tier cannot fail, so
    /// neither can this method.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EvalError> {
        match with_backoff(&self.policy, "embedding", || self.embed_once(text)).await {
            Ok(embedding) => return Ok(embedding),
            Err(e) => warn!(
                "Embedding endpoint unusable ({}), prompting the chat model instead",
                e
            ),
        }
        match self.embed_via_chat(text).await {
            Ok(embedding) => return Ok(embedding),
            Err(e) => warn!(
                "Chat-derived embedding failed ({}), using hash embedding",
                e
            ),
        }
        Ok(hash_embedding(text, self.dimension))
    }
}

fn retry_after_seconds(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}

/// Sort a non-2xx response into the error taxonomy: explicit quota signals
/// are fatal and never retried, rate limits and server errors are
/// transient, anything else was our own bad request.
fn classify_http_failure(status: StatusCode, retry_after: Option<u64>, body: &str) -> EvalError {
    let lower = body.to_lowercase();
    let quota_signal = lower.contains("quota")
        || lower.contains("insufficient")
        || lower.contains("billing");
    if status == StatusCode::PAYMENT_REQUIRED
        || (status == StatusCode::TOO_MANY_REQUESTS && quota_signal)
    {
        return EvalError::Quota {
            message: snippet(body),
            retry_after,
        };
    }
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        return EvalError::Transient(format!("LLM backend returned {status}"));
    }
    EvalError::Engine(format!(
        "LLM request rejected ({status}): {}",
        snippet(body)
    ))
}

fn snippet(body: &str) -> String {
    let single_line: String = body.split_whitespace().collect::<Vec<_>>().join(" ");
    single_line.chars().take(200).collect()
}

/// Deterministic embedding derived from character codes: the same text
/// always yields the same unit-norm vector, so degraded deployments stay
/// self-consistent.
pub fn hash_embedding(text: &str, dimension: usize) -> Vec<f32> {
    let dimension = dimension.max(1);
    let mut values = vec![0.0f32; dimension];
    for (position, ch) in text.chars().enumerate() {
        let code = ch as u32;
        let slot = (code as usize + position) % dimension;
        let mixed = code
            .wrapping_mul(31)
            .wrapping_add((position as u32).wrapping_mul(7))
            % 2000;
        values[slot] += mixed as f32 / 1000.0 - 1.0;
    }
    if !l2_normalize(&mut values) {
        values[0] = 1.0;
    }
    values
}
