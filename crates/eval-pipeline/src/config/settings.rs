use anyhow::Result;
use config::{Config, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Settings {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub retrieval: RetrievalConfig,
    pub engine: EngineConfig,
    pub worker: WorkerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` overrides it at runtime.
    pub directive: String,
    /// Emit JSON to stdout instead of the human-readable format.
    pub json: bool,
    pub dir: String,
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directive: "info,eval_pipeline=debug".to_string(),
            json: false,
            dir: "logs".to_string(),
            file_prefix: "eval".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_max_size: u32,
    pub pool_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/eval_pipeline".to_string(),
            pool_max_size: 8,
            pool_timeout_seconds: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    /// Optional override: "openai" or "openrouter". Autodetected when unset.
    pub provider: Option<String>,
    pub default_model: Option<String>,
    pub chat_timeout_seconds: u64,
    pub embed_timeout_seconds: u64,
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    /// Sent as HTTP-Referer on OpenRouter-style backends only.
    pub http_referer: Option<String>,
    /// Sent as X-Title on OpenRouter-style backends only.
    pub app_name: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            provider: None,
            default_model: None,
            chat_timeout_seconds: 60,
            embed_timeout_seconds: 30,
            retry_attempts: 3,
            retry_base_delay_ms: 1000,
            http_referer: None,
            app_name: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Embedding width, constant per deployment. 128 is the width of the
    /// deterministic fallback embedder.
    pub dimension: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub min_chunk_chars: usize,
    pub search_timeout_seconds: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            dimension: 128,
            chunk_size: 1000,
            chunk_overlap: 200,
            min_chunk_chars: 50,
            search_timeout_seconds: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EngineConfig {
    pub evaluation_model: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_k: usize,
    pub similarity_threshold: f32,
    pub max_context_chars: usize,
    pub max_document_chars: usize,
    pub max_feedback_chars: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            evaluation_model: None,
            temperature: 0.3,
            max_tokens: 2000,
            top_k: 5,
            similarity_threshold: 0.3,
            max_context_chars: 6000,
            max_document_chars: 12000,
            max_feedback_chars: 4000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WorkerConfig {
    pub pool_size: usize,
    pub queue_capacity: usize,
    /// Queued rows older than this with no backing work item get re-enqueued
    /// at startup.
    pub stale_queued_grace_seconds: i64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            pool_size: 2,
            queue_capacity: 256,
            stale_queued_grace_seconds: 300,
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .add_source(File::with_name("config/settings").required(false))
            .add_source(
                Environment::with_prefix("EVAL")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        Ok(settings)
    }
}
