use tracing::warn;

/// The two wire dialects the pipeline speaks. They differ in default model
/// ids, the name of the token-limit field, and the extra attribution headers
/// OpenRouter requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAi,
    OpenRouter,
}

impl Provider {
    /// Classify the backend from the configured credentials. OpenRouter keys
    /// carry an `sk-or-` prefix and its gateway hostname is unmistakable;
    /// everything else is treated as OpenAI-style.
    pub fn detect(api_key: &str, base_url: &str) -> Self {
        if api_key.starts_with("sk-or-") || base_url.to_lowercase().contains("openrouter") {
            Self::OpenRouter
        } else {
            Self::OpenAi
        }
    }

    pub fn default_chat_model(&self) -> &'static str {
        match self {
            Self::OpenAi => "gpt-4o-mini",
            Self::OpenRouter => "openai/gpt-4o-mini",
        }
    }

    pub fn default_embedding_model(&self) -> &'static str {
        match self {
            Self::OpenAi => "text-embedding-3-small",
            Self::OpenRouter => "openai/text-embedding-3-small",
        }
    }

    /// OpenRouter ids are namespaced (`vendor/model`); OpenAI ids are not.
    pub fn owns_model(&self, model: &str) -> bool {
        match self {
            Self::OpenAi => !model.contains('/'),
            Self::OpenRouter => model.contains('/'),
        }
    }

    /// Resolve the caller's requested model, substituting the provider
    /// default when the request is absent or clearly belongs to the other
    /// dialect.
    pub fn resolve_model(&self, requested: Option<&str>) -> String {
        match requested {
            Some(model) if self.owns_model(model) => model.to_string(),
            Some(model) => {
                warn!(
                    "Model '{}' does not belong to the {} dialect, using {}",
                    model,
                    self,
                    self.default_chat_model()
                );
                self.default_chat_model().to_string()
            }
            None => self.default_chat_model().to_string(),
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenAi => f.write_str("openai"),
            Self::OpenRouter => f.write_str("openrouter"),
        }
    }
}
