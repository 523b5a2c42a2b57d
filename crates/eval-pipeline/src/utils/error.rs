use thiserror::Error;

#[derive(Error, Debug)]
pub enum EvalError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("LLM quota exhausted: {message}")]
    Quota {
        message: String,
        retry_after: Option<u64>,
    },

    #[error("Transient external error: {0}")]
    Transient(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Concurrent update conflict: {0}")]
    Concurrency(String),

    #[error("Engine error: {0}")]
    Engine(String),
}

impl EvalError {
    /// Transient failures are the only ones the retry wrapper re-attempts.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn is_quota(&self) -> bool {
        matches!(self, Self::Quota { .. })
    }
}

impl From<sqlx::Error> for EvalError {
    fn from(err: sqlx::Error) -> Self {
        EvalError::Persistence(err.to_string())
    }
}
