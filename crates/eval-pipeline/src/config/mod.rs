pub mod settings;

pub use settings::{
    DatabaseConfig, EngineConfig, LlmConfig, LoggingConfig, RetrievalConfig, Settings,
    WorkerConfig,
};
