use crate::config::LoggingConfig;
use crate::utils::error::EvalError;

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Stdout plus a daily-rolling file under `config.dir`. The filter
/// directive comes from configuration; `RUST_LOG` still wins so operators
/// can raise verbosity without touching the settings file.
pub fn init_logger(config: &LoggingConfig) -> Result<(), EvalError> {
    let directive = std::env::var("RUST_LOG").unwrap_or_else(|_| config.directive.clone());
    let filter = EnvFilter::try_new(&directive)
        .map_err(|e| EvalError::Validation(format!("bad log directive '{directive}': {e}")))?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(config.file_prefix.clone())
        .filename_suffix("log")
        .build(&config.dir)
        .map_err(|e| {
            EvalError::Validation(format!("cannot open log directory '{}': {e}", config.dir))
        })?;

    // The file copy never carries ANSI colors; only the stdout format is
    // selectable.
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .with_target(true);
    let registry = tracing_subscriber::registry().with(filter).with(file_layer);

    if config.json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stdout)
                    .with_target(true),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .pretty()
                    .with_writer(std::io::stdout)
                    .with_target(true),
            )
            .init();
    }

    Ok(())
}
