//! Process-wide tracing subscriber setup.
//!
//! The database layer logs through the `log` facade; `LogTracer` forwards
//! those records into the same subscriber as the engine's spans.

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Failed to install log bridge: {0}")]
    LogBridge(#[from] log::SetLoggerError),

    #[error("Failed to install tracing subscriber: {0}")]
    Subscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Builds the `EnvFilter`: `RUST_LOG` when set, otherwise `default_directive`.
pub fn env_filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive))
}

/// Installs the global subscriber. Logs go to stderr so stdout stays free
/// for command output.
pub fn init_logging(format: LogFormat, default_directive: &str) -> Result<(), LoggingError> {
    tracing_log::LogTracer::init()?;

    let filter = env_filter(default_directive);
    match format {
        LogFormat::Text => {
            let subscriber = Registry::default()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr).with_target(false));
            tracing::subscriber::set_global_default(subscriber)?;
        }
        LogFormat::Json => {
            let subscriber = Registry::default().with(filter).with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_writer(std::io::stderr),
            );
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }

    Ok(())
}
