//! Log subscriber setup for the command line tool

use crate::config::{LogFormat, LoggingConfig};
use crate::error::PipelineError;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Install the global subscriber. `RUST_LOG` takes precedence over the configured level.
pub fn init_logging(config: &LoggingConfig) -> Result<(), PipelineError> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| PipelineError::InvalidConfig(format!("log level {:?}: {e}", config.level)))?;

    let registry = Registry::default().with(env_filter);
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    let result = match config.format {
        LogFormat::Text => registry.with(fmt_layer).try_init(),
        LogFormat::Json => registry.with(fmt_layer.json()).try_init(),
    };
    result.map_err(|e| PipelineError::InvalidConfig(format!("logging already initialized: {e}")))?;

    debug!(level = %config.level, format = ?config.format, "Logging initialized");
    Ok(())
}
