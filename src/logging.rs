//! Tracing subscriber setup.
//!
//! Events go to stderr so CLI output on stdout stays machine-readable. The
//! filter comes from `RUST_LOG` when set, otherwise from `[logging] filter`.

use crate::config::{LogFormat, LoggingConfig};
use thiserror::Error;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),
    #[error("failed to install tracing subscriber: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// Build the filter: `RUST_LOG` if present, else the configured directive.
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter, LoggingError> {
    let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    resolve_filter(env.as_deref(), config)
}

/// A non-empty `env` directive wins over `config.filter`.
fn resolve_filter(env: Option<&str>, config: &LoggingConfig) -> Result<EnvFilter, LoggingError> {
    match env {
        Some(directive) if !directive.is_empty() => Ok(EnvFilter::try_new(directive)?),
        _ => Ok(EnvFilter::try_new(&config.filter)?),
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), LoggingError> {
    let filter = build_filter(config)?;
    let registry = tracing_subscriber::registry().with(filter);
    match config.format {
        LogFormat::Full => registry
            .with(fmt::layer().with_writer(std::io::stderr).with_thread_names(true))
            .try_init()?,
        LogFormat::Compact => registry
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .try_init()?,
    }
    Ok(())
}
