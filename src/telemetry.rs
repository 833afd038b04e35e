//! Tracing subscriber installation.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{
    fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::{LogFormat, LoggingConfig};
use crate::error::{PrintdError, Result};

/// Installs the global subscriber. `RUST_LOG` directives take precedence
/// over the configured level. Logs go to stderr so stdout stays free for
/// command output.
pub fn init(logging: &LoggingConfig) -> Result<()> {
    let level = parse_level(&logging.level)?;
    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|err| PrintdError::config(format!("failed to install tracing subscriber: {err}")))
}

pub fn parse_level(raw: &str) -> Result<LevelFilter> {
    raw.trim()
        .parse::<LevelFilter>()
        .map_err(|err| PrintdError::config(format!("invalid log level '{raw}': {err}")))
}
