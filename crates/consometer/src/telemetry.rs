//! Logging setup

use anyhow::{bail, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Map a level name to a filter directive.
///
/// Accepts `trace`, `debug`, `info`, `warn`/`warning`, `error`, and `fatal`/`panic`
/// as synonyms of `error`.
pub fn level_directive(level: &str) -> Option<&'static str> {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Some("trace"),
        "debug" => Some("debug"),
        "info" => Some("info"),
        "warn" | "warning" => Some("warn"),
        "error" | "fatal" | "panic" => Some("error"),
        _ => None,
    }
}

/// Build the global filter: an explicit level wins, `RUST_LOG` applies otherwise
pub fn filter(level: Option<&str>) -> Result<EnvFilter> {
    match level {
        Some(level) => match level_directive(level) {
            Some(directive) => Ok(EnvFilter::new(directive)),
            None => bail!("Bad log level: {}", level),
        },
        None => Ok(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))),
    }
}

/// Install the global subscriber
pub fn init(level: Option<&str>) -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(filter(level)?)
        .try_init()?;
    Ok(())
}
