//! Log setup for the `chaindb` binary.
//!
//! Command results go to stdout and logs go to stderr, so `chaindb get` can
//! be piped. The filter is taken from `CHAINDB_LOG`, then `RUST_LOG`, and
//! falls back to the `-v` count.

use anyhow::{Context, Result};
use clap::ValueEnum;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variables consulted for filter directives, in order.
const FILTER_VARS: [&str; 2] = ["CHAINDB_LOG", "RUST_LOG"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Colored, one event per line.
    Pretty,
    /// One JSON object per event, fields flattened.
    Json,
}

/// Default directives for `-v` given `verbosity` times.
pub fn directives(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn,chaindb=info,chaindb_storage=info",
        1 => "warn,chaindb=debug,chaindb_storage=debug",
        _ => "info,chaindb=trace,chaindb_storage=trace",
    }
}

fn filter(verbosity: u8) -> EnvFilter {
    FILTER_VARS
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .filter(|value| !value.trim().is_empty())
        .find_map(|value| EnvFilter::try_new(value).ok())
        .unwrap_or_else(|| EnvFilter::new(directives(verbosity)))
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(verbosity: u8, format: LogFormat) -> Result<()> {
    let registry = tracing_subscriber::registry().with(filter(verbosity));
    let installed = match format {
        LogFormat::Pretty => registry
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .try_init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(false)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    };
    installed.context("failed to install log subscriber")?;
    tracing::debug!(?format, verbosity, "logging ready");
    Ok(())
}
