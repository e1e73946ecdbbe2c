//! Tracing setup shared by every subcommand.

use anyhow::{Result, anyhow};
use std::env;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "case_intake=info";
const LOG_FILTER_ENV: &str = "CASE_INTAKE_LOG";

fn resolve_filter(verbose: bool) -> EnvFilter {
    if verbose {
        return EnvFilter::new("case_intake=debug");
    }
    if let Ok(raw) = env::var(LOG_FILTER_ENV) {
        if let Ok(filter) = EnvFilter::try_new(raw.trim()) {
            return filter;
        }
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Install a stderr subscriber. Stdout stays reserved for command reports.
pub fn init_logging(verbose: bool) -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_filter(resolve_filter(verbose)),
        )
        .try_init()
        .map_err(|err| anyhow!("failed to initialise logging: {err}"))
}
