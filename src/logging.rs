//! provides logging helpers

use anyhow::{Context, Result};
use crossterm::tty::IsTty;
use tracing_subscriber::{
    filter,
    fmt::{layer, time::LocalTime},
    prelude::*,
    registry,
};

pub use tracing::{debug, debug_span, error, error_span, info, info_span, trace, warn, warn_span, Span};

/// initiate the global tracing subscriber
pub fn init() -> Result<()> {
    let env_filter = filter::EnvFilter::builder()
        .with_default_directive(filter::LevelFilter::INFO.into())
        .from_env()
        .context("invalid env filter")?;

    let fmt_layer = layer()
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_tty())
        .with_target(true)
        .with_thread_ids(true)
        .with_timer(LocalTime::rfc_3339())
        .with_filter(env_filter);

    registry().with(fmt_layer).init();

    Ok(())
}
