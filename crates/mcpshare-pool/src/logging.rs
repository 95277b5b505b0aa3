//! Tracing setup for binaries and tests embedding the pool

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Directives applied on top of the caller's default when RUST_LOG is unset
const CRATE_DIRECTIVES: &[&str] = &["mcpshare_core=debug", "mcpshare_pool=debug", "rmcp=warn"];

fn env_filter(default_directive: &str) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let mut filter = EnvFilter::try_new(default_directive)
        .with_context(|| format!("Invalid log directive: {}", default_directive))?;
    for directive in CRATE_DIRECTIVES {
        filter = filter.add_directive(directive.parse()?);
    }
    Ok(filter)
}

/// Install a console subscriber. RUST_LOG takes precedence over `default_directive`.
///
/// Fails instead of panicking when a global subscriber is already set.
pub fn init(default_directive: &str) -> Result<()> {
    let console_layer = fmt::layer()
        .with_ansi(true)
        .compact()
        .with_thread_names(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true);

    tracing_subscriber::registry()
        .with(env_filter(default_directive)?)
        .with(console_layer)
        .try_init()
        .context("Failed to install tracing subscriber")
}

/// Route logs through the test harness's captured output. Safe to call from every test.
pub fn try_init_for_tests() {
    let filter = env_filter("warn").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_test_writer().compact())
        .try_init();
}
