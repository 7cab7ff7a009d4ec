//! Structured logging setup.
//!
//! Console-only `tracing` subscriber with environment-driven filtering.
//! The engine itself only emits `tracing` events; calling this is optional
//! and embedders with their own subscriber should skip it.

use std::sync::OnceLock;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize the console tracing subscriber.
///
/// Honors `RUST_LOG`; defaults to `info` for the crate when unset. Safe to
/// call more than once — only the first call installs a subscriber, and an
/// externally installed subscriber wins silently.
pub fn init_tracing() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("loadscript=info"));

        let _ = tracing_subscriber::registry()
            .with(fmt::layer().with_target(true).with_level(true))
            .with(filter)
            .try_init();
    });
}
