//! Logging setup.
//!
//! Thin wrapper over `tracing-subscriber` with environment-based filtering
//! via `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize logging with default settings (`info` unless `RUST_LOG`
/// overrides it).
///
/// # Panics
///
/// Panics if a subscriber has already been set.
pub fn init() {
    init_with_filter("info");
}

/// Initialize logging with a custom filter string, e.g.
/// `"extdev_controller=debug,extdev_bus=trace"`.
///
/// # Panics
///
/// Panics if a subscriber has already been set.
pub fn init_with_filter(filter: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(env_filter)
        .init();
}

/// Try to initialize logging, returning an error instead of panicking.
pub fn try_init() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    try_init_with_filter("info")
}

/// Try to initialize logging with a custom filter.
pub fn try_init_with_filter(filter: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(env_filter)
        .try_init()
        .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)
}
