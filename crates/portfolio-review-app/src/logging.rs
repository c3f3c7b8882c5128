//! Tracing subscriber setup.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::AppError;

/// Directives used when `RUST_LOG` is unset or unparsable.
pub const DEFAULT_FILTER_DIRECTIVES: [&str; 4] = ["info", "hyper=warn", "reqwest=warn", "warp=info"];

/// Builds the level filter from `RUST_LOG`, falling back to
/// [`DEFAULT_FILTER_DIRECTIVES`].
pub fn build_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER_DIRECTIVES.join(",")))
}

/// Installs the global subscriber. Call once, before any other work.
///
/// # Errors
/// Returns [`AppError::Logging`] when a subscriber is already installed.
pub fn init_tracing() -> Result<(), AppError> {
    tracing_subscriber::registry()
        .with(build_env_filter())
        .with(fmt::layer().with_target(true))
        .try_init()
        .map_err(|error| AppError::Logging(error.to_string()))
}
