#![warn(missing_docs)]
//! # portfolio-review-app
//!
//! ## Purpose
//! Wires configuration, logging, the HTTP server, and the headless upload
//! client for `portfolio-review`.
//!
//! ## Responsibilities
//! - Load [`config::Settings`] from file and environment and reject unsafe
//!   endpoint settings.
//! - Serve the AJAX, session bootstrap, and feedback routes ([`server`]).
//! - Drive one upload through the session state machine against a running
//!   server ([`client`]).
//! - Provide log redaction and version helpers.
//!
//! ## Data flow
//! Settings -> [`server::AppState`] (gateway + tokens + store) -> warp routes.
//! File on disk -> [`client::SessionDriver`] -> [`client::AnalysisTransport`]
//! -> server -> feedback HTML -> presenter actions.
//!
//! ## Ownership and lifetimes
//! Server state is shared behind one `Arc`; each request owns its form data.
//! The client driver owns its session and borrows the transport via `Arc`.
//!
//! ## Error model
//! Setup failures are [`AppError`] values; request-level failures are folded
//! into the `{success, data}` envelope and never reach this type.
//!
//! ## Security and privacy notes
//! - The analysis endpoint must be HTTPS unless explicitly overridden.
//! - [`redact_sensitive`] scrubs credential markers before error text is
//!   logged.

pub mod client;
pub mod config;
pub mod logging;
pub mod server;

use std::time::{SystemTime, UNIX_EPOCH};

use portfolio_review_auth::AuthError;
use portfolio_review_gateway::GatewayError;
use portfolio_review_store::StoreError;
use thiserror::Error;
use url::Url;

/// Build-time application version loaded from root `VERSION` file.
pub const APP_VERSION: &str = env!("PORTFOLIO_REVIEW_VERSION");

const SENSITIVE_MARKERS: [&str; 8] = [
    "x-api-key",
    "api_key",
    "api-key",
    "security_token",
    "token",
    "authorization",
    "bearer",
    "password",
];

/// Returns the app version sourced from root `VERSION`.
pub fn app_version() -> &'static str {
    APP_VERSION
}

/// Returns `true` when endpoint URL is HTTPS.
pub fn is_https_endpoint(endpoint: &str) -> bool {
    Url::parse(endpoint)
        .map(|url| url.scheme() == "https")
        .unwrap_or(false)
}

/// Cuts log text at the first credential marker.
///
/// Everything from the earliest marker on is replaced by `marker=<redacted>`.
pub fn redact_sensitive(input: &str) -> String {
    let lower = input.to_ascii_lowercase();
    let earliest = SENSITIVE_MARKERS
        .iter()
        .filter_map(|marker| lower.find(marker).map(|position| (position, *marker)))
        .min_by_key(|(position, _)| *position);

    match earliest {
        Some((position, marker)) => format!("{}{marker}=<redacted>", &input[..position]),
        None => input.to_string(),
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

/// App integration error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Settings could not be read or deserialized.
    #[error("configuration error: {0}")]
    Config(#[from] ::config::ConfigError),
    /// A setting holds an unusable value.
    #[error("invalid setting `{key}`: {reason}")]
    InvalidSetting {
        /// Setting name.
        key: &'static str,
        /// What is wrong with it.
        reason: String,
    },
    /// Token authority could not be built.
    #[error("auth error: {0}")]
    Auth(#[from] AuthError),
    /// Gateway or transport setup failed.
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),
    /// Result store failure outside a request.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    /// Tracing subscriber could not be installed.
    #[error("logging setup failed: {0}")]
    Logging(String),
    /// Listener could not be bound.
    #[error("failed to bind {addr}: {reason}")]
    Bind {
        /// Requested address.
        addr: String,
        /// Bind failure.
        reason: String,
    },
}
