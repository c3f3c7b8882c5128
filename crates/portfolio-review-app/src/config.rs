//! Layered settings: built-in defaults, optional TOML file, then
//! `PORTFOLIO_REVIEW_*` environment variables.

use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ::config::{Config, Environment, File, Map};
use portfolio_review_analysis_contract::{API_VERSION, DEFAULT_MAX_TOKENS, DEFAULT_MODEL};
use portfolio_review_gateway::{ApiKey, ApiSettings, DEFAULT_REQUEST_TIMEOUT};
use portfolio_review_store::{DEFAULT_SCOPE, ScopeId};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serde::Deserialize;

use crate::{AppError, is_https_endpoint};

/// Prefix of environment overrides, e.g. `PORTFOLIO_REVIEW_API_KEY`.
pub const ENV_PREFIX: &str = "PORTFOLIO_REVIEW";

/// Config file looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "portfolio-review.toml";

/// Default analysis endpoint.
pub const DEFAULT_API_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";

const GENERATED_SECRET_BYTES: usize = 32;

/// Runtime settings for both `serve` and the client commands.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Listen address for `serve`.
    pub bind_addr: String,
    /// Server base URL used by `submit`.
    pub server_url: String,
    /// External API credential.
    pub api_key: Option<String>,
    /// External API endpoint.
    pub api_endpoint: String,
    /// Permit a non-HTTPS endpoint (local testing only).
    pub allow_insecure_endpoint: bool,
    /// `anthropic-version` header value.
    pub api_version: String,
    /// Model identifier.
    pub model: String,
    /// Response token cap.
    pub max_tokens: u32,
    /// Per-request timeout for the external API.
    pub request_timeout_secs: u64,
    /// Security token signing secret; random per process when unset.
    pub token_secret: Option<String>,
    /// Security token lifetime.
    pub token_lifetime_secs: u64,
    /// JSON result store path; in-memory when unset.
    pub store_path: Option<PathBuf>,
    /// Scope used when a request names none.
    pub store_scope: String,
    /// Write every successful analysis to the store.
    pub persist_results: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            server_url: "http://127.0.0.1:8080/".to_string(),
            api_key: None,
            api_endpoint: DEFAULT_API_ENDPOINT.to_string(),
            allow_insecure_endpoint: false,
            api_version: API_VERSION.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT.as_secs(),
            token_secret: None,
            token_lifetime_secs: 86_400,
            store_path: None,
            store_scope: DEFAULT_SCOPE.to_string(),
            persist_results: true,
        }
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("bind_addr", &self.bind_addr)
            .field("server_url", &self.server_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_endpoint", &self.api_endpoint)
            .field("allow_insecure_endpoint", &self.allow_insecure_endpoint)
            .field("api_version", &self.api_version)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("token_secret", &self.token_secret.as_ref().map(|_| "<redacted>"))
            .field("token_lifetime_secs", &self.token_lifetime_secs)
            .field("store_path", &self.store_path)
            .field("store_scope", &self.store_scope)
            .field("persist_results", &self.persist_results)
            .finish()
    }
}

impl Settings {
    /// Loads settings from `path` (required) or the default file (optional),
    /// then applies process environment overrides.
    ///
    /// # Errors
    /// Returns [`AppError::Config`] for unreadable sources and
    /// [`AppError::InvalidSetting`] when validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        Self::load_with_env(path, None)
    }

    /// Like [`Settings::load`], reading overrides from `env` instead of the
    /// process environment when given.
    ///
    /// # Errors
    /// Same as [`Settings::load`].
    pub fn load_with_env(
        path: Option<&Path>,
        env: Option<Map<String, String>>,
    ) -> Result<Self, AppError> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::from(Path::new(DEFAULT_CONFIG_FILE)).required(false),
        };

        let settings: Self = Config::builder()
            .add_source(file)
            .add_source(Environment::with_prefix(ENV_PREFIX).source(env))
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Checks value ranges and the endpoint scheme.
    ///
    /// # Errors
    /// Returns [`AppError::InvalidSetting`] naming the first bad key.
    pub fn validate(&self) -> Result<(), AppError> {
        if !self.allow_insecure_endpoint && !is_https_endpoint(&self.api_endpoint) {
            return Err(invalid(
                "api_endpoint",
                "must be an https URL unless allow_insecure_endpoint is set",
            ));
        }
        if self.max_tokens == 0 {
            return Err(invalid("max_tokens", "must be positive"));
        }
        if self.request_timeout_secs == 0 {
            return Err(invalid("request_timeout_secs", "must be positive"));
        }
        if self.token_lifetime_secs < 2 {
            return Err(invalid("token_lifetime_secs", "must be at least 2"));
        }
        self.default_scope()?;
        Ok(())
    }

    /// Parsed listen address.
    ///
    /// # Errors
    /// Returns [`AppError::InvalidSetting`] when `bind_addr` is not `ip:port`.
    pub fn bind_socket_addr(&self) -> Result<SocketAddr, AppError> {
        self.bind_addr
            .parse()
            .map_err(|error| invalid("bind_addr", format!("{error}")))
    }

    /// Scope used when requests do not name one.
    ///
    /// # Errors
    /// Returns [`AppError::InvalidSetting`] for a blank scope.
    pub fn default_scope(&self) -> Result<ScopeId, AppError> {
        ScopeId::new(self.store_scope.as_str()).map_err(|error| invalid("store_scope", error.to_string()))
    }

    /// External API timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Token lifetime in milliseconds.
    pub fn token_lifetime_ms(&self) -> u64 {
        self.token_lifetime_secs.saturating_mul(1_000)
    }

    /// Configured credential, if any.
    pub fn api_key(&self) -> Option<ApiKey> {
        ApiKey::from_optional(self.api_key.as_deref())
    }

    /// Request shaping for the gateway.
    pub fn api_settings(&self) -> ApiSettings {
        ApiSettings {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
        }
    }

    /// Token signing secret: the configured one, or fresh OS randomness.
    pub fn token_secret_bytes(&self) -> Vec<u8> {
        match self.token_secret.as_deref().map(str::trim) {
            Some(secret) if !secret.is_empty() => secret.as_bytes().to_vec(),
            _ => {
                let mut secret = vec![0_u8; GENERATED_SECRET_BYTES];
                StdRng::from_os_rng().fill_bytes(&mut secret);
                secret
            }
        }
    }
}

fn invalid(key: &'static str, reason: impl Into<String>) -> AppError {
    AppError::InvalidSetting {
        key,
        reason: reason.into(),
    }
}
