#![warn(missing_docs)]
//! # portfolio-review-gateway
//!
//! ## Purpose
//! Server-side proxy between uploaded portfolio files and the external
//! multimodal analysis API.
//!
//! ## Responsibilities
//! - Check the security token before any privileged work.
//! - Re-validate presence, size, and type of the uploaded document.
//! - Require a configured service credential.
//! - Build the document/image request, call the API once, and relay the
//!   feedback text or a structured error.
//! - Persist successful feedback into an attached result store after
//!   allow-list sanitization.
//!
//! ## Data flow
//! [`AnalyzeRequest`] -> token check -> document checks -> credential check ->
//! [`build_feedback_request`] -> [`AnalysisApi::send`] ->
//! [`MessagesResponse::feedback_text`] -> optional [`ResultStore`] write ->
//! [`AnalysisResponse`].
//!
//! ## Ownership and lifetimes
//! Requests own the uploaded bytes; the gateway shares its collaborators via
//! `Arc` so one instance serves every connection.
//!
//! ## Error model
//! Every failure path is a [`GatewayError`] whose `Display` text is the
//! user-facing message and whose [`GatewayError::kind`] gives the category.
//! Nothing is retried.
//!
//! ## Security and privacy notes
//! The credential is wrapped in [`ApiKey`], which never prints its value.
//! File bytes are not logged. Any client may obtain a token, so HTML bound for
//! the store passes through [`sanitize_feedback`] first; the feedback view
//! sanitizes again on display.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use portfolio_review_analysis_contract::{
    ContractError, DEFAULT_MAX_TOKENS, DEFAULT_MODEL, MessagesRequest, MessagesResponse,
    build_credential_check_request, build_feedback_request, parse_messages_response,
};
use portfolio_review_auth::{AuthError, TokenVerifier, UPLOAD_ACTION};
use portfolio_review_core::{AnalysisResponse, ErrorKind, MAX_UPLOAD_BYTES, MediaType};
use portfolio_review_store::{ResultStore, ScopeId, StoreError};
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

/// Upper bound for one external API call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Strips scripts, event handlers, and unsafe URLs from feedback HTML while
/// keeping ordinary formatting tags.
pub fn sanitize_feedback(html: &str) -> String {
    ammonia::clean(html)
}

/// Service credential for the external API.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    /// Wraps a non-blank key; blank or absent input yields `None`.
    pub fn from_optional(raw: Option<&str>) -> Option<Self> {
        raw.map(str::trim)
            .filter(|key| !key.is_empty())
            .map(|key| Self(key.to_string()))
    }

    /// Key text, for the transport header only.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(<redacted>)")
    }
}

/// Request shaping knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiSettings {
    /// Model identifier.
    pub model: String,
    /// Response token cap.
    pub max_tokens: u32,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

/// Transport to the external analysis API.
#[async_trait]
pub trait AnalysisApi: Send + Sync {
    /// Sends one request and returns the parsed body.
    ///
    /// # Errors
    /// Returns [`ApiError::Transport`] when the call does not complete and
    /// [`ApiError::Decode`] when the body is not a messages response.
    async fn send(
        &self,
        api_key: &ApiKey,
        request: &MessagesRequest,
    ) -> Result<MessagesResponse, ApiError>;
}

/// Transport-level failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// Network failure or timeout.
    #[error("{0}")]
    Transport(String),
    /// Body could not be decoded.
    #[error("unreadable response (status {status}): {reason}")]
    Decode {
        /// HTTP status code.
        status: u16,
        /// Decoder message.
        reason: String,
    },
}

/// `reqwest`-backed transport.
#[derive(Debug, Clone)]
pub struct HttpAnalysisApi {
    client: reqwest::Client,
    endpoint: Url,
    api_version: String,
}

impl HttpAnalysisApi {
    /// Creates a transport posting to `endpoint` with a per-request timeout.
    ///
    /// # Errors
    /// Returns [`GatewayError::InvalidEndpoint`] for unparsable or non-HTTP(S)
    /// URLs and [`GatewayError::Client`] when the HTTP client cannot be built.
    pub fn new(
        endpoint: &str,
        api_version: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|error| GatewayError::InvalidEndpoint(format!("invalid api url: {error}")))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(GatewayError::InvalidEndpoint(format!(
                "unsupported scheme: {}",
                endpoint.scheme()
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| GatewayError::Client(error.to_string()))?;

        Ok(Self {
            client,
            endpoint,
            api_version: api_version.into(),
        })
    }

    /// Configured endpoint.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl AnalysisApi for HttpAnalysisApi {
    async fn send(
        &self,
        api_key: &ApiKey,
        request: &MessagesRequest,
    ) -> Result<MessagesResponse, ApiError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .header("x-api-key", api_key.expose())
            .header("anthropic-version", &self.api_version)
            .json(request)
            .send()
            .await
            .map_err(|error| ApiError::Transport(error.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|error| ApiError::Transport(error.to_string()))?;

        parse_messages_response(&body).map_err(|error| ApiError::Decode {
            status,
            reason: error.to_string(),
        })
    }
}

/// One uploaded file as received by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentUpload {
    /// Client-supplied file name.
    pub file_name: Option<String>,
    /// Part content type.
    pub content_type: Option<String>,
    /// File contents.
    pub bytes: Vec<u8>,
}

impl DocumentUpload {
    /// Resolves the media type from the file extension, falling back to the
    /// part's content type.
    pub fn media_type(&self) -> Option<MediaType> {
        self.file_name
            .as_deref()
            .and_then(MediaType::from_file_name)
            .or_else(|| {
                self.content_type
                    .as_deref()
                    .and_then(MediaType::from_declared)
            })
    }
}

/// Inputs of one `analyze_document` call.
#[derive(Debug, Clone, Default)]
pub struct AnalyzeRequest {
    /// Uploaded file, if any.
    pub document: Option<DocumentUpload>,
    /// Token echoed by the client.
    pub security_token: Option<String>,
    /// Result-store scope.
    pub scope: ScopeId,
}

/// Analysis gateway.
#[derive(Clone)]
pub struct AnalysisGateway {
    api: Arc<dyn AnalysisApi>,
    tokens: Arc<dyn TokenVerifier>,
    api_key: Option<ApiKey>,
    settings: ApiSettings,
    store: Option<Arc<dyn ResultStore>>,
    persist_on_success: bool,
}

impl AnalysisGateway {
    /// Creates a gateway without a result store.
    pub fn new(
        api: Arc<dyn AnalysisApi>,
        tokens: Arc<dyn TokenVerifier>,
        api_key: Option<ApiKey>,
        settings: ApiSettings,
    ) -> Self {
        Self {
            api,
            tokens,
            api_key,
            settings,
            store: None,
            persist_on_success: true,
        }
    }

    /// Attaches a store that receives `store_analysis` posts and, unless
    /// disabled, every successful analysis.
    pub fn with_store(mut self, store: Arc<dyn ResultStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Turns the write-on-success behaviour on or off. With it off, only
    /// `store_analysis` posts reach the store.
    pub fn persist_on_success(mut self, enabled: bool) -> Self {
        self.persist_on_success = enabled;
        self
    }

    /// Returns `true` when a credential is configured.
    pub fn has_credential(&self) -> bool {
        self.api_key.is_some()
    }

    /// Runs the analysis and folds errors into [`AnalysisResponse::Failure`].
    pub async fn analyze(&self, request: AnalyzeRequest, now_ms: u64) -> AnalysisResponse {
        match self.try_analyze(request, now_ms).await {
            Ok(html) => AnalysisResponse::Success(html),
            Err(error) => {
                warn!(kind = ?error.kind(), error = %error, "analysis failed");
                AnalysisResponse::Failure(error.to_string())
            }
        }
    }

    /// Runs the analysis.
    ///
    /// # Errors
    /// Returns the first failing check as a [`GatewayError`]; the external API
    /// is only called once every check passes.
    pub async fn try_analyze(
        &self,
        request: AnalyzeRequest,
        now_ms: u64,
    ) -> Result<String, GatewayError> {
        self.check_token(request.security_token.as_deref(), now_ms)?;

        let document = request.document.ok_or(GatewayError::MissingDocument)?;
        let size_bytes = document.bytes.len() as u64;
        if size_bytes > MAX_UPLOAD_BYTES {
            return Err(GatewayError::TooLarge { size_bytes });
        }
        let media = document.media_type().ok_or(GatewayError::UnsupportedType)?;
        let api_key = self.api_key.as_ref().ok_or(GatewayError::MissingCredential)?;

        info!(
            media_type = media.as_mime(),
            size_bytes,
            scope = %request.scope,
            "forwarding document for analysis"
        );

        let api_request = build_feedback_request(
            &self.settings.model,
            self.settings.max_tokens,
            media,
            &document.bytes,
        );
        let html = self.call(api_key, &api_request).await?;

        if let Some(store) = self.store.as_ref().filter(|_| self.persist_on_success) {
            let store = Arc::clone(store);
            let scope = request.scope.clone();
            let clean = sanitize_feedback(&html);
            let written =
                tokio::task::spawn_blocking(move || store.store_latest(&scope, &clean, now_ms))
                    .await;
            match written {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    warn!(error = %error, scope = %request.scope, "failed to persist analysis");
                }
                Err(error) => {
                    warn!(error = %error, scope = %request.scope, "persist task did not finish");
                }
            }
        }

        Ok(html)
    }

    /// Handles a `store_analysis` post. The HTML is sanitized before it is
    /// written. Performs blocking store I/O.
    ///
    /// # Errors
    /// Returns [`GatewayError::Security`] for a bad token,
    /// [`GatewayError::MissingAnalysis`] when no HTML was sent,
    /// [`GatewayError::StoreUnavailable`] without a store, and
    /// [`GatewayError::Store`] when the write fails.
    pub fn store_analysis(
        &self,
        analysis: Option<&str>,
        security_token: Option<&str>,
        scope: &ScopeId,
        now_ms: u64,
    ) -> Result<(), GatewayError> {
        self.check_token(security_token, now_ms)?;
        let html = analysis.ok_or(GatewayError::MissingAnalysis)?;
        let store = self.store.as_ref().ok_or(GatewayError::StoreUnavailable)?;
        store.store_latest(scope, &sanitize_feedback(html), now_ms)?;
        Ok(())
    }

    /// Sends a minimal request to check the configured credential.
    ///
    /// # Errors
    /// Returns [`GatewayError::MissingCredential`] without a key, otherwise
    /// the transport or upstream error of the check call.
    pub async fn verify_credential(&self) -> Result<(), GatewayError> {
        let api_key = self.api_key.as_ref().ok_or(GatewayError::MissingCredential)?;
        let request = build_credential_check_request(&self.settings.model);
        let response = self
            .api
            .send(api_key, &request)
            .await
            .map_err(GatewayError::from)?;

        match response.error {
            Some(error) => Err(GatewayError::Upstream(error.message)),
            None => Ok(()),
        }
    }

    fn check_token(&self, token: Option<&str>, now_ms: u64) -> Result<(), GatewayError> {
        self.tokens
            .verify(UPLOAD_ACTION, token.unwrap_or_default(), now_ms)
            .map_err(GatewayError::Security)
    }

    async fn call(
        &self,
        api_key: &ApiKey,
        request: &MessagesRequest,
    ) -> Result<String, GatewayError> {
        let response = self.api.send(api_key, request).await?;
        response.feedback_text().map_err(|error| match error {
            ContractError::Upstream(message) => GatewayError::Upstream(message),
            other => GatewayError::Upstream(other.to_string()),
        })
    }
}

impl fmt::Debug for AnalysisGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisGateway")
            .field("api_key", &self.api_key)
            .field("settings", &self.settings)
            .field("store", &self.store.is_some())
            .field("persist_on_success", &self.persist_on_success)
            .finish()
    }
}

/// Gateway failures. `Display` is the message relayed to the browser.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Token missing or invalid.
    #[error("Security check failed")]
    Security(AuthError),
    /// No file part in the request.
    #[error("No document uploaded")]
    MissingDocument,
    /// File larger than the upload limit.
    #[error("File size must be under 10MB")]
    TooLarge {
        /// Offending size.
        size_bytes: u64,
    },
    /// File type outside the allow-list.
    #[error("Invalid file type. Please upload an image (JPEG/PNG) or PDF.")]
    UnsupportedType,
    /// No service credential configured.
    #[error("API key not configured")]
    MissingCredential,
    /// External API unreachable.
    #[error("Error connecting to analysis API: {0}")]
    Transport(String),
    /// External API returned an error or an unusable body.
    #[error("API Error: {0}")]
    Upstream(String),
    /// `store_analysis` without HTML.
    #[error("No analysis data received")]
    MissingAnalysis,
    /// `store_analysis` on a gateway without a store.
    #[error("Result store is not configured")]
    StoreUnavailable,
    /// Store write failed.
    #[error("Unable to store analysis: {0}")]
    Store(#[from] StoreError),
    /// Endpoint configuration rejected.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
    /// HTTP client construction failed.
    #[error("http client setup failed: {0}")]
    Client(String),
}

impl GatewayError {
    /// Error category.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Security(_) => ErrorKind::Security,
            Self::MissingDocument
            | Self::TooLarge { .. }
            | Self::UnsupportedType
            | Self::MissingAnalysis => ErrorKind::Validation,
            Self::MissingCredential
            | Self::StoreUnavailable
            | Self::InvalidEndpoint(_)
            | Self::Client(_) => ErrorKind::Configuration,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Upstream(_) | Self::Store(_) => ErrorKind::Upstream,
        }
    }
}

impl From<ApiError> for GatewayError {
    fn from(error: ApiError) -> Self {
        match error {
            ApiError::Transport(message) => Self::Transport(message),
            decode @ ApiError::Decode { .. } => Self::Upstream(decode.to_string()),
        }
    }
}
