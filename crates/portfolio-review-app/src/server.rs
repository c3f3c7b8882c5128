//! HTTP surface: the AJAX action endpoint, session bootstrap, and the
//! read-only feedback view.
//!
//! Store I/O runs on the blocking pool. Stored HTML is sanitized again before
//! the feedback view renders it.

use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;

use bytes::BufMut;
use futures_util::TryStreamExt;
use portfolio_review_analysis_contract::{
    ACTION_ANALYZE, ACTION_STORE, AjaxResponse, FIELD_ACTION, FIELD_ANALYSIS, FIELD_DOCUMENT,
    FIELD_SCOPE, FIELD_SECURITY_TOKEN, SessionBootstrap,
};
use portfolio_review_auth::{TokenAuthority, UPLOAD_ACTION};
use portfolio_review_gateway::{
    AnalysisGateway, AnalyzeRequest, DocumentUpload, HttpAnalysisApi, sanitize_feedback,
};
use portfolio_review_store::{JsonFileResultStore, MemoryResultStore, ResultStore, ScopeId};
use tracing::{debug, info, warn};
use warp::http::StatusCode;
use warp::multipart::{FormData, Part};
use warp::{Filter, Rejection, Reply};

use crate::config::Settings;
use crate::{AppError, now_ms, redact_sensitive};

/// Path segment of the action endpoint.
pub const AJAX_PATH: &str = "ajax";

/// Upper bound on a posted form body. Kept above the upload limit so
/// oversized files still get the structured size error.
pub const MAX_FORM_BYTES: u64 = 64 * 1024 * 1024;

/// Reply to an unrecognised `action`.
pub const UNKNOWN_ACTION: &str = "Unknown action";

/// Feedback view text before the first successful analysis.
pub const NO_ANALYSIS_MESSAGE: &str = "No analysis available yet. Please upload a document first.";

const MALFORMED_REQUEST: &str = "Malformed request";

const LENGTH_REQUIRED: &str = "Content-Length header is required";

const FEEDBACK_UNAVAILABLE: &str = "Unable to load feedback.";

/// Shared state behind every route.
pub struct AppState {
    gateway: AnalysisGateway,
    tokens: Arc<TokenAuthority>,
    store: Arc<dyn ResultStore>,
    default_scope: ScopeId,
}

impl AppState {
    /// Assembles state from ready-made parts.
    pub fn new(
        gateway: AnalysisGateway,
        tokens: Arc<TokenAuthority>,
        store: Arc<dyn ResultStore>,
        default_scope: ScopeId,
    ) -> Self {
        Self {
            gateway,
            tokens,
            store,
            default_scope,
        }
    }

    /// Builds the HTTP transport, token authority, store, and gateway.
    ///
    /// # Errors
    /// Returns [`AppError`] when any collaborator rejects its settings.
    pub fn from_settings(settings: &Settings) -> Result<Self, AppError> {
        let api = HttpAnalysisApi::new(
            &settings.api_endpoint,
            settings.api_version.clone(),
            settings.request_timeout(),
        )?;
        let tokens = Arc::new(TokenAuthority::new(
            settings.token_secret_bytes(),
            settings.token_lifetime_ms(),
        )?);
        let store: Arc<dyn ResultStore> = match &settings.store_path {
            Some(path) => {
                let store = JsonFileResultStore::new(path.clone());
                info!(path = %store.path().display(), "using file result store");
                Arc::new(store)
            }
            None => {
                info!("using in-memory result store");
                Arc::new(MemoryResultStore::new())
            }
        };
        info!(endpoint = %api.endpoint(), "analysis api configured");

        let gateway = AnalysisGateway::new(
            Arc::new(api),
            tokens.clone(),
            settings.api_key(),
            settings.api_settings(),
        )
        .with_store(store.clone())
        .persist_on_success(settings.persist_results);

        if !gateway.has_credential() {
            warn!("no API key configured; analyses will fail until one is set");
        }

        Ok(Self::new(gateway, tokens, store, settings.default_scope()?))
    }

    /// Gateway serving `analyze_document` and `store_analysis`.
    pub fn gateway(&self) -> &AnalysisGateway {
        &self.gateway
    }

    fn scope(&self, requested: Option<&str>) -> ScopeId {
        requested
            .and_then(|scope| ScopeId::new(scope).ok())
            .unwrap_or_else(|| self.default_scope.clone())
    }
}

/// Fields of one `POST /ajax`, from either multipart or urlencoded bodies.
#[derive(Debug, Clone, Default)]
pub struct AjaxForm {
    /// Requested action.
    pub action: Option<String>,
    /// Echoed security token.
    pub security_token: Option<String>,
    /// Feedback HTML for `store_analysis`.
    pub analysis: Option<String>,
    /// Result-store scope.
    pub scope: Option<String>,
    /// Uploaded file for `analyze_document`.
    pub document: Option<DocumentUpload>,
}

impl AjaxForm {
    fn from_fields(fields: HashMap<String, String>) -> Self {
        let mut form = Self::default();
        for (name, value) in fields {
            form.set_field(&name, value);
        }
        form
    }

    fn set_field(&mut self, name: &str, value: String) {
        let slot = match name {
            FIELD_ACTION => &mut self.action,
            FIELD_SECURITY_TOKEN => &mut self.security_token,
            FIELD_ANALYSIS => &mut self.analysis,
            FIELD_SCOPE => &mut self.scope,
            _ => return,
        };
        *slot = Some(value);
    }
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("gateway", &self.gateway)
            .field("default_scope", &self.default_scope)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct MalformedForm;

impl warp::reject::Reject for MalformedForm {}

/// All routes, with rejections rendered as JSON envelopes.
pub fn routes(
    state: Arc<AppState>,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let ajax = warp::path(AJAX_PATH)
        .and(warp::path::end())
        .and(warp::post())
        .and(ajax_form())
        .and(with_state(state.clone()))
        .and_then(handle_ajax);

    let session = warp::path("session")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(handle_session);

    let feedback = warp::path("feedback")
        .and(warp::path::end())
        .and(warp::get())
        .and(warp::query::<HashMap<String, String>>())
        .and(with_state(state))
        .and_then(handle_feedback);

    ajax.or(session)
        .or(feedback)
        .recover(handle_rejection)
        .with(warp::trace::request())
}

/// Binds `settings.bind_addr` and serves until Ctrl-C.
///
/// # Errors
/// Returns [`AppError`] when state cannot be built or the address is taken.
pub async fn serve(settings: &Settings) -> Result<(), AppError> {
    let addr = settings.bind_socket_addr()?;
    let state = Arc::new(AppState::from_settings(settings)?);

    let (bound, server) = warp::serve(routes(state))
        .try_bind_with_graceful_shutdown(addr, async {
            if let Err(error) = tokio::signal::ctrl_c().await {
                warn!(error = %error, "ctrl-c listener failed; shutting down");
            }
        })
        .map_err(|error| AppError::Bind {
            addr: addr.to_string(),
            reason: error.to_string(),
        })?;

    info!(addr = %bound, "portfolio review server listening");
    server.await;
    info!("server stopped");
    Ok(())
}

fn with_state(
    state: Arc<AppState>,
) -> impl Filter<Extract = (Arc<AppState>,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

fn ajax_form() -> impl Filter<Extract = (AjaxForm,), Error = Rejection> + Clone {
    let multipart = warp::multipart::form()
        .max_length(MAX_FORM_BYTES)
        .and_then(read_multipart);
    let urlencoded = warp::body::content_length_limit(MAX_FORM_BYTES)
        .and(warp::body::form::<HashMap<String, String>>())
        .map(AjaxForm::from_fields);

    multipart.or(urlencoded).unify()
}

async fn read_multipart(form: FormData) -> Result<AjaxForm, Rejection> {
    let parts: Vec<Part> = form.try_collect().await.map_err(malformed)?;

    let mut ajax = AjaxForm::default();
    for part in parts {
        let name = part.name().to_string();
        let file_name = part.filename().map(str::to_string);
        let content_type = part.content_type().map(str::to_string);
        let bytes = read_part(part).await.map_err(malformed)?;

        if name == FIELD_DOCUMENT {
            // An empty file input still posts a nameless, empty part.
            let picked = file_name.as_deref().is_some_and(|name| !name.is_empty());
            if picked || !bytes.is_empty() {
                ajax.document = Some(DocumentUpload {
                    file_name,
                    content_type,
                    bytes,
                });
            }
        } else {
            ajax.set_field(&name, String::from_utf8_lossy(&bytes).into_owned());
        }
    }

    Ok(ajax)
}

async fn read_part(part: Part) -> Result<Vec<u8>, warp::Error> {
    part.stream()
        .try_fold(Vec::new(), |mut bytes, chunk| async move {
            bytes.put(chunk);
            Ok(bytes)
        })
        .await
}

fn malformed(error: warp::Error) -> Rejection {
    debug!(error = %error, "unreadable multipart body");
    warp::reject::custom(MalformedForm)
}

async fn handle_ajax(form: AjaxForm, state: Arc<AppState>) -> Result<warp::reply::Json, Rejection> {
    let now = now_ms();
    let scope = state.scope(form.scope.as_deref());

    let reply = match form.action.as_deref() {
        Some(ACTION_ANALYZE) => {
            let request = AnalyzeRequest {
                document: form.document,
                security_token: form.security_token,
                scope,
            };
            AjaxResponse::from(state.gateway.analyze(request, now).await)
        }
        Some(ACTION_STORE) => {
            let gateway = state.gateway.clone();
            let analysis = form.analysis;
            let security_token = form.security_token;
            let stored = tokio::task::spawn_blocking(move || {
                gateway.store_analysis(analysis.as_deref(), security_token.as_deref(), &scope, now)
            })
            .await;
            match stored {
                Ok(Ok(())) => AjaxResponse::acknowledged(),
                Ok(Err(error)) => {
                    debug!(error = %redact_sensitive(&error.to_string()), "store_analysis rejected");
                    AjaxResponse::failure(error.to_string())
                }
                Err(error) => {
                    warn!(error = %error, "store task did not finish");
                    AjaxResponse::failure("Unable to store analysis")
                }
            }
        }
        other => {
            debug!(action = ?other, "unknown ajax action");
            AjaxResponse::failure(UNKNOWN_ACTION)
        }
    };

    Ok(warp::reply::json(&reply))
}

async fn handle_session(state: Arc<AppState>) -> Result<warp::reply::Response, Rejection> {
    let response = match state.tokens.issue(UPLOAD_ACTION, now_ms()) {
        Ok(token) => warp::reply::json(&SessionBootstrap {
            ajax_url: format!("/{AJAX_PATH}"),
            security_token: token.into_string(),
        })
        .into_response(),
        Err(error) => {
            warn!(error = %error, "failed to issue security token");
            warp::reply::with_status(
                warp::reply::json(&AjaxResponse::failure("Unable to start a session")),
                StatusCode::INTERNAL_SERVER_ERROR,
            )
            .into_response()
        }
    };
    Ok(response)
}

async fn handle_feedback(
    query: HashMap<String, String>,
    state: Arc<AppState>,
) -> Result<warp::reply::Response, Rejection> {
    let scope = state.scope(query.get(FIELD_SCOPE).map(String::as_str));

    let store = state.store.clone();
    let lookup = scope.clone();
    let latest = tokio::task::spawn_blocking(move || store.read_latest(&lookup))
        .await
        .map_err(|error| error.to_string())
        .and_then(|read| read.map_err(|error| error.to_string()));

    let response = match latest {
        Ok(Some(record)) if !record.html.is_empty() => {
            warp::reply::html(feedback_page(&sanitize_feedback(&record.html))).into_response()
        }
        Ok(_) => warp::reply::html(format!(
            r#"<div class="portfolio-feedback">{NO_ANALYSIS_MESSAGE}</div>"#
        ))
        .into_response(),
        Err(error) => {
            warn!(error = %error, scope = %scope, "failed to read latest analysis");
            warp::reply::with_status(
                warp::reply::html(format!(
                    r#"<div class="portfolio-feedback">{FEEDBACK_UNAVAILABLE}</div>"#
                )),
                StatusCode::INTERNAL_SERVER_ERROR,
            )
            .into_response()
        }
    };
    Ok(response)
}

fn feedback_page(html: &str) -> String {
    format!(
        concat!(
            r#"<div class="portfolio-feedback">"#,
            "<h3>Portfolio Analysis Feedback</h3>",
            r#"<div class="feedback-content">{}</div>"#,
            "</div>"
        ),
        html
    )
}

async fn handle_rejection(rejection: Rejection) -> Result<warp::reply::Response, Infallible> {
    let (status, message) = if rejection.is_not_found() {
        (StatusCode::NOT_FOUND, "Not found")
    } else if rejection.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "File size must be under 10MB")
    } else if rejection.find::<warp::reject::LengthRequired>().is_some() {
        (StatusCode::LENGTH_REQUIRED, LENGTH_REQUIRED)
    } else if rejection.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
    } else {
        debug!(rejection = ?rejection, "rejected request");
        (StatusCode::BAD_REQUEST, MALFORMED_REQUEST)
    };

    Ok(warp::reply::with_status(warp::reply::json(&AjaxResponse::failure(message)), status)
        .into_response())
}

#[cfg(test)]
mod tests {
    //! Unit tests for form field mapping.

    use super::*;

    #[test]
    fn urlencoded_fields_map_onto_known_slots() {
        let fields = HashMap::from([
            ("action".to_string(), "store_analysis".to_string()),
            ("analysis".to_string(), "<p>x</p>".to_string()),
            ("security_token".to_string(), "abc".to_string()),
            ("unrelated".to_string(), "ignored".to_string()),
        ]);
        let form = AjaxForm::from_fields(fields);
        assert_eq!(form.action.as_deref(), Some("store_analysis"));
        assert_eq!(form.analysis.as_deref(), Some("<p>x</p>"));
        assert_eq!(form.security_token.as_deref(), Some("abc"));
        assert!(form.scope.is_none());
        assert!(form.document.is_none());
    }
}
