//! Shared fixtures for app integration tests.

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use portfolio_review_analysis_contract::{MessagesRequest, MessagesResponse, ResponseContent};
use portfolio_review_app::now_ms;
use portfolio_review_app::server::AppState;
use portfolio_review_auth::{TokenAuthority, UPLOAD_ACTION};
use portfolio_review_gateway::{AnalysisApi, AnalysisGateway, ApiError, ApiKey, ApiSettings};
use portfolio_review_store::{MemoryResultStore, ScopeId};

/// Multipart boundary used by [`multipart_body`].
#[allow(dead_code)]
pub const BOUNDARY: &str = "portfolio-review-test-boundary";

/// External API stand-in answering every call with fixed feedback.
pub struct StubApi {
    feedback: String,
    calls: AtomicUsize,
}

impl StubApi {
    /// Creates a stub replying with `feedback`.
    #[allow(dead_code)]
    pub fn replying(feedback: &str) -> Arc<Self> {
        Arc::new(Self {
            feedback: feedback.to_string(),
            calls: AtomicUsize::new(0),
        })
    }

    /// Number of calls received.
    #[allow(dead_code)]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnalysisApi for StubApi {
    async fn send(
        &self,
        _api_key: &ApiKey,
        _request: &MessagesRequest,
    ) -> Result<MessagesResponse, ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(MessagesResponse {
            content: vec![ResponseContent {
                kind: Some("text".to_string()),
                text: Some(self.feedback.clone()),
            }],
            error: None,
        })
    }
}

/// Server state wired to `api`, plus the collaborators tests inspect.
#[allow(dead_code)]
pub struct Fixture {
    /// Shared route state.
    pub state: Arc<AppState>,
    /// Token authority used by the state.
    pub tokens: Arc<TokenAuthority>,
    /// Result store used by the state.
    pub store: Arc<MemoryResultStore>,
}

impl Fixture {
    /// Fresh upload token for the current time.
    #[allow(dead_code)]
    pub fn token(&self) -> String {
        self.tokens
            .issue(UPLOAD_ACTION, now_ms())
            .expect("token should issue")
            .into_string()
    }
}

/// Builds state with an in-memory store and the given credential.
#[allow(dead_code)]
pub fn fixture(api: Arc<StubApi>, api_key: Option<&str>) -> Fixture {
    let tokens = Arc::new(
        TokenAuthority::new(b"app-tests-secret".to_vec(), 86_400_000).expect("authority"),
    );
    let store = Arc::new(MemoryResultStore::new());
    let gateway = AnalysisGateway::new(
        api,
        tokens.clone(),
        ApiKey::from_optional(api_key),
        ApiSettings::default(),
    )
    .with_store(store.clone());

    Fixture {
        state: Arc::new(AppState::new(
            gateway,
            tokens.clone(),
            store.clone(),
            ScopeId::default(),
        )),
        tokens,
        store,
    }
}

/// Encodes text fields and an optional `(name, content type, bytes)` file
/// as a `multipart/form-data` body delimited by [`BOUNDARY`].
#[allow(dead_code)]
pub fn multipart_body(fields: &[(&str, &str)], document: Option<(&str, &str, &[u8])>) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some((file_name, content_type, bytes)) = document {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"document\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

/// Content type header matching [`multipart_body`].
#[allow(dead_code)]
pub fn multipart_content_type() -> String {
    format!("multipart/form-data; boundary={BOUNDARY}")
}

/// Encodes a blank grayscale PNG of the given size.
#[allow(dead_code)]
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut encoded = Cursor::new(Vec::new());
    image::GrayImage::new(width, height)
        .write_to(&mut encoded, image::ImageFormat::Png)
        .expect("png should encode");
    encoded.into_inner()
}
