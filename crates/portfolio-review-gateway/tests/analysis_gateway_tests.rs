//! Integration tests for gateway checks, relay, and persistence.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use portfolio_review_analysis_contract::{
    ApiErrorBody, ContentBlock, MessageContent, MessagesRequest, MessagesResponse, ResponseContent,
};
use portfolio_review_auth::{TokenAuthority, UPLOAD_ACTION};
use portfolio_review_core::{AnalysisResponse, ErrorKind, MAX_UPLOAD_BYTES};
use portfolio_review_gateway::{
    AnalysisApi, AnalysisGateway, AnalyzeRequest, ApiError, ApiKey, ApiSettings, DocumentUpload,
    GatewayError,
};
use portfolio_review_store::{MemoryResultStore, ResultStore, ScopeId};

const NOW_MS: u64 = 1_700_000_000_000;

struct ScriptedApi {
    reply: Result<MessagesResponse, ApiError>,
    requests: Mutex<Vec<MessagesRequest>>,
}

impl ScriptedApi {
    fn replying(reply: Result<MessagesResponse, ApiError>) -> Arc<Self> {
        Arc::new(Self {
            reply,
            requests: Mutex::new(Vec::new()),
        })
    }

    fn text(text: &str) -> Arc<Self> {
        Self::replying(Ok(MessagesResponse {
            content: vec![ResponseContent {
                kind: Some("text".to_string()),
                text: Some(text.to_string()),
            }],
            error: None,
        }))
    }

    fn calls(&self) -> usize {
        self.requests.lock().expect("request log").len()
    }
}

#[async_trait]
impl AnalysisApi for ScriptedApi {
    async fn send(
        &self,
        _api_key: &ApiKey,
        request: &MessagesRequest,
    ) -> Result<MessagesResponse, ApiError> {
        self.requests.lock().expect("request log").push(request.clone());
        self.reply.clone()
    }
}

fn authority() -> Arc<TokenAuthority> {
    Arc::new(TokenAuthority::new(b"gateway-tests".to_vec(), 86_400_000).expect("authority"))
}

fn gateway(api: Arc<ScriptedApi>, key: Option<&str>) -> AnalysisGateway {
    AnalysisGateway::new(
        api,
        authority(),
        ApiKey::from_optional(key),
        ApiSettings::default(),
    )
}

fn token() -> String {
    authority()
        .issue(UPLOAD_ACTION, NOW_MS)
        .expect("token")
        .into_string()
}

fn request(name: &str, bytes: Vec<u8>) -> AnalyzeRequest {
    AnalyzeRequest {
        document: Some(DocumentUpload {
            file_name: Some(name.to_string()),
            content_type: None,
            bytes,
        }),
        security_token: Some(token()),
        scope: ScopeId::default(),
    }
}

#[tokio::test]
async fn analysis_gateway_tests_security_failure_skips_external_call() {
    let api = ScriptedApi::text("<p>unused</p>");
    let gateway = gateway(api.clone(), Some("sk-test"));

    for bad_token in [None, Some("forged-token".to_string())] {
        let mut req = request("shot.png", vec![1; 16]);
        req.security_token = bad_token;
        let error = gateway
            .try_analyze(req, NOW_MS)
            .await
            .expect_err("bad token must fail");
        assert_eq!(error.kind(), ErrorKind::Security);
        assert_eq!(error.to_string(), "Security check failed");
    }
    assert_eq!(api.calls(), 0);
}

#[tokio::test]
async fn analysis_gateway_tests_missing_credential_fails_before_call() {
    let api = ScriptedApi::text("<p>unused</p>");
    let gateway = gateway(api.clone(), None);

    let response = gateway.analyze(request("portfolio.pdf", b"%PDF-1.7".to_vec()), NOW_MS).await;
    assert_eq!(
        response,
        AnalysisResponse::Failure("API key not configured".to_string())
    );
    assert_eq!(api.calls(), 0);
}

#[tokio::test]
async fn analysis_gateway_tests_rejects_missing_oversized_and_unsupported_files() {
    let api = ScriptedApi::text("<p>unused</p>");
    let gateway = gateway(api.clone(), Some("sk-test"));

    let mut no_document = request("x.png", Vec::new());
    no_document.document = None;
    assert!(matches!(
        gateway.try_analyze(no_document, NOW_MS).await,
        Err(GatewayError::MissingDocument)
    ));

    let oversized = request("big.png", vec![0; (MAX_UPLOAD_BYTES + 1) as usize]);
    let error = gateway.try_analyze(oversized, NOW_MS).await.expect_err("too large");
    assert_eq!(error.to_string(), "File size must be under 10MB");

    let gif = request("anim.gif", vec![0; 8]);
    let error = gateway.try_analyze(gif, NOW_MS).await.expect_err("unsupported");
    assert_eq!(
        error.to_string(),
        "Invalid file type. Please upload an image (JPEG/PNG) or PDF."
    );
    assert_eq!(api.calls(), 0);
}

#[tokio::test]
async fn analysis_gateway_tests_success_is_relayed_and_persisted() {
    let api = ScriptedApi::text("<p>Great use of whitespace.</p>");
    let store = Arc::new(MemoryResultStore::new());
    let gateway = gateway(api.clone(), Some("sk-test")).with_store(store.clone());

    let response = gateway
        .analyze(request("portfolio.png", vec![7; 2_048]), NOW_MS)
        .await;
    assert_eq!(
        response,
        AnalysisResponse::Success("<p>Great use of whitespace.</p>".to_string())
    );

    let record = store
        .read_latest(&ScopeId::default())
        .expect("store read")
        .expect("record stored");
    assert_eq!(record.html, "<p>Great use of whitespace.</p>");
    assert_eq!(record.stored_at_ms, NOW_MS);

    let sent = api.requests.lock().expect("request log");
    let MessageContent::Blocks(blocks) = &sent[0].messages[0].content else {
        panic!("feedback request must use content blocks");
    };
    assert!(matches!(&blocks[0], ContentBlock::Image { source } if source.media_type == "image/png"));
    assert!(matches!(&blocks[1], ContentBlock::Text { .. }));
}

#[tokio::test]
async fn analysis_gateway_tests_failures_never_overwrite_latest() {
    let store = Arc::new(MemoryResultStore::new());
    store
        .store_latest(&ScopeId::default(), "<p>previous</p>", 1)
        .expect("seed store");

    let upstream = ScriptedApi::replying(Ok(MessagesResponse {
        content: Vec::new(),
        error: Some(ApiErrorBody {
            kind: Some("overloaded_error".to_string()),
            message: "Overloaded".to_string(),
        }),
    }));
    let upstream_gateway = gateway(upstream, Some("sk-test")).with_store(store.clone());
    let response = upstream_gateway.analyze(request("cv.pdf", b"%PDF".to_vec()), NOW_MS).await;
    assert_eq!(response, AnalysisResponse::Failure("API Error: Overloaded".to_string()));

    let transport = ScriptedApi::replying(Err(ApiError::Transport("operation timed out".to_string())));
    let transport_gateway = gateway(transport, Some("sk-test")).with_store(store.clone());
    let error = transport_gateway
        .try_analyze(request("cv.pdf", b"%PDF".to_vec()), NOW_MS)
        .await
        .expect_err("transport failure");
    assert_eq!(error.kind(), ErrorKind::Transport);
    assert_eq!(
        error.to_string(),
        "Error connecting to analysis API: operation timed out"
    );

    let record = store.read_latest(&ScopeId::default()).expect("read").expect("record");
    assert_eq!(record.html, "<p>previous</p>");
}

#[tokio::test]
async fn analysis_gateway_tests_store_action_requires_token_and_payload() {
    let store = Arc::new(MemoryResultStore::new());
    let gateway = gateway(ScriptedApi::text(""), Some("sk-test")).with_store(store.clone());
    let scope = ScopeId::default();

    assert!(matches!(
        gateway.store_analysis(Some("<p>x</p>"), Some("nope"), &scope, NOW_MS),
        Err(GatewayError::Security(_))
    ));
    assert!(matches!(
        gateway.store_analysis(None, Some(&token()), &scope, NOW_MS),
        Err(GatewayError::MissingAnalysis)
    ));

    gateway
        .store_analysis(Some("<p>stored</p>"), Some(&token()), &scope, NOW_MS)
        .expect("store should succeed");
    assert_eq!(store.read_latest(&scope).expect("read").expect("record").html, "<p>stored</p>");
}

#[tokio::test]
async fn analysis_gateway_tests_credential_check_reports_upstream_errors() {
    let missing = gateway(ScriptedApi::text("ok"), None);
    assert!(matches!(
        missing.verify_credential().await,
        Err(GatewayError::MissingCredential)
    ));

    let rejected = gateway(
        ScriptedApi::replying(Ok(MessagesResponse {
            content: Vec::new(),
            error: Some(ApiErrorBody {
                kind: Some("authentication_error".to_string()),
                message: "invalid x-api-key".to_string(),
            }),
        })),
        Some("sk-bad"),
    );
    let error = rejected.verify_credential().await.expect_err("bad key");
    assert_eq!(error.to_string(), "API Error: invalid x-api-key");

    let api = ScriptedApi::text("Hi");
    let accepted = gateway(api.clone(), Some("sk-good"));
    accepted.verify_credential().await.expect("good key");
    assert_eq!(api.requests.lock().expect("log")[0].max_tokens, 10);
}

#[tokio::test]
async fn analysis_gateway_tests_persistence_can_be_left_to_clients() {
    let store = Arc::new(MemoryResultStore::new());
    let gateway = gateway(ScriptedApi::text("<p>fresh</p>"), Some("sk-test"))
        .with_store(store.clone())
        .persist_on_success(false);

    let response = gateway.analyze(request("cv.pdf", b"%PDF".to_vec()), NOW_MS).await;
    assert!(response.is_success());
    assert_eq!(store.read_latest(&ScopeId::default()).expect("read"), None);

    gateway
        .store_analysis(Some("<p>fresh</p>"), Some(&token()), &ScopeId::default(), NOW_MS)
        .expect("client store");
    assert!(store.read_latest(&ScopeId::default()).expect("read").is_some());
}

#[tokio::test]
async fn analysis_gateway_tests_stored_html_is_sanitized() {
    let store = Arc::new(MemoryResultStore::new());
    let gateway = gateway(ScriptedApi::text(""), Some("sk-test")).with_store(store.clone());
    let scope = ScopeId::new("team-a").expect("scope");

    gateway
        .store_analysis(
            Some("<script>alert(document.cookie)</script><p onclick=\"steal()\">Kept</p>"),
            Some(&token()),
            &scope,
            NOW_MS,
        )
        .expect("store should succeed");

    let html = store.read_latest(&scope).expect("read").expect("record").html;
    assert!(!html.contains("<script"));
    assert!(!html.contains("onclick"));
    assert!(html.contains("Kept"));
}

#[tokio::test]
async fn analysis_gateway_tests_persisted_feedback_is_sanitized_but_relayed_verbatim() {
    let reply = "<h3>Layout</h3><img src=\"x\" onerror=\"steal()\"><p>Tight grid.</p>";
    let store = Arc::new(MemoryResultStore::new());
    let gateway = gateway(ScriptedApi::text(reply), Some("sk-test")).with_store(store.clone());

    let response = gateway.analyze(request("portfolio.png", vec![1; 64]), NOW_MS).await;
    assert_eq!(response, AnalysisResponse::Success(reply.to_string()));

    let html = store
        .read_latest(&ScopeId::default())
        .expect("read")
        .expect("record")
        .html;
    assert!(!html.contains("onerror"));
    assert!(html.contains("<h3>Layout</h3>"));
    assert!(html.contains("<p>Tight grid.</p>"));
}
