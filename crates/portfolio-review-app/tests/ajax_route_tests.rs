//! Integration tests for the AJAX, session, and feedback routes.

mod common;

use common::{StubApi, fixture, multipart_body, multipart_content_type, png_bytes};
use portfolio_review_analysis_contract::{AjaxResponse, SessionBootstrap};
use portfolio_review_app::now_ms;
use portfolio_review_app::server::{NO_ANALYSIS_MESSAGE, routes};
use portfolio_review_auth::{TokenVerifier, UPLOAD_ACTION};
use portfolio_review_core::MAX_UPLOAD_BYTES;
use portfolio_review_store::{ResultStore, ScopeId};
use warp::http::StatusCode;

fn envelope(body: &[u8]) -> AjaxResponse {
    serde_json::from_slice(body).expect("body should be an ajax envelope")
}

#[tokio::test]
async fn ajax_route_tests_session_hands_out_verifiable_token() {
    let fixture = fixture(StubApi::replying("unused"), Some("sk-test"));
    let filter = routes(fixture.state.clone());

    let response = warp::test::request()
        .method("GET")
        .path("/session")
        .reply(&filter)
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let bootstrap: SessionBootstrap =
        serde_json::from_slice(response.body()).expect("bootstrap json");
    assert_eq!(bootstrap.ajax_url, "/ajax");
    fixture
        .tokens
        .verify(UPLOAD_ACTION, &bootstrap.security_token, now_ms())
        .expect("issued token verifies");
}

#[tokio::test]
async fn ajax_route_tests_multipart_analysis_is_relayed_and_shown() {
    let api = StubApi::replying("<p>Great use of whitespace.</p>");
    let fixture = fixture(api.clone(), Some("sk-test"));
    let filter = routes(fixture.state.clone());
    let token = fixture.token();
    let png = png_bytes(40, 30);

    let response = warp::test::request()
        .method("POST")
        .path("/ajax")
        .header("content-type", multipart_content_type())
        .body(multipart_body(
            &[("action", "analyze_document"), ("security_token", token.as_str())],
            Some(("portfolio.png", "image/png", png.as_slice())),
        ))
        .reply(&filter)
        .await;

    assert_eq!(
        envelope(response.body()),
        AjaxResponse::success("<p>Great use of whitespace.</p>")
    );
    assert_eq!(api.calls(), 1);

    let feedback = warp::test::request()
        .method("GET")
        .path("/feedback")
        .reply(&filter)
        .await;
    let page = String::from_utf8_lossy(feedback.body());
    assert!(page.contains(
        r#"<div class="feedback-content"><p>Great use of whitespace.</p></div>"#
    ));
}

#[tokio::test]
async fn ajax_route_tests_failures_come_back_as_envelopes() {
    let api = StubApi::replying("<p>unused</p>");
    let keyless = fixture(api.clone(), None);
    let filter = routes(keyless.state.clone());
    let token = keyless.token();

    let missing_key = warp::test::request()
        .method("POST")
        .path("/ajax")
        .header("content-type", multipart_content_type())
        .body(multipart_body(
            &[("action", "analyze_document"), ("security_token", token.as_str())],
            Some(("cv.pdf", "application/pdf", &b"%PDF-1.7"[..])),
        ))
        .reply(&filter)
        .await;
    assert_eq!(
        envelope(missing_key.body()),
        AjaxResponse::failure("API key not configured")
    );

    let forged = warp::test::request()
        .method("POST")
        .path("/ajax")
        .header("content-type", multipart_content_type())
        .body(multipart_body(
            &[("action", "analyze_document"), ("security_token", "forged")],
            Some(("cv.pdf", "application/pdf", &b"%PDF-1.7"[..])),
        ))
        .reply(&filter)
        .await;
    assert_eq!(envelope(forged.body()), AjaxResponse::failure("Security check failed"));

    let no_file = warp::test::request()
        .method("POST")
        .path("/ajax")
        .header("content-type", multipart_content_type())
        .body(multipart_body(
            &[("action", "analyze_document"), ("security_token", token.as_str())],
            None,
        ))
        .reply(&filter)
        .await;
    assert_eq!(envelope(no_file.body()), AjaxResponse::failure("No document uploaded"));

    let gif = warp::test::request()
        .method("POST")
        .path("/ajax")
        .header("content-type", multipart_content_type())
        .body(multipart_body(
            &[("action", "analyze_document"), ("security_token", token.as_str())],
            Some(("anim.gif", "image/gif", &b"GIF89a"[..])),
        ))
        .reply(&filter)
        .await;
    assert_eq!(
        envelope(gif.body()),
        AjaxResponse::failure("Invalid file type. Please upload an image (JPEG/PNG) or PDF.")
    );

    assert_eq!(api.calls(), 0);
}

#[tokio::test]
async fn ajax_route_tests_oversized_upload_gets_size_message() {
    let api = StubApi::replying("<p>unused</p>");
    let fixture = fixture(api.clone(), Some("sk-test"));
    let filter = routes(fixture.state.clone());
    let token = fixture.token();
    let oversized = vec![0_u8; (MAX_UPLOAD_BYTES + 1) as usize];

    let response = warp::test::request()
        .method("POST")
        .path("/ajax")
        .header("content-type", multipart_content_type())
        .body(multipart_body(
            &[("action", "analyze_document"), ("security_token", token.as_str())],
            Some(("huge.pdf", "application/pdf", oversized.as_slice())),
        ))
        .reply(&filter)
        .await;

    assert_eq!(
        envelope(response.body()),
        AjaxResponse::failure("File size must be under 10MB")
    );
    assert_eq!(api.calls(), 0);
}

#[tokio::test]
async fn ajax_route_tests_urlencoded_store_and_scoped_feedback() {
    let fixture = fixture(StubApi::replying("unused"), Some("sk-test"));
    let filter = routes(fixture.state.clone());
    let token = fixture.token();

    let empty = warp::test::request()
        .method("GET")
        .path("/feedback")
        .reply(&filter)
        .await;
    assert!(String::from_utf8_lossy(empty.body()).contains(NO_ANALYSIS_MESSAGE));

    let stored = warp::test::request()
        .method("POST")
        .path("/ajax")
        .header("content-type", "application/x-www-form-urlencoded")
        .body(format!(
            "action=store_analysis&scope=team-a&security_token={token}&analysis=%3Cp%3EStored%3C%2Fp%3E"
        ))
        .reply(&filter)
        .await;
    assert_eq!(stored.status(), StatusCode::OK);
    assert_eq!(String::from_utf8_lossy(stored.body()), r#"{"success":true}"#);

    let team = ScopeId::new("team-a").expect("scope");
    assert_eq!(
        fixture.store.read_latest(&team).expect("read").expect("record").html,
        "<p>Stored</p>"
    );
    assert_eq!(fixture.store.read_latest(&ScopeId::default()).expect("read"), None);

    let scoped = warp::test::request()
        .method("GET")
        .path("/feedback?scope=team-a")
        .reply(&filter)
        .await;
    assert!(String::from_utf8_lossy(scoped.body()).contains("<p>Stored</p>"));

    let missing = warp::test::request()
        .method("POST")
        .path("/ajax")
        .header("content-type", "application/x-www-form-urlencoded")
        .body(format!("action=store_analysis&security_token={token}"))
        .reply(&filter)
        .await;
    assert_eq!(envelope(missing.body()), AjaxResponse::failure("No analysis data received"));
}

#[tokio::test]
async fn ajax_route_tests_unknown_action_and_unknown_path() {
    let fixture = fixture(StubApi::replying("unused"), Some("sk-test"));
    let filter = routes(fixture.state.clone());

    let unknown = warp::test::request()
        .method("POST")
        .path("/ajax")
        .header("content-type", "application/x-www-form-urlencoded")
        .body("action=delete_everything")
        .reply(&filter)
        .await;
    assert_eq!(envelope(unknown.body()), AjaxResponse::failure("Unknown action"));

    let missing = warp::test::request()
        .method("GET")
        .path("/nowhere")
        .reply(&filter)
        .await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn ajax_route_tests_posted_script_never_reaches_feedback_view() {
    let fixture = fixture(StubApi::replying("unused"), Some("sk-test"));
    let filter = routes(fixture.state.clone());
    let token = fixture.token();

    let stored = warp::test::request()
        .method("POST")
        .path("/ajax")
        .header("content-type", "application/x-www-form-urlencoded")
        .body(format!(
            "action=store_analysis&security_token={token}&analysis=%3Cscript%3Ealert(document.cookie)%3C%2Fscript%3E%3Cp%3EKept%3C%2Fp%3E"
        ))
        .reply(&filter)
        .await;
    assert_eq!(String::from_utf8_lossy(stored.body()), r#"{"success":true}"#);

    let feedback = warp::test::request()
        .method("GET")
        .path("/feedback")
        .reply(&filter)
        .await;
    let page = String::from_utf8_lossy(feedback.body());
    assert!(!page.contains("<script"));
    assert!(!page.contains("document.cookie"));
    assert!(page.contains("<p>Kept</p>"));
}

#[tokio::test]
async fn ajax_route_tests_feedback_view_sanitizes_stored_records() {
    let fixture = fixture(StubApi::replying("unused"), Some("sk-test"));
    let filter = routes(fixture.state.clone());
    fixture
        .store
        .store_latest(
            &ScopeId::default(),
            r#"<p>Solid typography.</p><img src="x" onerror="steal()"><script>steal()</script>"#,
            1,
        )
        .expect("seed store");

    let feedback = warp::test::request()
        .method("GET")
        .path("/feedback")
        .reply(&filter)
        .await;
    let page = String::from_utf8_lossy(feedback.body());
    assert!(!page.contains("<script"));
    assert!(!page.contains("onerror"));
    assert!(page.contains("<p>Solid typography.</p>"));
}

#[tokio::test]
async fn ajax_route_tests_body_without_length_gets_411() {
    let fixture = fixture(StubApi::replying("unused"), Some("sk-test"));
    let filter = routes(fixture.state.clone());

    let response = warp::test::request()
        .method("POST")
        .path("/ajax")
        .header("content-type", "application/x-www-form-urlencoded")
        .header("transfer-encoding", "chunked")
        .reply(&filter)
        .await;

    assert_eq!(response.status(), StatusCode::LENGTH_REQUIRED);
    assert_eq!(
        envelope(response.body()),
        AjaxResponse::failure("Content-Length header is required")
    );
}
