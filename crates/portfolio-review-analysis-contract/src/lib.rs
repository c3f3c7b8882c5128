#![warn(missing_docs)]
//! # portfolio-review-analysis-contract
//!
//! ## Purpose
//! Defines the wire formats on both sides of the analysis gateway: the JSON
//! envelope the browser receives and the "messages" body exchanged with the
//! external multimodal analysis API.
//!
//! ## Responsibilities
//! - Build the per-file request with its document/image block and the fixed
//!   feedback instruction.
//! - Parse upstream bodies, surfacing explicit API errors.
//! - Model the `{success, data}` envelope and form field names.
//!
//! ## Data flow
//! File bytes -> [`build_feedback_request`] -> HTTP transport ->
//! [`parse_messages_response`] -> [`MessagesResponse::feedback_text`] ->
//! [`AjaxResponse`] sent to the browser.
//!
//! ## Ownership and lifetimes
//! Requests own their base64 text; parsed responses are owned structs so they
//! outlive the transport buffer.
//!
//! ## Error model
//! Undecodable bodies, explicit upstream errors, and bodies without feedback
//! text are [`ContractError`] variants.
//!
//! ## Security and privacy notes
//! The API credential is not part of any type here; it travels as a header
//! added by the transport.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use portfolio_review_core::{AnalysisResponse, MediaType};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// `anthropic-version` header value.
pub const API_VERSION: &str = "2023-06-01";

/// Default model identifier.
pub const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";

/// Default response token cap for feedback requests.
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Token cap for the credential check.
pub const CREDENTIAL_CHECK_MAX_TOKENS: u32 = 10;

/// Instruction appended after every document or image block.
pub const FEEDBACK_PROMPT: &str = "Please analyze this portfolio image and provide/enumerate detailed, industry-ready recommendations and feedback. Consider visual hierarchy, information architecture, storytelling, and design best practices. Format your response by encapsulating each sentence with <p> and </p> tags. Separate different ideas with <br> tags in between. Separate headings with <br>. Add line breaks before bullet points if you are going to use it. Utilize <strong> and <i> to emphasize keywords. No need to introduce your response.";

/// Form action that submits a document for analysis.
pub const ACTION_ANALYZE: &str = "analyze_document";

/// Form action that stores a finished analysis.
pub const ACTION_STORE: &str = "store_analysis";

/// Form field carrying the action name.
pub const FIELD_ACTION: &str = "action";

/// Form field carrying the uploaded file.
pub const FIELD_DOCUMENT: &str = "document";

/// Form field carrying the security token.
pub const FIELD_SECURITY_TOKEN: &str = "security_token";

/// Form field carrying analysis HTML to store.
pub const FIELD_ANALYSIS: &str = "analysis";

/// Optional form field selecting the result-store scope.
pub const FIELD_SCOPE: &str = "scope";

/// Request body for the external messages endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagesRequest {
    /// Model identifier.
    pub model: String,
    /// Conversation turns; always a single user turn here.
    pub messages: Vec<Message>,
    /// Response token budget.
    pub max_tokens: u32,
}

/// One conversation turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Speaker role.
    pub role: Role,
    /// Turn content.
    pub content: MessageContent,
}

/// Speaker role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// End user turn.
    User,
    /// Model turn.
    Assistant,
}

/// Turn content: bare text or typed blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Plain text.
    Text(String),
    /// Typed content blocks.
    Blocks(Vec<ContentBlock>),
}

/// Typed unit inside a user turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    /// PDF document.
    Document {
        /// Encoded file.
        source: Base64Source,
    },
    /// Raster image.
    Image {
        /// Encoded file.
        source: Base64Source,
    },
    /// Instruction text.
    Text {
        /// Text body.
        text: String,
    },
}

/// Inline base64 file source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Base64Source {
    /// Source encoding; always `base64`.
    #[serde(rename = "type")]
    pub kind: SourceKind,
    /// Canonical MIME type.
    pub media_type: String,
    /// Base64 file contents.
    pub data: String,
}

/// Source encoding marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Standard base64.
    Base64,
}

/// Builds the feedback request for one file.
///
/// PDFs become a `document` block and images an `image` block; both are
/// followed by the same [`FEEDBACK_PROMPT`] text block.
pub fn build_feedback_request(
    model: &str,
    max_tokens: u32,
    media: MediaType,
    bytes: &[u8],
) -> MessagesRequest {
    let source = Base64Source {
        kind: SourceKind::Base64,
        media_type: media.as_mime().to_string(),
        data: STANDARD.encode(bytes),
    };
    let file_block = if media.is_image() {
        ContentBlock::Image { source }
    } else {
        ContentBlock::Document { source }
    };

    MessagesRequest {
        model: model.to_string(),
        messages: vec![Message {
            role: Role::User,
            content: MessageContent::Blocks(vec![
                file_block,
                ContentBlock::Text {
                    text: FEEDBACK_PROMPT.to_string(),
                },
            ]),
        }],
        max_tokens,
    }
}

/// Builds the minimal request used to check that a credential works.
pub fn build_credential_check_request(model: &str) -> MessagesRequest {
    MessagesRequest {
        model: model.to_string(),
        messages: vec![Message {
            role: Role::User,
            content: MessageContent::Text("Test message".to_string()),
        }],
        max_tokens: CREDENTIAL_CHECK_MAX_TOKENS,
    }
}

/// Parsed upstream body. Both fields are optional on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MessagesResponse {
    /// Generated content items.
    #[serde(default)]
    pub content: Vec<ResponseContent>,
    /// Explicit API error.
    #[serde(default)]
    pub error: Option<ApiErrorBody>,
}

/// One generated content item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseContent {
    /// Item type, usually `text`.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Text payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Error object reported by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiErrorBody {
    /// Error class, e.g. `authentication_error`.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
}

impl MessagesResponse {
    /// Returns the text of the first content item.
    ///
    /// # Errors
    /// Returns [`ContractError::Upstream`] when the body carries an `error`
    /// object and [`ContractError::MissingText`] when no text is present.
    pub fn feedback_text(self) -> Result<String, ContractError> {
        if let Some(error) = self.error {
            return Err(ContractError::Upstream(error.message));
        }

        self.content
            .into_iter()
            .next()
            .and_then(|item| item.text)
            .ok_or(ContractError::MissingText)
    }
}

/// Parses an upstream body.
///
/// # Errors
/// Returns [`ContractError::Decode`] for malformed JSON.
pub fn parse_messages_response(raw: &str) -> Result<MessagesResponse, ContractError> {
    serde_json::from_str(raw).map_err(ContractError::Decode)
}

/// `{success, data}` envelope returned to the browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AjaxResponse {
    /// Whether the action succeeded.
    pub success: bool,
    /// Feedback HTML on success, error message on failure; absent for
    /// data-less acknowledgements.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl AjaxResponse {
    /// Success carrying data.
    pub fn success(data: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data.into()),
        }
    }

    /// Data-less success acknowledgement.
    pub fn acknowledged() -> Self {
        Self {
            success: true,
            data: None,
        }
    }

    /// Failure carrying a user-facing message.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Some(message.into()),
        }
    }

    /// Converts into the analysis outcome seen by the upload session.
    pub fn into_analysis_response(self) -> AnalysisResponse {
        let data = self.data.unwrap_or_default();
        if self.success {
            AnalysisResponse::Success(data)
        } else {
            AnalysisResponse::Failure(data)
        }
    }
}

impl From<AnalysisResponse> for AjaxResponse {
    fn from(response: AnalysisResponse) -> Self {
        match response {
            AnalysisResponse::Success(html) => Self::success(html),
            AnalysisResponse::Failure(message) => Self::failure(message),
        }
    }
}

/// Values the page needs before it can post forms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionBootstrap {
    /// Endpoint path for form posts.
    pub ajax_url: String,
    /// Token to echo in [`FIELD_SECURITY_TOKEN`].
    pub security_token: String,
}

/// Contract errors.
#[derive(Debug, Error)]
pub enum ContractError {
    /// Body is not valid JSON for the expected shape.
    #[error("response decode failure: {0}")]
    Decode(#[from] serde_json::Error),
    /// API returned an explicit error.
    #[error("{0}")]
    Upstream(String),
    /// Body has no text in its first content item.
    #[error("response contained no feedback text")]
    MissingText,
}

#[cfg(test)]
mod tests {
    //! Unit tests for request shape and response extraction.

    use super::*;

    #[test]
    fn pdf_uses_document_block_and_image_uses_image_block() {
        let pdf = build_feedback_request(DEFAULT_MODEL, 1024, MediaType::Pdf, b"%PDF");
        let png = build_feedback_request(DEFAULT_MODEL, 1024, MediaType::Png, b"png");

        let pdf_json = serde_json::to_value(&pdf).expect("request should serialize");
        let png_json = serde_json::to_value(&png).expect("request should serialize");

        assert_eq!(pdf_json["messages"][0]["content"][0]["type"], "document");
        assert_eq!(png_json["messages"][0]["content"][0]["type"], "image");
        assert_eq!(png_json["messages"][0]["content"][0]["source"]["type"], "base64");
        assert_eq!(png_json["messages"][0]["content"][0]["source"]["media_type"], "image/png");
        assert_eq!(png_json["messages"][0]["content"][0]["source"]["data"], "cG5n");
        assert_eq!(
            pdf_json["messages"][0]["content"][1],
            png_json["messages"][0]["content"][1]
        );
        assert_eq!(png_json["messages"][0]["content"][1]["text"], FEEDBACK_PROMPT);
    }

    #[test]
    fn explicit_error_wins_over_content() {
        let parsed = parse_messages_response(
            r#"{"type":"error","error":{"type":"invalid_request_error","message":"bad image"}}"#,
        )
        .expect("error body should parse");
        assert!(matches!(
            parsed.feedback_text(),
            Err(ContractError::Upstream(message)) if message == "bad image"
        ));
    }

    #[test]
    fn envelope_omits_missing_data() {
        let raw = serde_json::to_string(&AjaxResponse::acknowledged()).expect("serialize");
        assert_eq!(raw, r#"{"success":true}"#);
    }
}
