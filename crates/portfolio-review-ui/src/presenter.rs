//! Result presenter actions: render, copy, download, reset.

use thiserror::Error;

use crate::{SessionError, SessionState, UploadSession};

/// Name of the downloaded feedback file.
pub const DOWNLOAD_FILE_NAME: &str = "analysis-result.doc";

/// MIME type of the downloaded feedback file.
pub const DOWNLOAD_MIME_TYPE: &str = "application/msword";

/// Alert shown after a successful copy.
pub const COPY_CONFIRMATION: &str = "Text copied to clipboard!";

const DOCUMENT_HEADER: &str = r#"<html xmlns:w="urn:schemas-microsoft-com:office:word"><head><meta charset="UTF-8"></head><body>"#;
const DOCUMENT_FOOTER: &str = "</body></html>";

/// System clipboard port.
pub trait Clipboard: Send + Sync {
    /// Replaces the clipboard contents with `text`.
    ///
    /// # Errors
    /// Returns [`PresenterError::Clipboard`] when the platform refuses.
    fn set_text(&self, text: &str) -> Result<(), PresenterError>;
}

/// File offered for download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadArtifact {
    /// Suggested file name.
    pub file_name: &'static str,
    /// MIME type.
    pub mime_type: &'static str,
    /// Document body.
    pub body: String,
}

/// Wraps feedback HTML in the minimal word-processor document.
pub fn download_document(html: &str) -> DownloadArtifact {
    DownloadArtifact {
        file_name: DOWNLOAD_FILE_NAME,
        mime_type: DOWNLOAD_MIME_TYPE,
        body: format!("{DOCUMENT_HEADER}{html}{DOCUMENT_FOOTER}"),
    }
}

/// Text content of rendered HTML: tags dropped, text nodes concatenated,
/// common entities decoded.
pub fn plain_text(html: &str) -> String {
    let mut stripped = String::with_capacity(html.len());
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => stripped.push(ch),
            _ => {}
        }
    }
    decode_entities(&stripped)
}

fn decode_entities(text: &str) -> String {
    let mut decoded = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('&') {
        decoded.push_str(&rest[..start]);
        let tail = &rest[start..];
        let replacement = tail
            .find(';')
            .filter(|end| *end <= 10)
            .and_then(|end| decode_entity(&tail[1..end]).map(|ch| (ch, end)));

        match replacement {
            Some((ch, end)) => {
                decoded.push(ch);
                rest = &tail[end + 1..];
            }
            None => {
                decoded.push('&');
                rest = &tail[1..];
            }
        }
    }
    decoded.push_str(rest);
    decoded
}

fn decode_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some('\u{a0}'),
        _ => {
            let digits = name.strip_prefix('#')?;
            let code = match digits.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => digits.parse().ok()?,
            };
            char::from_u32(code)
        }
    }
}

/// Actions available once feedback is showing.
#[derive(Debug)]
pub struct ResultPresenter<C> {
    clipboard: C,
}

impl<C: Clipboard> ResultPresenter<C> {
    /// Creates a presenter writing to `clipboard`.
    pub fn new(clipboard: C) -> Self {
        Self { clipboard }
    }

    /// Feedback HTML to render, when the result container is visible.
    pub fn render<'a>(&self, session: &'a UploadSession) -> Option<&'a str> {
        let view = session.view();
        view.result_visible.then_some(view.feedback_html.as_str())
    }

    /// Copies the rendered text and returns the confirmation alert.
    ///
    /// # Errors
    /// Returns [`PresenterError::NoResult`] when nothing is rendered and
    /// propagates clipboard failures.
    pub fn copy(&self, session: &UploadSession) -> Result<&'static str, PresenterError> {
        let html = self.render(session).ok_or(PresenterError::NoResult)?;
        self.clipboard.set_text(&plain_text(html))?;
        Ok(COPY_CONFIRMATION)
    }

    /// Packages the rendered HTML for download.
    ///
    /// # Errors
    /// Returns [`PresenterError::NoResult`] when nothing is rendered.
    pub fn download(&self, session: &UploadSession) -> Result<DownloadArtifact, PresenterError> {
        self.render(session)
            .map(download_document)
            .ok_or(PresenterError::NoResult)
    }

    /// Returns the session to `Idle`.
    ///
    /// # Errors
    /// Returns [`PresenterError::NoResult`] unless the session is complete.
    pub fn start_new_analysis(&self, session: &mut UploadSession) -> Result<(), PresenterError> {
        if session.state() != SessionState::Complete {
            return Err(PresenterError::NoResult);
        }
        session.reset()?;
        Ok(())
    }
}

/// Presenter errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PresenterError {
    /// No feedback is rendered.
    #[error("no analysis result is displayed")]
    NoResult,
    /// Clipboard write failed.
    #[error("clipboard unavailable: {0}")]
    Clipboard(String),
    /// Session refused the transition.
    #[error(transparent)]
    Session(#[from] SessionError),
}
