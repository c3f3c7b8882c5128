//! Headless upload client: feeds one file through [`UploadSession`] against
//! a running server, executing the session's effects on Tokio.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use portfolio_review_analysis_contract::{
    ACTION_ANALYZE, ACTION_STORE, AjaxResponse, FIELD_ACTION, FIELD_ANALYSIS, FIELD_DOCUMENT,
    FIELD_SECURITY_TOKEN, SessionBootstrap,
};
use portfolio_review_core::{AnalysisResponse, MediaType, UploadCandidate};
use portfolio_review_ui::{
    Clipboard, PresenterError, SessionEffect, SessionError, SessionState, SessionView,
    UploadSession,
};
use reqwest::multipart::{Form, Part};
use thiserror::Error;
use tokio::sync::{OnceCell, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::redact_sensitive;

/// MIME type declared for files whose extension is not recognised.
pub const FALLBACK_MIME_TYPE: &str = "application/octet-stream";

/// Page-to-server transport.
#[async_trait]
pub trait AnalysisTransport: Send + Sync {
    /// Posts `analyze_document` and returns the decoded envelope.
    ///
    /// # Errors
    /// Returns [`ClientError`] when the request does not complete.
    async fn analyze(&self, candidate: &UploadCandidate) -> Result<AnalysisResponse, ClientError>;

    /// Posts `store_analysis`.
    ///
    /// # Errors
    /// Returns [`ClientError`] when the request does not complete or the
    /// server refuses it.
    async fn store_analysis(&self, html: &str) -> Result<(), ClientError>;
}

/// `reqwest` transport that bootstraps its security token from `GET /session`.
#[derive(Debug)]
pub struct HttpAnalysisTransport {
    client: reqwest::Client,
    base_url: Url,
    bootstrap: OnceCell<SessionBootstrap>,
}

impl HttpAnalysisTransport {
    /// Creates a transport for the server at `server_url`.
    ///
    /// # Errors
    /// Returns [`ClientError::InvalidUrl`] for unparsable URLs.
    pub fn new(server_url: &str) -> Result<Self, ClientError> {
        let base_url = Url::parse(server_url)?;
        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
            bootstrap: OnceCell::new(),
        })
    }

    async fn bootstrap(&self) -> Result<&SessionBootstrap, ClientError> {
        self.bootstrap
            .get_or_try_init(|| async {
                let url = self.base_url.join("session")?;
                let bootstrap = self
                    .client
                    .get(url)
                    .send()
                    .await?
                    .error_for_status()?
                    .json::<SessionBootstrap>()
                    .await?;
                debug!(ajax_url = %bootstrap.ajax_url, "session bootstrapped");
                Ok::<_, ClientError>(bootstrap)
            })
            .await
    }

    async fn post(&self, form: Form) -> Result<AjaxResponse, ClientError> {
        let bootstrap = self.bootstrap().await?;
        let url = self.base_url.join(&bootstrap.ajax_url)?;
        Ok(self.client.post(url).multipart(form).send().await?.json().await?)
    }
}

#[async_trait]
impl AnalysisTransport for HttpAnalysisTransport {
    async fn analyze(&self, candidate: &UploadCandidate) -> Result<AnalysisResponse, ClientError> {
        let token = self.bootstrap().await?.security_token.clone();
        let document = Part::bytes(candidate.bytes.clone())
            .file_name(candidate.file_name.clone())
            .mime_str(&candidate.declared_mime_type)?;
        let form = Form::new()
            .text(FIELD_ACTION, ACTION_ANALYZE)
            .text(FIELD_SECURITY_TOKEN, token)
            .part(FIELD_DOCUMENT, document);

        Ok(self.post(form).await?.into_analysis_response())
    }

    async fn store_analysis(&self, html: &str) -> Result<(), ClientError> {
        let token = self.bootstrap().await?.security_token.clone();
        let form = Form::new()
            .text(FIELD_ACTION, ACTION_STORE)
            .text(FIELD_ANALYSIS, html.to_string())
            .text(FIELD_SECURITY_TOKEN, token);

        let envelope = self.post(form).await?;
        if envelope.success {
            Ok(())
        } else {
            Err(ClientError::Refused(envelope.data.unwrap_or_default()))
        }
    }
}

/// Receives what the page would show.
pub trait SessionObserver: Send {
    /// Blocking alert text.
    fn alert(&mut self, message: &str);

    /// Called after every visible change.
    fn view_changed(&mut self, _state: SessionState, _view: &SessionView) {}
}

/// Observer that writes alerts to stderr and view changes to the log.
#[derive(Debug, Default)]
pub struct ConsoleObserver;

impl SessionObserver for ConsoleObserver {
    fn alert(&mut self, message: &str) {
        eprintln!("{message}");
    }

    fn view_changed(&mut self, state: SessionState, view: &SessionView) {
        let lit = view.checklist.iter().filter(|item| item.is_active()).count();
        debug!(
            ?state,
            checklist_lit = lit,
            loading = view.loading_text().unwrap_or_default(),
            "view updated"
        );
    }
}

/// Clipboard backed by the desktop clipboard.
///
/// A handle is opened per write; on X11 the contents are handed to the
/// clipboard manager when the handle drops.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClipboard;

impl Clipboard for SystemClipboard {
    fn set_text(&self, text: &str) -> Result<(), PresenterError> {
        arboard::Clipboard::new()
            .and_then(|mut clipboard| clipboard.set_text(text.to_string()))
            .map_err(|error| PresenterError::Clipboard(error.to_string()))
    }
}

/// Runs [`UploadSession`] transitions and executes their effects.
pub struct SessionDriver<O> {
    session: UploadSession,
    transport: Arc<dyn AnalysisTransport>,
    observer: O,
    timers: Vec<JoinHandle<()>>,
    background: Vec<JoinHandle<()>>,
}

impl<O: SessionObserver> SessionDriver<O> {
    /// Creates a driver with an idle session.
    pub fn new(transport: Arc<dyn AnalysisTransport>, observer: O) -> Self {
        Self {
            session: UploadSession::new(),
            transport,
            observer,
            timers: Vec::new(),
            background: Vec::new(),
        }
    }

    /// Current session.
    pub fn session(&self) -> &UploadSession {
        &self.session
    }

    /// Mutable session, for presenter actions.
    pub fn session_mut(&mut self) -> &mut UploadSession {
        &mut self.session
    }

    /// Observer.
    pub fn observer(&self) -> &O {
        &self.observer
    }

    /// Submits one file and waits for the analysis outcome.
    ///
    /// Image dimensions are decoded on a blocking worker before the session
    /// leaves `Idle`, so no request is sent for an oversized image.
    ///
    /// # Errors
    /// Returns [`DriverError::Session`] when the session is not idle and
    /// [`DriverError::Worker`] when the probe task dies. Validation and
    /// network failures are alerts, not errors.
    pub async fn submit(&mut self, candidate: UploadCandidate) -> Result<SessionState, DriverError> {
        let candidate = resolve_dimensions(candidate).await?;
        let candidate = match self.session.select_file(candidate) {
            Ok(candidate) => candidate,
            Err(rejected @ SessionError::Rejected { .. }) => {
                self.observer.alert(&rejected.to_string());
                return Ok(self.session.state());
            }
            Err(error) => return Err(error.into()),
        };

        let (ticks, mut tick_events) = mpsc::unbounded_channel();
        let effects = self.session.begin_analysis()?;
        self.apply(effects, &ticks);
        self.publish_view();
        info!(file = %candidate.file_name, size_bytes = candidate.size_bytes(), "analysis started");

        let transport = Arc::clone(&self.transport);
        let request = transport.analyze(&candidate);
        tokio::pin!(request);

        let outcome = loop {
            tokio::select! {
                outcome = &mut request => break outcome,
                Some((epoch, step)) = tick_events.recv() => {
                    if self.session.on_checklist_timer(epoch, step) {
                        self.publish_view();
                    }
                }
            }
        };

        let response = outcome.unwrap_or_else(|error| {
            warn!(error = %redact_sensitive(&error.to_string()), "analysis request failed");
            AnalysisResponse::Failure(error.to_string())
        });
        let effects = self.session.on_response(response)?;
        self.apply(effects, &ticks);
        self.publish_view();

        Ok(self.session.state())
    }

    /// Waits for best-effort background work (the store call) to finish.
    pub async fn wait_background(&mut self) {
        for task in self.background.drain(..) {
            if let Err(error) = task.await {
                debug!(error = %error, "background task ended abnormally");
            }
        }
    }

    fn apply(&mut self, effects: Vec<SessionEffect>, ticks: &mpsc::UnboundedSender<(u64, usize)>) {
        for effect in effects {
            match effect {
                SessionEffect::Alert(message) => self.observer.alert(&message),
                SessionEffect::ScheduleChecklist {
                    epoch,
                    step,
                    delay_ms,
                } => {
                    let ticks = ticks.clone();
                    self.timers.push(tokio::spawn(async move {
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                        let _ = ticks.send((epoch, step));
                    }));
                }
                SessionEffect::CancelChecklist { .. } => {
                    for timer in self.timers.drain(..) {
                        timer.abort();
                    }
                }
                SessionEffect::StoreAnalysis { html } => {
                    let transport = Arc::clone(&self.transport);
                    self.background.push(tokio::spawn(async move {
                        if let Err(error) = transport.store_analysis(&html).await {
                            debug!(error = %error, "best-effort store_analysis failed");
                        }
                    }));
                }
            }
        }
    }

    fn publish_view(&mut self) {
        self.observer
            .view_changed(self.session.state(), self.session.view());
    }
}

async fn resolve_dimensions(candidate: UploadCandidate) -> Result<UploadCandidate, DriverError> {
    tokio::task::spawn_blocking(move || {
        let mut candidate = candidate;
        if let Err(error) = candidate.resolve_dimensions() {
            debug!(error = %error, file = %candidate.file_name, "image header unreadable");
        }
        candidate
    })
    .await
    .map_err(|error| DriverError::Worker(error.to_string()))
}

/// Reads a file into a candidate, declaring its MIME type from the extension.
///
/// # Errors
/// Returns [`ClientError::Io`] when the file cannot be read.
pub async fn candidate_from_path(path: &Path) -> Result<UploadCandidate, ClientError> {
    let bytes = tokio::fs::read(path).await?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let declared = MediaType::from_file_name(&file_name)
        .map(|media| media.as_mime())
        .unwrap_or(FALLBACK_MIME_TYPE);

    Ok(UploadCandidate::new(file_name, declared, bytes))
}

/// Client transport failures. `Display` is the text shown in the alert.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Request did not complete or the reply was unreadable.
    #[error("{0}")]
    Transport(String),
    /// Server URL could not be parsed or joined.
    #[error("invalid server url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// Server answered with a failure envelope.
    #[error("{0}")]
    Refused(String),
    /// Local file could not be read.
    #[error("cannot read file: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for ClientError {
    fn from(error: reqwest::Error) -> Self {
        Self::Transport(error.to_string())
    }
}

/// Driver failures outside the alert path.
#[derive(Debug, Error)]
pub enum DriverError {
    /// Session refused the transition.
    #[error(transparent)]
    Session(#[from] SessionError),
    /// Blocking probe task panicked or was cancelled.
    #[error("dimension probe failed: {0}")]
    Worker(String),
}
