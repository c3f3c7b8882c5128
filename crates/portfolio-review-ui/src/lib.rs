#![warn(missing_docs)]
//! # portfolio-review-ui
//!
//! ## Purpose
//! Models the client-side upload workflow as an explicit state machine plus
//! the result presenter actions (copy, download, reset).
//!
//! ## Responsibilities
//! - Gate file selection on validation and allow one submission at a time.
//! - Track what the page shows in each state (drop zone, spinner, checklist,
//!   result container).
//! - Emit side effects (alerts, checklist timers, the best-effort store call)
//!   as values for the driver to execute.
//!
//! ## Data flow
//! Driver probes dimensions -> [`UploadSession::select_file`] ->
//! [`UploadSession::begin_analysis`] -> timers call
//! [`UploadSession::on_checklist_timer`] -> network completion calls
//! [`UploadSession::on_response`] -> [`ResultPresenter`] actions ->
//! [`UploadSession::reset`].
//!
//! ## Ownership and lifetimes
//! The session owns its [`SessionView`]; the accepted candidate is moved out
//! to the caller so the bytes are not retained after submission.
//!
//! ## Error model
//! Illegal transitions and validation rejections are [`SessionError`] values;
//! the session never panics on out-of-order events.
//!
//! ## Security and privacy notes
//! Feedback HTML is rendered verbatim; sanitizing it is the server's job.

mod presenter;

use portfolio_review_core::{AnalysisResponse, UploadCandidate, validate};
use thiserror::Error;

pub use presenter::{
    COPY_CONFIRMATION, Clipboard, DOWNLOAD_FILE_NAME, DOWNLOAD_MIME_TYPE, DownloadArtifact,
    PresenterError, ResultPresenter, download_document, plain_text,
};

/// Delays after entering `Analyzing` at which checklist items light up.
pub const CHECKLIST_DELAYS_MS: [u64; 3] = [500, 1_500, 2_500];

/// Checklist item labels, in order.
pub const CHECKLIST_LABELS: [&str; 3] = [
    "Analyzing visual design",
    "Evaluating content structure",
    "Generating recommendations",
];

/// Opacity of a checklist item that has not lit up.
pub const DIMMED_OPACITY: f32 = 0.5;

/// Opacity of a lit checklist item.
pub const ACTIVE_OPACITY: f32 = 1.0;

/// Text shown next to the spinner.
pub const LOADING_TEXT: &str = "Analyzing your portfolio...";

/// Prefix of validation alerts.
pub const VALIDATION_ALERT_PREFIX: &str = "⚠️ Error: ";

/// Prefix of analysis failure alerts.
pub const ANALYSIS_ALERT_PREFIX: &str = "⚠️ Analysis Error: ";

/// Workflow states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Drop zone visible, waiting for a file.
    Idle,
    /// File accepted, request being built.
    Submitting,
    /// Request in flight; spinner and checklist visible.
    Analyzing,
    /// Feedback rendered.
    Complete,
}

/// One cosmetic progress item.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChecklistItem {
    /// Item text.
    pub label: &'static str,
    /// Current opacity.
    pub opacity: f32,
}

impl ChecklistItem {
    /// Returns `true` once the item has lit up.
    pub fn is_active(&self) -> bool {
        self.opacity >= ACTIVE_OPACITY
    }
}

/// Everything the page shows for the current state.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    /// Drop zone / file picker visible.
    pub drop_zone_visible: bool,
    /// Spinner, loading text, and checklist visible.
    pub loading_visible: bool,
    /// Checklist items.
    pub checklist: [ChecklistItem; 3],
    /// Result container visible.
    pub result_visible: bool,
    /// Feedback HTML inside the result container.
    pub feedback_html: String,
    /// File name held by the file input, if any.
    pub selected_file: Option<String>,
}

impl SessionView {
    fn idle() -> Self {
        Self {
            drop_zone_visible: true,
            loading_visible: false,
            checklist: dimmed_checklist(),
            result_visible: false,
            feedback_html: String::new(),
            selected_file: None,
        }
    }

    /// Text next to the spinner while loading.
    pub fn loading_text(&self) -> Option<&'static str> {
        self.loading_visible.then_some(LOADING_TEXT)
    }
}

fn dimmed_checklist() -> [ChecklistItem; 3] {
    CHECKLIST_LABELS.map(|label| ChecklistItem {
        label,
        opacity: DIMMED_OPACITY,
    })
}

/// Side effects requested by a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEffect {
    /// Show a blocking alert.
    Alert(String),
    /// Fire [`UploadSession::on_checklist_timer`] after `delay_ms`.
    ScheduleChecklist {
        /// Analysis round the timer belongs to.
        epoch: u64,
        /// Checklist index.
        step: usize,
        /// Delay from entering `Analyzing`.
        delay_ms: u64,
    },
    /// Drop pending timers of `epoch`.
    CancelChecklist {
        /// Analysis round to cancel.
        epoch: u64,
    },
    /// Best-effort persistence of finished feedback; failures are ignored.
    StoreAnalysis {
        /// Feedback HTML.
        html: String,
    },
}

/// Client-side upload state machine.
#[derive(Debug, Clone)]
pub struct UploadSession {
    state: SessionState,
    view: SessionView,
    epoch: u64,
}

impl UploadSession {
    /// Creates an idle session.
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            view: SessionView::idle(),
            epoch: 0,
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Current view.
    pub fn view(&self) -> &SessionView {
        &self.view
    }

    /// Current analysis round.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Accepts a picked or dropped file.
    ///
    /// The candidate should carry resolved dimensions for images; otherwise
    /// the header is decoded here.
    ///
    /// # Errors
    /// Returns [`SessionError::Busy`] unless idle, and
    /// [`SessionError::Rejected`] when validation fails (the session stays
    /// idle and the error's text is the alert to show).
    pub fn select_file(
        &mut self,
        candidate: UploadCandidate,
    ) -> Result<UploadCandidate, SessionError> {
        if self.state != SessionState::Idle {
            return Err(SessionError::Busy(self.state));
        }

        let verdict = validate(&candidate);
        if !verdict.is_valid {
            return Err(SessionError::Rejected {
                message: verdict.error_message.unwrap_or_default(),
            });
        }

        self.view.selected_file = Some(candidate.file_name.clone());
        self.state = SessionState::Submitting;
        Ok(candidate)
    }

    /// Marks the request as sent and starts the cosmetic checklist.
    ///
    /// # Errors
    /// Returns [`SessionError::InvalidTransition`] unless `Submitting`.
    pub fn begin_analysis(&mut self) -> Result<Vec<SessionEffect>, SessionError> {
        self.expect_state(SessionState::Submitting, "begin_analysis")?;

        self.epoch += 1;
        self.state = SessionState::Analyzing;
        self.view.drop_zone_visible = false;
        self.view.loading_visible = true;
        self.view.checklist = dimmed_checklist();
        self.view.result_visible = false;
        self.view.feedback_html.clear();

        let epoch = self.epoch;
        Ok(CHECKLIST_DELAYS_MS
            .iter()
            .enumerate()
            .map(|(step, delay_ms)| SessionEffect::ScheduleChecklist {
                epoch,
                step,
                delay_ms: *delay_ms,
            })
            .collect())
    }

    /// Lights one checklist item.
    ///
    /// Returns `false` (and changes nothing) for timers of an earlier round,
    /// timers arriving outside `Analyzing`, or unknown steps.
    pub fn on_checklist_timer(&mut self, epoch: u64, step: usize) -> bool {
        if self.state != SessionState::Analyzing || epoch != self.epoch {
            return false;
        }

        match self.view.checklist.get_mut(step) {
            Some(item) => {
                item.opacity = ACTIVE_OPACITY;
                true
            }
            None => false,
        }
    }

    /// Applies the network outcome.
    ///
    /// # Errors
    /// Returns [`SessionError::InvalidTransition`] unless `Analyzing`.
    pub fn on_response(
        &mut self,
        response: AnalysisResponse,
    ) -> Result<Vec<SessionEffect>, SessionError> {
        self.expect_state(SessionState::Analyzing, "on_response")?;

        let cancel = SessionEffect::CancelChecklist { epoch: self.epoch };
        match response {
            AnalysisResponse::Success(html) => {
                self.state = SessionState::Complete;
                self.view.loading_visible = false;
                self.view.result_visible = true;
                self.view.feedback_html = html.clone();
                self.view.selected_file = None;
                Ok(vec![cancel, SessionEffect::StoreAnalysis { html }])
            }
            AnalysisResponse::Failure(message) => {
                self.state = SessionState::Idle;
                self.view = SessionView::idle();
                Ok(vec![
                    cancel,
                    SessionEffect::Alert(format!("{ANALYSIS_ALERT_PREFIX}{message}")),
                ])
            }
        }
    }

    /// Starts over after a completed analysis.
    ///
    /// # Errors
    /// Returns [`SessionError::InvalidTransition`] unless `Complete`.
    pub fn reset(&mut self) -> Result<(), SessionError> {
        self.expect_state(SessionState::Complete, "reset")?;
        self.state = SessionState::Idle;
        self.view = SessionView::idle();
        Ok(())
    }

    fn expect_state(&self, expected: SessionState, event: &'static str) -> Result<(), SessionError> {
        if self.state != expected {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                event,
            });
        }
        Ok(())
    }
}

impl Default for UploadSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Session errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// A submission is already in progress or a result is showing.
    #[error("another analysis is in progress (state: {0:?})")]
    Busy(SessionState),
    /// Candidate failed validation.
    #[error("⚠️ Error: {message}")]
    Rejected {
        /// Validation message.
        message: String,
    },
    /// Event not legal in the current state.
    #[error("{event} is not valid in state {from:?}")]
    InvalidTransition {
        /// State when the event arrived.
        from: SessionState,
        /// Event name.
        event: &'static str,
    },
}
