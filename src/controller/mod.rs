//! Foreground controller for the inference worker
//!
//! Owns the worker handle and every piece of state the front end renders:
//! load status, per-artifact progress, the translating flag and the text
//! panes. The model itself is never touched from here.

/// Download progress aggregation
pub mod progress;

pub use progress::{ProgressRecord, ProgressTracker};

use crate::language::LanguageTag;
use crate::protocol::{TranslationRequest, WorkerEvent, WorkerRequest};
use crate::worker::{WorkerHandle, WorkerSpawner};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Model availability as shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    /// Nothing loaded, nothing downloading
    Idle,
    /// Explicit load in progress
    Downloading,
    /// Model loaded in the worker
    Ready,
}

/// Why an action was not sent to the worker
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControllerError {
    /// Source text is empty or whitespace
    #[error("nothing to translate")]
    EmptySource,

    /// No running worker
    #[error("translation worker is not running")]
    WorkerUnavailable,

    /// A translation is still outstanding
    #[error("a translation is already in progress")]
    Busy,
}

/// Caller-side owner of the inference worker
pub struct WorkerController {
    spawner: WorkerSpawner,
    worker: Option<WorkerHandle>,
    status: LoadStatus,
    translating: bool,
    progress: ProgressTracker,
    source_lang: LanguageTag,
    target_lang: LanguageTag,
    source_text: String,
    target_text: String,
    last_error: Option<String>,
}

impl WorkerController {
    /// Controller with no worker yet; call [`Self::initialize`] to start one
    #[must_use]
    pub fn new(spawner: WorkerSpawner, source_lang: LanguageTag, target_lang: LanguageTag) -> Self {
        Self {
            spawner,
            worker: None,
            status: LoadStatus::Idle,
            translating: false,
            progress: ProgressTracker::default(),
            source_lang,
            target_lang,
            source_text: String::new(),
            target_text: String::new(),
            last_error: None,
        }
    }

    /// Start the worker if none is running
    pub fn initialize(&mut self) {
        if self.worker.is_none() {
            self.worker = Some(self.spawner.spawn());
        }
    }

    /// Discard the worker (and its model) and start a fresh one
    pub fn restart(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.terminate();
        }
        self.status = LoadStatus::Idle;
        self.translating = false;
        self.progress.clear();
        self.worker = Some(self.spawner.spawn());
        info!("worker restarted");
    }

    /// Stop the worker without starting another
    pub fn shutdown(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.terminate();
        }
        self.translating = false;
        if self.status == LoadStatus::Downloading {
            self.status = LoadStatus::Idle;
        }
    }

    /// Ask the worker to load the model
    ///
    /// # Errors
    /// Returns error if no worker is running
    pub fn request_load(&mut self) -> Result<(), ControllerError> {
        let worker = self.worker.as_ref().ok_or(ControllerError::WorkerUnavailable)?;
        if !worker.send(WorkerRequest::Load) {
            return Err(ControllerError::WorkerUnavailable);
        }

        info!("model load requested");
        self.status = LoadStatus::Downloading;
        self.progress.clear();
        self.last_error = None;
        Ok(())
    }

    /// Abandon an in-progress load
    ///
    /// The runtime cannot stop a download midway, so the worker is replaced
    /// wholesale; partial downloads are abandoned, not resumed.
    pub fn cancel_load(&mut self) {
        info!(
            artifacts = self.progress.len(),
            percent = self.progress.overall_percent(),
            "cancelling model load"
        );
        self.restart();
    }

    /// Send the current source text for translation
    ///
    /// # Errors
    /// Returns error if the text is blank, a translation is outstanding, or no worker is running
    pub fn request_translation(&mut self) -> Result<(), ControllerError> {
        if self.source_text.trim().is_empty() {
            return Err(ControllerError::EmptySource);
        }
        if self.translating {
            return Err(ControllerError::Busy);
        }
        let worker = self.worker.as_ref().ok_or(ControllerError::WorkerUnavailable)?;

        let request = TranslationRequest {
            text: self.source_text.clone(),
            src_lang: self.source_lang,
            tgt_lang: self.target_lang,
        };
        if !worker.send(WorkerRequest::Translate(request)) {
            return Err(ControllerError::WorkerUnavailable);
        }

        debug!(src = %self.source_lang, tgt = %self.target_lang, "translation requested");
        self.translating = true;
        self.last_error = None;
        Ok(())
    }

    /// Exchange languages and text panes
    pub fn swap_languages(&mut self) {
        std::mem::swap(&mut self.source_lang, &mut self.target_lang);
        std::mem::swap(&mut self.source_text, &mut self.target_text);
    }

    /// Update state from one worker event
    pub fn handle_event(&mut self, event: &WorkerEvent) {
        match event {
            WorkerEvent::Progress { progress } => self.progress.apply(progress),
            WorkerEvent::Ready => {
                info!("model ready");
                self.status = LoadStatus::Ready;
            }
            WorkerEvent::Complete { output } => {
                self.target_text.clone_from(output);
                self.translating = false;
                self.status = LoadStatus::Ready;
            }
            WorkerEvent::Error { error } => {
                warn!(error = %error, status = ?self.status, "worker reported error");
                self.translating = false;
                if self.status == LoadStatus::Downloading {
                    self.status = LoadStatus::Idle;
                }
                self.last_error = Some(error.clone());
            }
        }
    }

    /// Wait for the next worker event and apply it
    ///
    /// Returns `None` when no worker is running or it has stopped.
    pub async fn process_next(&mut self) -> Option<WorkerEvent> {
        let event = self.worker.as_mut()?.recv().await?;
        self.handle_event(&event);
        Some(event)
    }

    /// Replace the source text
    pub fn set_source_text(&mut self, text: impl Into<String>) {
        self.source_text = text.into();
    }

    /// Set both languages
    pub fn set_languages(&mut self, source: LanguageTag, target: LanguageTag) {
        self.source_lang = source;
        self.target_lang = target;
    }

    /// Current load status
    #[must_use]
    pub const fn status(&self) -> LoadStatus {
        self.status
    }

    /// A translation is outstanding
    #[must_use]
    pub const fn is_translating(&self) -> bool {
        self.translating
    }

    /// A worker is running
    #[must_use]
    pub const fn has_worker(&self) -> bool {
        self.worker.is_some()
    }

    /// Per-artifact download progress
    #[must_use]
    pub const fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    /// Overall download percentage
    #[must_use]
    pub fn overall_percent(&self) -> f64 {
        self.progress.overall_percent()
    }

    /// Source pane
    #[must_use]
    pub fn source_text(&self) -> &str {
        &self.source_text
    }

    /// Target pane
    #[must_use]
    pub fn target_text(&self) -> &str {
        &self.target_text
    }

    /// Source language
    #[must_use]
    pub const fn source_lang(&self) -> LanguageTag {
        self.source_lang
    }

    /// Target language
    #[must_use]
    pub const fn target_lang(&self) -> LanguageTag {
        self.target_lang
    }

    /// Most recent error, cleared by the next request
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}
