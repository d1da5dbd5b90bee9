//! Background inference worker
//!
//! The worker owns the model handle and is the only place the pipeline is
//! touched. It talks to the foreground exclusively through two channels:
//! [`WorkerRequest`]s in, [`WorkerEvent`]s out. Messages are accepted while a
//! load or translation is running, so an explicit `load` can attach to an
//! implicit one and a second translation can be turned away.
//!
//! There is no cooperative cancellation: dropping the [`WorkerHandle`] aborts
//! the task, and any in-flight download is abandoned with it.

/// Failure classification for the fallback decision
pub mod classify;
/// Model handle lifecycle
pub mod state;

pub use classify::{ErrorClassifier, FailureKind, SignatureClassifier};
pub use state::{Attempt, ModelState, Phase};

use crate::pipeline::{
    Device, Dtype, PipelineError, PipelineFactory, PipelineSpec, ProgressCallback, Task,
    TranslateOptions, TranslationCandidate, TranslationPipeline,
};
use crate::protocol::{ProgressEvent, TranslationRequest, WorkerEvent, WorkerRequest};
use futures_util::future::BoxFuture;
use futures_util::stream::FuturesUnordered;
use futures_util::{FutureExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const LOAD_FAILED: &str = "failed to load translation model";
const TRANSLATE_FAILED: &str = "translation failed";
const FALLBACK_FAILED: &str = "translation failed on fallback backend";
const EMPTY_OUTPUT: &str = "translation produced no output";
const BUSY: &str = "a translation is already in progress";

/// Execution settings for one backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendProfile {
    /// Device to run on
    pub device: Device,
    /// Output length bound passed with every translation
    pub max_new_tokens: Option<u32>,
}

/// Fixed model parameters for a worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    /// Model repository identifier
    pub model_id: String,
    /// Weight precision
    pub dtype: Dtype,
    /// Backend used for fresh loads
    pub primary: BackendProfile,
    /// Backend used once after an eligible failure
    pub fallback: BackendProfile,
}

impl WorkerSettings {
    /// Backend profile for an attempt
    #[must_use]
    pub const fn profile(&self, attempt: Attempt) -> BackendProfile {
        match attempt {
            Attempt::Primary => self.primary,
            Attempt::Fallback => self.fallback,
        }
    }

    /// Pipeline spec for an attempt
    #[must_use]
    pub fn spec(&self, attempt: Attempt) -> PipelineSpec {
        PipelineSpec {
            task: Task::Translation,
            model_id: self.model_id.clone(),
            dtype: self.dtype,
            device: self.profile(attempt).device,
        }
    }
}

/// Foreground side of a running worker
///
/// Dropping the handle terminates the worker.
pub struct WorkerHandle {
    requests: mpsc::UnboundedSender<WorkerRequest>,
    events: mpsc::UnboundedReceiver<WorkerEvent>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Post a request. Returns false if the worker has stopped.
    pub fn send(&self, request: WorkerRequest) -> bool {
        self.requests.send(request).is_ok()
    }

    /// Next event, or `None` once the worker has stopped and the queue is drained
    pub async fn recv(&mut self) -> Option<WorkerEvent> {
        self.events.recv().await
    }

    /// Next already-queued event, without waiting
    pub fn try_recv(&mut self) -> Option<WorkerEvent> {
        self.events.try_recv().ok()
    }

    /// Stop the worker, discarding its model handle and any in-flight work
    pub fn terminate(self) {
        tracing::info!("terminating inference worker");
        drop(self);
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Creates workers sharing one factory, classifier and settings
#[derive(Clone)]
pub struct WorkerSpawner {
    factory: Arc<dyn PipelineFactory>,
    classifier: Arc<dyn ErrorClassifier>,
    settings: Arc<WorkerSettings>,
}

impl WorkerSpawner {
    /// Spawner for the given runtime seam
    #[must_use]
    pub fn new(
        factory: Arc<dyn PipelineFactory>,
        classifier: Arc<dyn ErrorClassifier>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            factory,
            classifier,
            settings: Arc::new(settings),
        }
    }

    /// Start a fresh worker task (must be called inside a tokio runtime)
    #[must_use]
    pub fn spawn(&self) -> WorkerHandle {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let worker = InferenceWorker::new(
            Arc::clone(&self.factory),
            Arc::clone(&self.classifier),
            Arc::clone(&self.settings),
            event_tx,
        );
        let task = tokio::spawn(worker.run(request_rx));

        tracing::info!(model = %self.settings.model_id, "inference worker started");

        WorkerHandle {
            requests: request_tx,
            events: event_rx,
            task,
        }
    }
}

/// A translation waiting for, or running against, the model
#[derive(Debug)]
struct Job {
    request: TranslationRequest,
    /// Already retried on the fallback backend
    retried: bool,
}

enum Outcome {
    Loaded {
        attempt: Attempt,
        result: Result<Arc<dyn TranslationPipeline>, PipelineError>,
    },
    Translated {
        result: Result<Vec<TranslationCandidate>, PipelineError>,
    },
}

/// Owns one model handle and serves requests against it
pub struct InferenceWorker {
    factory: Arc<dyn PipelineFactory>,
    classifier: Arc<dyn ErrorClassifier>,
    settings: Arc<WorkerSettings>,
    events: mpsc::UnboundedSender<WorkerEvent>,
    state: ModelState,
    /// An explicit load is waiting for the current load to finish
    announce_ready: bool,
    /// Translation waiting for the model
    pending: Option<Job>,
    /// Translation running against the model
    in_flight: Option<Job>,
    tasks: FuturesUnordered<BoxFuture<'static, Outcome>>,
}

impl InferenceWorker {
    /// Worker with an unloaded model
    #[must_use]
    pub fn new(
        factory: Arc<dyn PipelineFactory>,
        classifier: Arc<dyn ErrorClassifier>,
        settings: Arc<WorkerSettings>,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Self {
        Self {
            factory,
            classifier,
            settings,
            events,
            state: ModelState::default(),
            announce_ready: false,
            pending: None,
            in_flight: None,
            tasks: FuturesUnordered::new(),
        }
    }

    /// Serve requests until the request channel closes
    pub async fn run(mut self, mut requests: mpsc::UnboundedReceiver<WorkerRequest>) {
        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(request) => self.accept(request),
                    None => break,
                },
                Some(outcome) = self.tasks.next(), if !self.tasks.is_empty() => {
                    self.settle(outcome);
                }
            }
        }
        tracing::debug!("request channel closed, worker exiting");
    }

    fn emit(&self, event: WorkerEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("event receiver dropped");
        }
    }

    fn emit_error(&self, message: String) {
        tracing::error!(error = %message, "worker error");
        self.emit(WorkerEvent::Error { error: message });
    }

    fn accept(&mut self, request: WorkerRequest) {
        match request {
            WorkerRequest::Load => match self.state.phase() {
                Phase::Ready => self.emit(WorkerEvent::Ready),
                Phase::Loading => {
                    tracing::debug!("load requested while loading, attaching to in-flight load");
                    self.announce_ready = true;
                }
                Phase::Unloaded => {
                    self.announce_ready = true;
                    self.start_load(Attempt::Primary);
                }
            },
            WorkerRequest::Translate(request) => {
                if self.pending.is_some() || self.in_flight.is_some() {
                    tracing::warn!("translation rejected: another one is in progress");
                    self.emit_error(BUSY.to_owned());
                    return;
                }

                let job = Job {
                    request,
                    retried: false,
                };
                if let Some((pipeline, attempt)) = self.state.pipeline() {
                    self.start_translation(pipeline, attempt, job);
                } else {
                    tracing::debug!("model not ready, translation queued behind load");
                    self.pending = Some(job);
                    self.start_load(Attempt::Primary);
                }
            }
        }
    }

    /// Begin instantiation unless a load is already in flight or done
    fn start_load(&mut self, attempt: Attempt) {
        if !self.state.begin_load(attempt) {
            return;
        }

        let spec = self.settings.spec(attempt);
        tracing::info!(
            model = %spec.model_id,
            device = %spec.device,
            dtype = spec.dtype.as_str(),
            ?attempt,
            "loading model"
        );

        let factory = Arc::clone(&self.factory);
        let events = self.events.clone();
        let progress: ProgressCallback = Arc::new(move |progress: ProgressEvent| {
            // Receiver gone means the foreground stopped listening; nothing to do
            let _ = events.send(WorkerEvent::Progress { progress });
        });

        self.tasks.push(
            async move {
                let result = factory.instantiate(&spec, progress).await;
                Outcome::Loaded { attempt, result }
            }
            .boxed(),
        );
    }

    fn start_translation(
        &mut self,
        pipeline: Arc<dyn TranslationPipeline>,
        attempt: Attempt,
        job: Job,
    ) {
        let options = TranslateOptions {
            src_lang: job.request.src_lang,
            tgt_lang: job.request.tgt_lang,
            max_new_tokens: self.settings.profile(attempt).max_new_tokens,
        };
        let text = job.request.text.clone();

        tracing::debug!(
            chars = text.chars().count(),
            src = %options.src_lang,
            tgt = %options.tgt_lang,
            ?attempt,
            "translating"
        );

        self.in_flight = Some(job);
        self.tasks.push(
            async move {
                let result = pipeline.translate(&text, options).await;
                Outcome::Translated { result }
            }
            .boxed(),
        );
    }

    fn settle(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Loaded { attempt, result } => self.settle_load(attempt, result),
            Outcome::Translated { result } => self.settle_translation(result),
        }
    }

    fn settle_load(
        &mut self,
        attempt: Attempt,
        result: Result<Arc<dyn TranslationPipeline>, PipelineError>,
    ) {
        match result {
            Ok(pipeline) => {
                self.state.finish_load(pipeline);
                tracing::info!(?attempt, "model ready");

                if std::mem::take(&mut self.announce_ready) {
                    self.emit(WorkerEvent::Ready);
                }
                if let Some(job) = self.pending.take() {
                    if let Some((pipeline, attempt)) = self.state.pipeline() {
                        self.start_translation(pipeline, attempt, job);
                    }
                }
            }
            Err(err) => {
                self.state.fail_load();
                let job = match self.pending.take() {
                    Some(job) if !job.retried => {
                        let kind = self.classifier.classify(&err);
                        if kind.is_fallback_eligible() {
                            tracing::warn!(
                                error = %err,
                                ?kind,
                                fallback = %self.settings.fallback.device,
                                "model load failed, retrying translation on fallback"
                            );
                            self.pending = Some(Job {
                                request: job.request,
                                retried: true,
                            });
                            self.start_load(Attempt::Fallback);
                            return;
                        }
                        Some(job)
                    }
                    other => other,
                };

                self.announce_ready = false;
                let message = match attempt {
                    Attempt::Fallback => err.message().unwrap_or(FALLBACK_FAILED),
                    Attempt::Primary => err.message().unwrap_or(LOAD_FAILED),
                };
                tracing::warn!(?attempt, queued_translation = job.is_some(), "model load failed");
                self.emit_error(message.to_owned());
            }
        }
    }

    fn settle_translation(&mut self, result: Result<Vec<TranslationCandidate>, PipelineError>) {
        let Some(job) = self.in_flight.take() else {
            tracing::warn!("translation finished with no job in flight");
            return;
        };

        let err = match result {
            Ok(candidates) => {
                match candidates.into_iter().next() {
                    Some(first) => {
                        tracing::info!(retried = job.retried, "translation complete");
                        self.emit(WorkerEvent::Complete {
                            output: first.translation_text,
                        });
                    }
                    None => self.emit_error(EMPTY_OUTPUT.to_owned()),
                }
                return;
            }
            Err(err) => err,
        };

        if job.retried {
            self.emit_error(err.message().unwrap_or(FALLBACK_FAILED).to_owned());
            return;
        }

        let kind = self.classifier.classify(&err);
        if !kind.is_fallback_eligible() {
            self.emit_error(err.message().unwrap_or(TRANSLATE_FAILED).to_owned());
            return;
        }

        tracing::warn!(
            error = %err,
            ?kind,
            fallback = %self.settings.fallback.device,
            "primary backend failed, retrying on fallback"
        );
        self.state.reset();
        self.pending = Some(Job {
            request: job.request,
            retried: true,
        });
        self.start_load(Attempt::Fallback);
    }
}
