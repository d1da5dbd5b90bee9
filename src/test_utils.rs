//! Scripted pipeline runtime for worker and controller tests

use crate::pipeline::{
    Device, Dtype, PipelineError, PipelineFactory, PipelineSpec, ProgressCallback,
    TranslateOptions, TranslationCandidate, TranslationPipeline,
};
use crate::protocol::{ProgressEvent, WorkerEvent};
use crate::worker::{BackendProfile, WorkerHandle, WorkerSettings};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// Artifact sizes the stub factory "downloads"
pub const ARTIFACTS: [(&str, u64); 3] = [
    ("config.json", 100),
    ("tokenizer.json", 400),
    ("onnx/encoder_model_quantized.onnx", 1000),
];

pub fn settings() -> WorkerSettings {
    WorkerSettings {
        model_id: "leks-forever/nllb-200-distilled-600M-v1".to_owned(),
        dtype: Dtype::Q8,
        primary: BackendProfile {
            device: Device::Wasm,
            max_new_tokens: None,
        },
        fallback: BackendProfile {
            device: Device::Cpu,
            max_new_tokens: Some(256),
        },
    }
}

pub fn candidates(text: &str) -> Vec<TranslationCandidate> {
    vec![TranslationCandidate {
        translation_text: text.to_owned(),
    }]
}

/// Pipeline that always gives the same answer and records its calls
pub struct StubPipeline {
    reply: Result<Vec<TranslationCandidate>, PipelineError>,
    calls: Mutex<Vec<(String, TranslateOptions)>>,
}

impl StubPipeline {
    pub fn replying(reply: Result<Vec<TranslationCandidate>, PipelineError>) -> Arc<Self> {
        Arc::new(Self {
            reply,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn last_options(&self) -> Option<TranslateOptions> {
        self.calls.lock().unwrap().last().map(|(_, options)| *options)
    }
}

#[async_trait]
impl TranslationPipeline for StubPipeline {
    async fn translate(
        &self,
        text: &str,
        options: TranslateOptions,
    ) -> Result<Vec<TranslationCandidate>, PipelineError> {
        self.calls.lock().unwrap().push((text.to_owned(), options));
        self.reply.clone()
    }
}

/// Factory emitting `initiate → progress → done` for every artifact
///
/// With a gate, instantiation stops after the `initiate` events until the
/// gate is notified.
#[derive(Default)]
pub struct StubFactory {
    gate: Option<Arc<Notify>>,
    pipelines: HashMap<Device, Arc<StubPipeline>>,
    load_errors: HashMap<Device, PipelineError>,
    specs: Mutex<Vec<PipelineSpec>>,
}

impl StubFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_gate(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn with_pipeline(mut self, device: Device, pipeline: Arc<StubPipeline>) -> Self {
        self.pipelines.insert(device, pipeline);
        self
    }

    pub fn with_load_error(mut self, device: Device, error: PipelineError) -> Self {
        self.load_errors.insert(device, error);
        self
    }

    pub fn instantiations(&self) -> usize {
        self.specs.lock().unwrap().len()
    }

    pub fn devices(&self) -> Vec<Device> {
        self.specs.lock().unwrap().iter().map(|s| s.device).collect()
    }
}

#[async_trait]
impl PipelineFactory for StubFactory {
    async fn instantiate(
        &self,
        spec: &PipelineSpec,
        progress: ProgressCallback,
    ) -> Result<Arc<dyn TranslationPipeline>, PipelineError> {
        self.specs.lock().unwrap().push(spec.clone());

        for (file, _) in ARTIFACTS {
            progress(ProgressEvent::initiate(file));
        }
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        for (file, size) in ARTIFACTS {
            progress(ProgressEvent::progress(file, size / 2, Some(size)));
            progress(ProgressEvent::progress(file, size, Some(size)));
            progress(ProgressEvent::done(file, Some(size)));
        }

        if let Some(err) = self.load_errors.get(&spec.device) {
            return Err(err.clone());
        }
        self.pipelines
            .get(&spec.device)
            .map(|p| Arc::clone(p) as Arc<dyn TranslationPipeline>)
            .ok_or_else(|| PipelineError::Message(format!("no stub pipeline for {}", spec.device)))
    }
}

/// Drain progress events until a `ready`, `complete` or `error` arrives
pub async fn collect_until_terminal(worker: &mut WorkerHandle) -> (Vec<ProgressEvent>, WorkerEvent) {
    let mut progress = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), worker.recv())
            .await
            .expect("timed out waiting for worker event")
            .expect("worker stopped");
        match event {
            WorkerEvent::Progress { progress: p } => progress.push(p),
            terminal => return (progress, terminal),
        }
    }
}
