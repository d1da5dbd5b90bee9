/// Model hub downloads and the HTTP inference runtime
pub mod hub;

pub use hub::HubPipelineFactory;

use crate::language::LanguageTag;
use crate::protocol::ProgressEvent;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Receives per-artifact download notifications while a pipeline loads
pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Execution backend the runtime should run the model on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    /// Portable CPU backend (WebAssembly build of the runtime)
    Wasm,
    /// GPU backend
    WebGpu,
    /// Native CPU backend
    Cpu,
}

impl Device {
    /// Name passed to the runtime
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Wasm => "wasm",
            Self::WebGpu => "webgpu",
            Self::Cpu => "cpu",
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Numeric precision of the model weights
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dtype {
    /// Full precision
    Fp32,
    /// Half precision
    Fp16,
    /// int8 dynamic quantization
    Q8,
    /// 4-bit quantization
    Q4,
}

impl Dtype {
    /// Name passed to the runtime
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fp32 => "fp32",
            Self::Fp16 => "fp16",
            Self::Q8 => "q8",
            Self::Q4 => "q4",
        }
    }

    /// Suffix of the ONNX graph files exported at this precision
    #[must_use]
    pub const fn file_suffix(self) -> &'static str {
        match self {
            Self::Fp32 => "",
            Self::Fp16 => "_fp16",
            Self::Q8 => "_quantized",
            Self::Q4 => "_q4",
        }
    }
}

/// Kind of pipeline to instantiate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    /// Sequence-to-sequence translation
    Translation,
}

impl Task {
    /// Runtime task name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Translation => "translation",
        }
    }
}

/// Everything the runtime needs to build a pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSpec {
    /// Pipeline kind
    pub task: Task,
    /// Model repository identifier
    pub model_id: String,
    /// Weight precision
    pub dtype: Dtype,
    /// Execution backend
    pub device: Device,
}

/// Per-call generation options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslateOptions {
    /// Source language
    pub src_lang: LanguageTag,
    /// Target language
    pub tgt_lang: LanguageTag,
    /// Upper bound on generated tokens (runtime default when `None`)
    pub max_new_tokens: Option<u32>,
}

/// One output candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationCandidate {
    /// Translated text
    pub translation_text: String,
}

/// Failure reported by the runtime
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    /// Failure with a descriptive message
    #[error("{0}")]
    Message(String),

    /// Failure that carried no usable message
    #[error("unknown pipeline failure")]
    Opaque,
}

impl PipelineError {
    /// Message text, if the failure carried one
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Message(msg) => Some(msg),
            Self::Opaque => None,
        }
    }
}

/// An instantiated translation pipeline (the model handle)
#[async_trait]
pub trait TranslationPipeline: Send + Sync {
    /// Translate `text`, returning candidates best-first
    ///
    /// # Errors
    /// Returns error if inference fails
    async fn translate(
        &self,
        text: &str,
        options: TranslateOptions,
    ) -> Result<Vec<TranslationCandidate>, PipelineError>;
}

/// Builds pipelines, reporting artifact downloads through `progress`
#[async_trait]
pub trait PipelineFactory: Send + Sync {
    /// Download (if needed) and instantiate a pipeline
    ///
    /// # Errors
    /// Returns error if any artifact cannot be fetched or the runtime rejects the model
    async fn instantiate(
        &self,
        spec: &PipelineSpec,
        progress: ProgressCallback,
    ) -> Result<Arc<dyn TranslationPipeline>, PipelineError>;
}
