//! Message protocol between the controller and the inference worker
//!
//! In-process the messages travel over tokio channels as plain enums. The
//! JSON form (used by `--stdio`) is kept wire-compatible with the browser
//! worker protocol:
//!
//! - requests: `{"type":"load"}` or `{"text":..,"src_lang":..,"tgt_lang":..}`
//! - events: `{"status":"progress"|"ready"|"complete"|"error", ..}`

use crate::language::LanguageTag;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors decoding or encoding protocol messages
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Request carried a `type` other than `load`
    #[error("unknown request type: {0}")]
    UnknownType(String),

    /// Translate request is missing a required field
    #[error("translate request missing field `{0}`")]
    MissingField(&'static str),

    /// Malformed JSON
    #[error("invalid message json: {0}")]
    Json(#[from] serde_json::Error),
}

/// One translation to perform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationRequest {
    /// Source text
    pub text: String,
    /// Language of `text`
    pub src_lang: LanguageTag,
    /// Language to translate into
    pub tgt_lang: LanguageTag,
}

/// Foreground → worker message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawRequest", into = "RawRequest")]
pub enum WorkerRequest {
    /// Explicitly load the model and report `ready`
    Load,
    /// Translate text, loading the model first if needed
    Translate(TranslationRequest),
}

#[derive(Serialize, Deserialize)]
struct RawRequest {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    src_lang: Option<LanguageTag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tgt_lang: Option<LanguageTag>,
}

impl TryFrom<RawRequest> for WorkerRequest {
    type Error = ProtocolError;

    fn try_from(raw: RawRequest) -> Result<Self, Self::Error> {
        match raw.kind.as_deref() {
            Some("load") => Ok(Self::Load),
            Some(other) => Err(ProtocolError::UnknownType(other.to_owned())),
            None => Ok(Self::Translate(TranslationRequest {
                text: raw.text.ok_or(ProtocolError::MissingField("text"))?,
                src_lang: raw.src_lang.ok_or(ProtocolError::MissingField("src_lang"))?,
                tgt_lang: raw.tgt_lang.ok_or(ProtocolError::MissingField("tgt_lang"))?,
            })),
        }
    }
}

impl From<WorkerRequest> for RawRequest {
    fn from(request: WorkerRequest) -> Self {
        match request {
            WorkerRequest::Load => Self {
                kind: Some("load".to_owned()),
                text: None,
                src_lang: None,
                tgt_lang: None,
            },
            WorkerRequest::Translate(req) => Self {
                kind: None,
                text: Some(req.text),
                src_lang: Some(req.src_lang),
                tgt_lang: Some(req.tgt_lang),
            },
        }
    }
}

impl WorkerRequest {
    /// Decode a request from its JSON form
    ///
    /// # Errors
    /// Returns error if the JSON is malformed or names an unknown request type
    pub fn from_json(json: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Phase of a single artifact download
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    /// Download of the artifact started
    Initiate,
    /// Bytes arrived
    Progress,
    /// Artifact fully available
    Done,
    /// Runtime finished with the artifact
    Ready,
}

/// Per-artifact download notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Artifact path within the model repository
    pub file: String,
    /// Download phase
    pub status: ProgressStatus,
    /// Model identifier, when the runtime reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Percent complete (0-100)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    /// Bytes received so far
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loaded: Option<u64>,
    /// Total bytes, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

impl ProgressEvent {
    /// Download of `file` started
    #[must_use]
    pub fn initiate(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            status: ProgressStatus::Initiate,
            name: None,
            progress: None,
            loaded: None,
            total: None,
        }
    }

    /// `loaded` bytes of `file` received, out of `total` if known
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn progress(file: impl Into<String>, loaded: u64, total: Option<u64>) -> Self {
        let percent = total
            .filter(|&t| t > 0)
            .map(|t| (loaded as f64 / t as f64 * 100.0).min(100.0));
        Self {
            file: file.into(),
            status: ProgressStatus::Progress,
            name: None,
            progress: percent,
            loaded: Some(loaded),
            total,
        }
    }

    /// `file` is fully available
    #[must_use]
    pub fn done(file: impl Into<String>, total: Option<u64>) -> Self {
        Self {
            file: file.into(),
            status: ProgressStatus::Done,
            name: None,
            progress: Some(100.0),
            loaded: total,
            total,
        }
    }

    /// Attach the model identifier
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Worker → foreground message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum WorkerEvent {
    /// Download progress for one artifact
    Progress {
        /// The artifact notification
        progress: ProgressEvent,
    },
    /// Explicit load finished
    Ready,
    /// Translation finished
    Complete {
        /// Translated text of the first candidate
        output: String,
    },
    /// Load or translation failed
    Error {
        /// Human-readable failure description
        error: String,
    },
}

impl WorkerEvent {
    /// Encode the event as a single JSON line
    ///
    /// # Errors
    /// Returns error if serialization fails
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}
