use crate::language::LanguageTag;
use crate::pipeline::hub::HubSettings;
use crate::pipeline::{Device, Dtype};
use crate::worker::{BackendProfile, WorkerSettings};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Application configuration, read from `~/.lezgi-translator.toml`
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Model artifacts
    pub model: ModelConfig,
    /// Inference runtime and backends
    pub runtime: RuntimeConfig,
    /// Initial language pair
    pub languages: LanguagesConfig,
    /// Logging
    pub telemetry: TelemetryConfig,
}

/// Which model to load and where its artifacts live
#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    /// Model repository identifier
    pub id: String,
    /// Weight precision
    pub dtype: Dtype,
    /// Model hub base URL
    pub hub_url: String,
    /// Local artifact cache (`~` expanded)
    pub cache_dir: String,
    /// Artifact paths inside the repository; `{suffix}` becomes the dtype suffix
    pub artifacts: Vec<String>,
    /// External weight files fetched only when published (unquantized exports)
    #[serde(default)]
    pub optional_artifacts: Vec<String>,
}

/// Inference runtime endpoint and backend preferences
#[derive(Debug, Deserialize, Clone)]
pub struct RuntimeConfig {
    /// Base URL of the inference runtime
    pub endpoint: String,
    /// Backend tried first
    pub primary_device: Device,
    /// Backend used once after a backend failure
    pub fallback_device: Device,
    /// Output token bound on the fallback backend
    pub fallback_max_new_tokens: u32,
}

/// Language pair shown at startup
#[derive(Debug, Deserialize, Clone)]
pub struct LanguagesConfig {
    /// Source language
    pub source: LanguageTag,
    /// Target language
    pub target: LanguageTag,
}

/// Logging destination and verbosity
#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryConfig {
    /// Write logs to `log_path` instead of stdout
    pub enabled: bool,
    /// Log file (`~` expanded)
    pub log_path: String,
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,
}

const DEFAULT_CONFIG: &str = r#"[model]
id = "leks-forever/nllb-200-distilled-600M-v1"
dtype = "q8"
hub_url = "https://huggingface.co"
cache_dir = "~/.lezgi-translator/models"
artifacts = [
    "config.json",
    "generation_config.json",
    "tokenizer.json",
    "tokenizer_config.json",
    "onnx/encoder_model{suffix}.onnx",
    "onnx/decoder_model_merged{suffix}.onnx",
]
# Weights of large fp32 exports live next to the graph; quantized exports have none
optional_artifacts = [
    "onnx/encoder_model{suffix}.onnx_data",
    "onnx/decoder_model_merged{suffix}.onnx_data",
]

[runtime]
endpoint = "http://127.0.0.1:8765"
primary_device = "wasm"
fallback_device = "cpu"
fallback_max_new_tokens = 256

[languages]
source = "rus_Cyrl"
target = "lez_Cyrl"

[telemetry]
enabled = false
log_path = "~/.lezgi-translator/translator.log"
level = "info"
"#;

impl Config {
    /// Load config from ~/.lezgi-translator.toml, writing the default on first run
    ///
    /// # Errors
    /// Returns error if the file cannot be created, read or parsed
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load config from an explicit path, writing the default if it is missing
    ///
    /// # Errors
    /// Returns error if the file cannot be created, read or parsed
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            Self::create_default(config_path).context("failed to create default config")?;
        }

        let contents = fs::read_to_string(config_path).context("failed to read config file")?;

        Self::parse(&contents)
    }

    /// Parse config TOML
    ///
    /// # Errors
    /// Returns error if the TOML is invalid or fields are missing
    pub fn parse(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("failed to parse config TOML")
    }

    fn config_path() -> Result<PathBuf> {
        let home = std::env::var("HOME").context("HOME environment variable not set")?;
        Ok(PathBuf::from(home).join(".lezgi-translator.toml"))
    }

    fn create_default(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("failed to create config directory")?;
        }
        fs::write(path, DEFAULT_CONFIG).context("failed to write default config")?;
        tracing::info!(path = %path.display(), "wrote default config");
        Ok(())
    }

    /// Expand ~ in paths to home directory
    ///
    /// # Errors
    /// Returns error if the path starts with `~/` and `HOME` is unset
    pub fn expand_path(path: &str) -> Result<PathBuf> {
        if let Some(stripped) = path.strip_prefix("~/") {
            let home = std::env::var("HOME").context("HOME environment variable not set")?;
            Ok(PathBuf::from(home).join(stripped))
        } else {
            Ok(PathBuf::from(path))
        }
    }

    /// Worker settings derived from `[model]` and `[runtime]`
    #[must_use]
    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            model_id: self.model.id.clone(),
            dtype: self.model.dtype,
            primary: BackendProfile {
                device: self.runtime.primary_device,
                max_new_tokens: None,
            },
            fallback: BackendProfile {
                device: self.runtime.fallback_device,
                max_new_tokens: Some(self.runtime.fallback_max_new_tokens),
            },
        }
    }

    /// Hub download settings
    ///
    /// # Errors
    /// Returns error if the cache directory cannot be expanded
    pub fn hub_settings(&self) -> Result<HubSettings> {
        Ok(HubSettings {
            hub_url: self.model.hub_url.clone(),
            cache_dir: Self::expand_path(&self.model.cache_dir)?,
            artifacts: self.model.artifacts.clone(),
            optional_artifacts: self.model.optional_artifacts.clone(),
            endpoint: self.runtime.endpoint.clone(),
        })
    }
}
