use super::{
    PipelineError, PipelineFactory, PipelineSpec, ProgressCallback, TranslateOptions,
    TranslationCandidate, TranslationPipeline,
};
use crate::protocol::ProgressEvent;
use anyhow::Context;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;

/// Placeholder in artifact names replaced by the dtype file suffix
const SUFFIX_PLACEHOLDER: &str = "{suffix}";

/// Minimum spacing between `progress` notifications for one artifact
const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Where artifacts come from and where inference runs
#[derive(Debug, Clone)]
pub struct HubSettings {
    /// Model hub base URL, e.g. `https://huggingface.co`
    pub hub_url: String,
    /// Local artifact cache root
    pub cache_dir: PathBuf,
    /// Artifact paths inside the model repository (may contain `{suffix}`)
    pub artifacts: Vec<String>,
    /// Artifacts fetched when the repository has them, skipped on 404
    pub optional_artifacts: Vec<String>,
    /// Base URL of the inference runtime
    pub endpoint: String,
}

/// Downloads model artifacts from the hub and binds them to the inference runtime
pub struct HubPipelineFactory {
    client: Client,
    settings: HubSettings,
}

impl HubPipelineFactory {
    /// Creates a factory with its own HTTP client
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built
    pub fn new(settings: HubSettings) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("failed to build http client")?;
        Ok(Self { client, settings })
    }

    /// Artifact paths for the given spec, with the dtype suffix applied
    #[must_use]
    pub fn resolve_artifacts(&self, spec: &PipelineSpec) -> Vec<String> {
        resolve_artifacts(&self.settings.artifacts, spec)
    }

    fn model_dir(&self, model_id: &str) -> PathBuf {
        self.settings.cache_dir.join(model_id)
    }

    fn artifact_url(&self, model_id: &str, file: &str) -> String {
        format!(
            "{}/{}/resolve/main/{}",
            self.settings.hub_url.trim_end_matches('/'),
            model_id,
            file
        )
    }
}

fn resolve_artifacts(artifacts: &[String], spec: &PipelineSpec) -> Vec<String> {
    artifacts
        .iter()
        .map(|name| name.replace(SUFFIX_PLACEHOLDER, spec.dtype.file_suffix()))
        .collect()
}

#[async_trait]
impl PipelineFactory for HubPipelineFactory {
    async fn instantiate(
        &self,
        spec: &PipelineSpec,
        progress: ProgressCallback,
    ) -> Result<Arc<dyn TranslationPipeline>, PipelineError> {
        let model_dir = self.model_dir(&spec.model_id);

        tracing::info!(
            task = spec.task.as_str(),
            model = %spec.model_id,
            dtype = spec.dtype.as_str(),
            device = spec.device.as_str(),
            cache = %model_dir.display(),
            "instantiating pipeline"
        );

        let required = self.resolve_artifacts(spec).into_iter().map(|f| (f, Need::Required));
        let optional = resolve_artifacts(&self.settings.optional_artifacts, spec)
            .into_iter()
            .map(|f| (f, Need::Optional));

        for (file, need) in required.chain(optional) {
            let url = self.artifact_url(&spec.model_id, &file);
            let dest = model_dir.join(&file);
            let artifact = Artifact {
                url: &url,
                dest: &dest,
                file: &file,
                need,
            };
            fetch_artifact(&self.client, &artifact, &spec.model_id, &progress).await?;
        }

        let pipeline = RuntimePipeline {
            client: self.client.clone(),
            endpoint: self.settings.endpoint.trim_end_matches('/').to_owned(),
            model_id: spec.model_id.clone(),
            model_dir,
            spec: spec.clone(),
        };
        pipeline.bind().await?;

        tracing::info!(model = %spec.model_id, device = %spec.device, "pipeline ready");
        Ok(Arc::new(pipeline))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Need {
    Required,
    /// Missing upstream is not an error (e.g. `.onnx_data` of a quantized export)
    Optional,
}

/// One file to bring into the cache
struct Artifact<'a> {
    url: &'a str,
    dest: &'a Path,
    file: &'a str,
    need: Need,
}

/// `dest` with `.part` appended to the file name
fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map_or_else(OsString::new, std::ffi::OsStr::to_os_string);
    name.push(".part");
    dest.with_file_name(name)
}

fn io_error(what: &str, path: &Path, err: &std::io::Error) -> PipelineError {
    PipelineError::Message(format!("failed to {what} {}: {err}", path.display()))
}

fn status_error(status: StatusCode, url: &str) -> PipelineError {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        PipelineError::Message(format!("Unauthorized access to {url}"))
    } else {
        PipelineError::Message(format!("request failed with status {status}: {url}"))
    }
}

async fn fetch_artifact(
    client: &Client,
    artifact: &Artifact<'_>,
    model_id: &str,
    progress: &ProgressCallback,
) -> Result<(), PipelineError> {
    let Artifact {
        url,
        dest,
        file,
        need,
    } = *artifact;

    progress(ProgressEvent::initiate(file).with_name(model_id));

    if let Ok(metadata) = tokio::fs::metadata(dest).await {
        tracing::debug!(file, size = metadata.len(), "artifact cached, skipping download");
        progress(ProgressEvent::done(file, Some(metadata.len())).with_name(model_id));
        return Ok(());
    }

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| io_error("create directory", parent, &e))?;
    }

    tracing::info!(url, "downloading artifact");

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| PipelineError::Message(format!("failed to fetch {url}: {e}")))?;

    if response.status() == StatusCode::NOT_FOUND && need == Need::Optional {
        tracing::debug!(file, "optional artifact not published, skipping");
        progress(ProgressEvent::done(file, Some(0)).with_name(model_id));
        return Ok(());
    }
    if !response.status().is_success() {
        return Err(status_error(response.status(), url));
    }

    let total = response.content_length();
    let temp_path = part_path(dest);
    let mut out = tokio::fs::File::create(&temp_path)
        .await
        .map_err(|e| io_error("create", &temp_path, &e))?;

    let mut stream = response.bytes_stream();
    let mut loaded: u64 = 0;
    let mut last_report = Instant::now();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk
            .map_err(|e| PipelineError::Message(format!("download of {file} interrupted: {e}")))?;
        out.write_all(&chunk)
            .await
            .map_err(|e| io_error("write", &temp_path, &e))?;
        loaded += chunk.len() as u64;

        if last_report.elapsed() >= PROGRESS_INTERVAL || Some(loaded) == total {
            last_report = Instant::now();
            progress(ProgressEvent::progress(file, loaded, total).with_name(model_id));
        }
    }

    out.flush()
        .await
        .map_err(|e| io_error("flush", &temp_path, &e))?;
    drop(out);

    // If the rename fails the .part file stays behind and is overwritten next attempt
    tokio::fs::rename(&temp_path, dest)
        .await
        .map_err(|e| io_error("finalize", dest, &e))?;

    tracing::info!(file, bytes = loaded, "artifact downloaded");
    progress(ProgressEvent::done(file, Some(loaded)).with_name(model_id));
    Ok(())
}

#[derive(Serialize)]
struct BindRequest<'a> {
    model: &'a str,
    model_dir: String,
    device: &'static str,
    dtype: &'static str,
}

#[derive(Serialize)]
struct TranslateRequest<'a> {
    model: &'a str,
    model_dir: String,
    text: &'a str,
    src_lang: &'static str,
    tgt_lang: &'static str,
    device: &'static str,
    dtype: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_new_tokens: Option<u32>,
}

/// Pipeline served by the external inference runtime
struct RuntimePipeline {
    client: Client,
    endpoint: String,
    model_id: String,
    model_dir: PathBuf,
    spec: PipelineSpec,
}

impl RuntimePipeline {
    /// Ask the runtime to load the downloaded model on the requested device
    async fn bind(&self) -> Result<(), PipelineError> {
        let url = format!("{}/load", self.endpoint);
        let body = BindRequest {
            model: &self.model_id,
            model_dir: self.model_dir.display().to_string(),
            device: self.spec.device.as_str(),
            dtype: self.spec.dtype.as_str(),
        };
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                PipelineError::Message(format!("inference runtime unreachable at {url}: {e}"))
            })?;

        runtime_failure(response, &url).await.map(drop)
    }
}

/// Passes successful responses through; turns failures into pipeline errors
async fn runtime_failure(
    response: reqwest::Response,
    url: &str,
) -> Result<reqwest::Response, PipelineError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        return Err(status_error(status, url));
    }

    // The runtime reports its own failure text in the body
    let body = response.text().await.unwrap_or_default();
    let body = body.trim();
    if body.is_empty() {
        Err(PipelineError::Opaque)
    } else {
        Err(PipelineError::Message(body.to_owned()))
    }
}

#[async_trait]
impl TranslationPipeline for RuntimePipeline {
    async fn translate(
        &self,
        text: &str,
        options: TranslateOptions,
    ) -> Result<Vec<TranslationCandidate>, PipelineError> {
        let url = format!("{}/translate", self.endpoint);
        let body = TranslateRequest {
            model: &self.model_id,
            model_dir: self.model_dir.display().to_string(),
            text,
            src_lang: options.src_lang.as_str(),
            tgt_lang: options.tgt_lang.as_str(),
            device: self.spec.device.as_str(),
            dtype: self.spec.dtype.as_str(),
            max_new_tokens: options.max_new_tokens,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                PipelineError::Message(format!("inference runtime unreachable at {url}: {e}"))
            })?;

        runtime_failure(response, &url)
            .await?
            .json::<Vec<TranslationCandidate>>()
            .await
            .map_err(|e| PipelineError::Message(format!("malformed runtime response: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Device, Dtype, Task};
    use std::sync::Mutex;

    fn spec(dtype: Dtype) -> PipelineSpec {
        PipelineSpec {
            task: Task::Translation,
            model_id: "leks-forever/nllb-200-distilled-600M-v1".to_owned(),
            dtype,
            device: Device::Wasm,
        }
    }

    fn settings(cache_dir: PathBuf) -> HubSettings {
        HubSettings {
            // Nothing listens here; cached artifacts must never hit the network
            hub_url: "http://127.0.0.1:9".to_owned(),
            cache_dir,
            artifacts: vec![
                "config.json".to_owned(),
                "onnx/encoder_model{suffix}.onnx".to_owned(),
            ],
            optional_artifacts: vec!["onnx/encoder_model{suffix}.onnx_data".to_owned()],
            endpoint: "http://127.0.0.1:9".to_owned(),
        }
    }

    #[test]
    fn test_resolve_artifacts_applies_suffix() {
        let factory = HubPipelineFactory::new(settings(PathBuf::from("/tmp"))).unwrap();

        assert_eq!(
            factory.resolve_artifacts(&spec(Dtype::Q8)),
            vec!["config.json", "onnx/encoder_model_quantized.onnx"]
        );
        assert_eq!(
            factory.resolve_artifacts(&spec(Dtype::Fp32)),
            vec!["config.json", "onnx/encoder_model.onnx"]
        );
    }

    #[test]
    fn test_artifact_url() {
        let factory = HubPipelineFactory::new(HubSettings {
            hub_url: "https://huggingface.co/".to_owned(),
            ..settings(PathBuf::from("/tmp"))
        })
        .unwrap();

        assert_eq!(
            factory.artifact_url("leks-forever/nllb-200-distilled-600M-v1", "tokenizer.json"),
            "https://huggingface.co/leks-forever/nllb-200-distilled-600M-v1/resolve/main/tokenizer.json"
        );
    }

    #[test]
    fn test_part_path_keeps_full_name() {
        assert_eq!(
            part_path(Path::new("/cache/onnx/decoder.onnx_data")),
            PathBuf::from("/cache/onnx/decoder.onnx_data.part")
        );
    }

    #[test]
    fn test_status_error_unauthorized() {
        let err = status_error(StatusCode::UNAUTHORIZED, "https://hub/x");
        assert_eq!(err.to_string(), "Unauthorized access to https://hub/x");

        let err = status_error(StatusCode::NOT_FOUND, "https://hub/x");
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn test_cached_artifact_reports_initiate_then_done() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("config.json");
        tokio::fs::write(&dest, b"{}").await.unwrap();

        let seen: Arc<Mutex<Vec<ProgressEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let progress: ProgressCallback = Arc::new(move |event: ProgressEvent| sink.lock().unwrap().push(event));

        let artifact = Artifact {
            url: "http://127.0.0.1:9/config.json",
            dest: &dest,
            file: "config.json",
            need: Need::Required,
        };
        fetch_artifact(&Client::new(), &artifact, "model", &progress)
            .await
            .unwrap();

        let events = seen.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].status, crate::protocol::ProgressStatus::Initiate);
        assert_eq!(events[1].status, crate::protocol::ProgressStatus::Done);
        assert_eq!(events[1].total, Some(2));
        assert_eq!(events[1].name.as_deref(), Some("model"));
    }

    #[tokio::test]
    async fn test_unreachable_hub_fails_download() {
        let dir = tempfile::tempdir().unwrap();
        let progress: ProgressCallback = Arc::new(|_: ProgressEvent| {});

        let dest = dir.path().join("missing.json");
        let artifact = Artifact {
            url: "http://127.0.0.1:9/missing.json",
            dest: &dest,
            file: "missing.json",
            need: Need::Required,
        };

        let result = fetch_artifact(&Client::new(), &artifact, "model", &progress).await;

        assert!(matches!(result, Err(PipelineError::Message(msg)) if msg.contains("failed to fetch")));
    }

    /// Serves `404 Not Found` to every connection
    async fn not_found_server() -> String {
        use tokio::io::AsyncReadExt;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0_u8; 1024];
                let _ = socket.read(&mut buf).await;
                let _ = socket
                    .write_all(
                        b"HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
                    )
                    .await;
            }
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_missing_optional_artifact_is_skipped() {
        let hub = not_found_server().await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("onnx/decoder_model_merged.onnx_data");

        let seen: Arc<Mutex<Vec<ProgressEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let progress: ProgressCallback = Arc::new(move |event: ProgressEvent| sink.lock().unwrap().push(event));

        let url = format!("{hub}/onnx/decoder_model_merged.onnx_data");
        let artifact = Artifact {
            url: &url,
            dest: &dest,
            file: "onnx/decoder_model_merged.onnx_data",
            need: Need::Optional,
        };
        fetch_artifact(&Client::new(), &artifact, "model", &progress)
            .await
            .unwrap();

        assert!(!dest.exists());
        let events = seen.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].status, crate::protocol::ProgressStatus::Done);
        assert_eq!(events[1].total, Some(0));
    }

    #[tokio::test]
    async fn test_missing_required_artifact_fails() {
        let hub = not_found_server().await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("config.json");
        let progress: ProgressCallback = Arc::new(|_: ProgressEvent| {});

        let url = format!("{hub}/config.json");
        let artifact = Artifact {
            url: &url,
            dest: &dest,
            file: "config.json",
            need: Need::Required,
        };
        let result = fetch_artifact(&Client::new(), &artifact, "model", &progress).await;

        assert!(matches!(result, Err(PipelineError::Message(msg)) if msg.contains("404")));
    }
}
