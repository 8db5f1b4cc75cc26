use crate::error::AppError;
use crate::models::classify_types::ModelStatus;
use crate::services::classifier::inference::OnnxClassifier;
use futures::StreamExt;
use ort::session::Session;
use std::path::PathBuf;
use tracing::{debug, info};

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize, clap::ValueEnum)]
pub enum ModelKind {
    Base,
    Large,
}

impl ModelKind {
    fn config(&self) -> (&'static str, &'static str, &'static str, &'static str) {
        match self {
            ModelKind::Base => (
                "https://huggingface.co/Xenova/convnextv2-base-22k-384/resolve/main/onnx/model.onnx",
                "https://huggingface.co/Xenova/convnextv2-base-22k-384/resolve/main/config.json",
                "convnextv2-base-22k-384.onnx",
                "convnextv2-base-22k-384-config.json",
            ),
            ModelKind::Large => (
                "https://huggingface.co/Xenova/convnextv2-large-22k-384/resolve/main/onnx/model.onnx",
                "https://huggingface.co/Xenova/convnextv2-large-22k-384/resolve/main/config.json",
                "convnextv2-large-22k-384.onnx",
                "convnextv2-large-22k-384-config.json",
            ),
        }
    }

    pub fn crop_size(&self) -> u32 {
        match self {
            ModelKind::Base | ModelKind::Large => 384,
        }
    }
}

/// Knows where the model artifacts live on disk, fetches them when absent and
/// turns them into a ready [`OnnxClassifier`].
pub struct ModelManager {
    model_dir: PathBuf,
    kind: ModelKind,
}

impl ModelManager {
    pub fn new(model_dir: PathBuf, kind: ModelKind) -> Self {
        ModelManager { model_dir, kind }
    }

    pub fn model_path(&self) -> PathBuf {
        let (_, _, filename, _) = self.kind.config();
        self.model_dir.join(filename)
    }

    pub fn config_path(&self) -> PathBuf {
        let (_, _, _, filename) = self.kind.config();
        self.model_dir.join(filename)
    }

    pub fn is_downloaded(&self) -> bool {
        self.model_path().exists() && self.config_path().exists()
    }

    pub fn status(&self) -> ModelStatus {
        ModelStatus {
            downloaded: self.is_downloaded(),
            model_path: self.model_path().display().to_string(),
            config_path: self.config_path().display().to_string(),
        }
    }

    /// Fetches the model and its config unless both are already on disk.
    pub async fn download(&self) -> Result<(), AppError> {
        if self.is_downloaded() {
            debug!("Model already downloaded to {}", self.model_dir.display());
            return Ok(());
        }

        std::fs::create_dir_all(&self.model_dir).map_err(|e| AppError {
            message: format!("Failed to create model directory: {}", e),
        })?;

        let (model_url, config_url, _, _) = self.kind.config();
        let config_path = self.config_path();
        let model_path = self.model_path();

        if !config_path.exists() {
            download_file(config_url, &config_path).await?;
        }

        if !model_path.exists() {
            download_file(model_url, &model_path).await?;
        }

        Ok(())
    }

    /// Loads the label table and builds the ONNX session. Session creation
    /// happens on a blocking task; the resulting classifier is reused for
    /// every image of the run.
    pub async fn load(&self) -> Result<OnnxClassifier, AppError> {
        let config_path = self.config_path();
        let config_content = tokio::fs::read_to_string(&config_path)
            .await
            .map_err(|e| AppError {
                message: format!("Failed to read config file {}: {}", config_path.display(), e),
            })?;
        let labels = parse_labels(&config_content)?;

        let model_path = self.model_path();
        let session = tokio::task::spawn_blocking(move || -> Result<Session, AppError> {
            let _ = ort::init().with_name("image-organizer").commit();

            Session::builder()
                .map_err(|e| AppError {
                    message: format!("Failed to create session builder: {}", e),
                })?
                .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)
                .map_err(|e| AppError {
                    message: format!("Failed to set optimization level: {}", e),
                })?
                .with_intra_threads(4)
                .map_err(|e| AppError {
                    message: format!("Failed to set intra threads: {}", e),
                })?
                .with_execution_providers([
                    ort::ep::CPU::default().build(),
                ])
                .map_err(|e| AppError {
                    message: format!("Failed to register CPU execution provider: {}", e),
                })?
                .commit_from_file(&model_path)
                .map_err(|e| AppError {
                    message: format!("Failed to load ONNX model {}: {}", model_path.display(), e),
                })
        })
        .await
        .map_err(|e| AppError {
            message: format!("Failed to spawn model loading task: {}", e),
        })??;

        info!("Model loaded with {} labels", labels.len());

        Ok(OnnxClassifier::new(session, labels, self.kind.crop_size()))
    }
}

/// Extracts the ordered label table from the model config's `id2label` map.
pub(crate) fn parse_labels(config_content: &str) -> Result<Vec<String>, AppError> {
    let config: serde_json::Value = serde_json::from_str(config_content).map_err(|e| AppError {
        message: format!("Failed to parse config JSON: {}", e),
    })?;

    let id2label = config["id2label"]
        .as_object()
        .ok_or_else(|| AppError::new("Config missing id2label field"))?;

    let mut labels: Vec<(usize, String)> = id2label
        .iter()
        .map(|(k, v)| {
            let idx = k.parse::<usize>().unwrap_or(0);
            let label = v.as_str().unwrap_or("unknown").to_string();
            (idx, label)
        })
        .collect();
    labels.sort_by_key(|(idx, _)| *idx);

    Ok(labels.into_iter().map(|(_, label)| label).collect())
}

async fn download_file(url: &str, dest: &PathBuf) -> Result<(), AppError> {
    info!("Downloading {}", url);

    let client = reqwest::Client::new();
    let response = client.get(url).send().await?;

    if !response.status().is_success() {
        return Err(format!("Failed to download {}: HTTP {}", url, response.status()).into());
    }

    let total_size = response.content_length().unwrap_or(0);
    let mut downloaded: u64 = 0;
    let mut last_logged = 0;

    let mut file = tokio::fs::File::create(dest).await.map_err(|e| AppError {
        message: format!("Failed to create file {}: {}", dest.display(), e),
    })?;

    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        downloaded += chunk.len() as u64;
        tokio::io::AsyncWriteExt::write_all(&mut file, &chunk)
            .await
            .map_err(|e| AppError {
                message: format!("Failed to write to file: {}", e),
            })?;

        if total_size > 0 {
            let progress = (downloaded * 100) / total_size;
            if progress >= last_logged + 10 {
                info!("Download progress: {}%", progress);
                last_logged = progress;
            }
        }
    }

    info!("Saved {}", dest.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_ordered_by_numeric_index() {
        let config = r#"{"id2label": {"10": "truck", "2": "bird", "0": "cat", "1": "dog"}}"#;
        let labels = parse_labels(config).unwrap();
        assert_eq!(labels, vec!["cat", "dog", "bird", "truck"]);
    }

    #[test]
    fn missing_id2label_is_an_error() {
        let err = parse_labels(r#"{"architectures": ["ConvNextV2"]}"#).unwrap_err();
        assert!(err.message.contains("id2label"));
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(parse_labels("not json").is_err());
    }

    #[test]
    fn download_state_reflects_files_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ModelManager::new(dir.path().to_path_buf(), ModelKind::Base);
        assert!(!manager.is_downloaded());

        std::fs::write(manager.model_path(), b"onnx").unwrap();
        assert!(!manager.is_downloaded());
        std::fs::write(manager.config_path(), b"{}").unwrap();
        assert!(manager.is_downloaded());

        let status = manager.status();
        assert!(status.downloaded);
        assert!(status.model_path.ends_with("convnextv2-base-22k-384.onnx"));
    }
}
