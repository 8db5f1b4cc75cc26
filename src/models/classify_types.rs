use serde::Serialize;

/// Top-1 prediction for a single image.
#[derive(Debug, Serialize, Clone)]
pub struct Prediction {
    pub label: String,
    pub confidence: f32,
}

#[derive(Debug, Serialize, Clone)]
pub struct ModelStatus {
    pub downloaded: bool,
    pub model_path: String,
    pub config_path: String,
}
