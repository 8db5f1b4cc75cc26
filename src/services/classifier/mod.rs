pub mod inference;
pub mod model_manager;

use crate::error::AppError;
use crate::models::classify_types::Prediction;
use std::path::Path;

/// Maps one image on disk to its most likely label.
///
/// The organizer depends only on this trait, so anything that can turn an
/// image path into a label can stand in for the ONNX session.
pub trait ImageClassifier: Send + Sync {
    fn classify(&self, image: &Path) -> Result<Prediction, AppError>;
}
