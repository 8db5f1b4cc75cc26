use super::ImageClassifier;
use crate::error::AppError;
use crate::models::classify_types::Prediction;
use image::ImageReader;
use ndarray::Array4;
use ort::session::Session;
use ort::value::Value;
use std::path::Path;
use std::sync::Mutex;

const CROP_PCT: f32 = 0.875;

// ImageNet normalization constants
const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const STD: [f32; 3] = [0.229, 0.224, 0.225];

/// A loaded ONNX classification session plus its ordered label table.
///
/// Built once per process by `ModelManager::load` and shared by reference for
/// the whole run. `Session::run` needs `&mut`, hence the mutex.
pub struct OnnxClassifier {
    session: Mutex<Session>,
    labels: Vec<String>,
    crop_size: u32,
}

impl OnnxClassifier {
    pub fn new(session: Session, labels: Vec<String>, crop_size: u32) -> Self {
        OnnxClassifier {
            session: Mutex::new(session),
            labels,
            crop_size,
        }
    }
}

impl ImageClassifier for OnnxClassifier {
    fn classify(&self, image: &Path) -> Result<Prediction, AppError> {
        let input = image_to_tensor(image, self.crop_size)?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| AppError::new("Model session lock poisoned"))?;

        let input_name = session.inputs()[0].name().to_string();
        let input_tensor = Value::from_array(input).map_err(|e| AppError {
            message: format!("Failed to create tensor value: {}", e),
        })?;

        let outputs = session
            .run(ort::inputs![input_name.as_str() => input_tensor])
            .map_err(|e| AppError {
                message: format!("Inference failed for {}: {}", image.display(), e),
            })?;

        let output_value = outputs
            .values()
            .next()
            .ok_or_else(|| AppError::new("Model produced no outputs"))?;

        let (_, logits) = output_value
            .try_extract_tensor::<f32>()
            .map_err(|e| AppError {
                message: format!("Failed to extract output tensor: {}", e),
            })?;

        let probabilities = softmax(logits);
        let class_id = argmax(&probabilities)
            .ok_or_else(|| AppError::new("Model produced an empty probability vector"))?;

        let label = self
            .labels
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", class_id));

        Ok(Prediction {
            label,
            confidence: probabilities[class_id],
        })
    }
}

/// Decodes an image and turns it into a normalized NCHW tensor: resize the
/// shortest edge to `ceil(crop_size / CROP_PCT)`, center crop, then apply the
/// ImageNet mean/std per channel.
pub fn image_to_tensor(path: &Path, crop_size: u32) -> Result<Array4<f32>, AppError> {
    let img = ImageReader::open(path)
        .map_err(|e| AppError {
            message: format!("Failed to open image {}: {}", path.display(), e),
        })?
        .decode()
        .map_err(|e| AppError {
            message: format!("Failed to decode image {}: {}", path.display(), e),
        })?;

    let resize_size = (crop_size as f32 / CROP_PCT).ceil() as u32;
    let (w, h) = (img.width(), img.height());
    let (new_w, new_h) = if w < h {
        (
            resize_size,
            ((h as f32 / w as f32) * resize_size as f32).round() as u32,
        )
    } else {
        (
            ((w as f32 / h as f32) * resize_size as f32).round() as u32,
            resize_size,
        )
    };
    let resized = img.resize_exact(new_w, new_h, image::imageops::FilterType::Triangle);

    let crop_x = new_w.saturating_sub(crop_size) / 2;
    let crop_y = new_h.saturating_sub(crop_size) / 2;
    let rgb = resized.crop_imm(crop_x, crop_y, crop_size, crop_size).to_rgb8();

    let side = crop_size as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, side, side));
    for (x, y, pixel) in rgb.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] =
                (pixel[c] as f32 / 255.0 - MEAN[c]) / STD[c];
        }
    }

    Ok(tensor)
}

/// Max-shifted softmax over raw logits.
pub(crate) fn softmax(logits: &[f32]) -> Vec<f32> {
    let max_logit = logits.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
    let exp_sum: f32 = logits.iter().map(|&x| (x - max_logit).exp()).sum();
    logits
        .iter()
        .map(|&x| (x - max_logit).exp() / exp_sum)
        .collect()
}

/// Index of the highest probability. Ties go to the lowest index, matching
/// the label table's fixed ordering.
pub(crate) fn argmax(probabilities: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (idx, &p) in probabilities.iter().enumerate() {
        match best {
            Some((_, bp)) if p <= bp => {}
            _ => best = Some((idx, p)),
        }
    }
    best.map(|(idx, _)| idx)
}
