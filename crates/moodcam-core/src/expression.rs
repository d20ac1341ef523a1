//! FER+ facial expression classifier via ONNX Runtime.
//!
//! Takes a 64x64 grayscale face crop with raw 0–255 pixel values and
//! produces eight logits. The seven that map onto [`EmotionLabel`] are
//! softmaxed into [`Expressions`]; `contempt` is discarded.

use crate::analyzer::open_session;
use crate::error::{AssetLoadError, InferenceError};
use crate::types::{EmotionLabel, Expressions};
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

pub const FERPLUS_INPUT_SIZE: u32 = 64;

/// FER+ output order. `None` marks `contempt`.
const FERPLUS_CLASSES: [Option<EmotionLabel>; 8] = [
    Some(EmotionLabel::Neutral),
    Some(EmotionLabel::Happy),
    Some(EmotionLabel::Surprised),
    Some(EmotionLabel::Sad),
    Some(EmotionLabel::Angry),
    Some(EmotionLabel::Disgusted),
    Some(EmotionLabel::Fearful),
    None,
];

pub struct ExpressionClassifier {
    session: Session,
}

impl ExpressionClassifier {
    pub fn load(model_path: &Path) -> Result<Self, AssetLoadError> {
        let session = open_session(model_path)?;
        Ok(Self { session })
    }

    /// Classify a face crop. Crops of another size are resized first.
    pub fn classify(&mut self, face: &GrayImage) -> Result<Expressions, InferenceError> {
        let input = Self::preprocess(face);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, logits) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| InferenceError::Failed(format!("expression logits: {e}")))?;

        if logits.len() < FERPLUS_CLASSES.len() {
            return Err(InferenceError::Failed(format!(
                "expected {} expression logits, got {}",
                FERPLUS_CLASSES.len(),
                logits.len()
            )));
        }

        Ok(logits_to_expressions(logits))
    }

    fn preprocess(face: &GrayImage) -> Array4<f32> {
        let size = FERPLUS_INPUT_SIZE;
        let resized;
        let face = if face.dimensions() == (size, size) {
            face
        } else {
            resized = imageops::resize(face, size, size, FilterType::Triangle);
            &resized
        };

        let side = size as usize;
        Array4::from_shape_fn((1, 1, side, side), |(_, _, y, x)| {
            face.get_pixel(x as u32, y as u32)[0] as f32
        })
    }
}

/// Softmax over the seven mapped classes.
fn logits_to_expressions(logits: &[f32]) -> Expressions {
    let mapped: Vec<(EmotionLabel, f32)> = FERPLUS_CLASSES
        .iter()
        .zip(logits)
        .filter_map(|(class, &logit)| class.map(|label| (label, logit)))
        .collect();

    let max = mapped
        .iter()
        .map(|&(_, l)| l)
        .fold(f32::NEG_INFINITY, f32::max);
    let total: f32 = mapped.iter().map(|&(_, l)| (l - max).exp()).sum();

    let mut expressions = Expressions::default();
    if total > 0.0 && total.is_finite() {
        for (label, logit) in mapped {
            expressions.set(label, (logit - max).exp() / total);
        }
    }
    expressions
}
