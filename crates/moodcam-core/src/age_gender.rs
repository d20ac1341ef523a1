//! InsightFace `genderage` estimator via ONNX Runtime.
//!
//! Input is a 96x96 three-channel crop with raw pixel values (the model
//! carries its own normalization). Output is `[female, male, age / 100]`.

use crate::analyzer::open_session;
use crate::error::{AssetLoadError, InferenceError};
use crate::types::Gender;
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

pub const GENDERAGE_INPUT_SIZE: u32 = 96;

pub struct AgeGenderEstimator {
    session: Session,
}

impl AgeGenderEstimator {
    pub fn load(model_path: &Path) -> Result<Self, AssetLoadError> {
        let session = open_session(model_path)?;
        Ok(Self { session })
    }

    /// Estimate `(age, gender)` for a face crop.
    pub fn estimate(&mut self, face: &GrayImage) -> Result<(f32, Gender), InferenceError> {
        let input = Self::preprocess(face);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| InferenceError::Failed(format!("age/gender output: {e}")))?;

        decode(raw).ok_or_else(|| {
            InferenceError::Failed(format!("expected 3 age/gender values, got {}", raw.len()))
        })
    }

    fn preprocess(face: &GrayImage) -> Array4<f32> {
        let size = GENDERAGE_INPUT_SIZE;
        let resized;
        let face = if face.dimensions() == (size, size) {
            face
        } else {
            resized = imageops::resize(face, size, size, FilterType::Triangle);
            &resized
        };

        let side = size as usize;
        // Grayscale → 3 identical channels.
        Array4::from_shape_fn((1, 3, side, side), |(_, _, y, x)| {
            face.get_pixel(x as u32, y as u32)[0] as f32
        })
    }
}

fn decode(raw: &[f32]) -> Option<(f32, Gender)> {
    let &[female, male, age] = raw.get(..3)? else {
        return None;
    };
    let gender = if male > female { Gender::Male } else { Gender::Female };
    Some(((age * 100.0).max(0.0), gender))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_male() {
        let (age, gender) = decode(&[0.1, 0.9, 0.34]).unwrap();
        assert_eq!(gender, Gender::Male);
        assert!((age - 34.0).abs() < 1e-4);
    }

    #[test]
    fn test_decode_female_and_negative_age() {
        let (age, gender) = decode(&[2.0, -1.0, -0.05]).unwrap();
        assert_eq!(gender, Gender::Female);
        assert_eq!(age, 0.0);
    }

    #[test]
    fn test_decode_short_output() {
        assert!(decode(&[0.5, 0.5]).is_none());
    }

    #[test]
    fn test_preprocess_channels_identical() {
        let face = GrayImage::from_fn(96, 96, |x, y| image::Luma([((x + y) % 256) as u8]));
        let tensor = AgeGenderEstimator::preprocess(&face);
        assert_eq!(tensor.shape(), &[1, 3, 96, 96]);
        for (y, x) in [(0usize, 0usize), (10, 40), (95, 95)] {
            assert_eq!(tensor[[0, 0, y, x]], tensor[[0, 1, y, x]]);
            assert_eq!(tensor[[0, 1, y, x]], tensor[[0, 2, y, x]]);
            assert_eq!(tensor[[0, 0, y, x]], ((x + y) % 256) as f32);
        }
    }
}
