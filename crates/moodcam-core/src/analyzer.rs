//! Full per-frame analysis: locate the face, then read expression, age and gender.

use crate::age_gender::{AgeGenderEstimator, GENDERAGE_INPUT_SIZE};
use crate::detector::FaceLocator;
use crate::error::{AssetLoadError, InferenceError};
use crate::expression::{ExpressionClassifier, FERPLUS_INPUT_SIZE};
use crate::types::{BoundingBox, Observation};
use image::imageops::{self, FilterType};
use image::GrayImage;
use ort::session::Session;
use std::path::{Path, PathBuf};

pub const DETECTOR_MODEL: &str = "det_10g.onnx";
pub const EXPRESSION_MODEL: &str = "emotion-ferplus-8.onnx";
pub const AGE_GENDER_MODEL: &str = "genderage.onnx";

/// Crop margin around the detected box, relative to its longer side.
const EXPRESSION_MARGIN: f32 = 1.0;
const AGE_GENDER_MARGIN: f32 = 1.5;

/// The model files the analyzer needs, rooted at one directory.
#[derive(Debug, Clone)]
pub struct ModelSet {
    pub dir: PathBuf,
}

impl ModelSet {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `(file name, full path)` for every required model.
    pub fn files(&self) -> [(&'static str, PathBuf); 3] {
        [DETECTOR_MODEL, EXPRESSION_MODEL, AGE_GENDER_MODEL].map(|name| (name, self.dir.join(name)))
    }

    /// Paths of required models that are not on disk.
    pub fn missing(&self) -> Vec<PathBuf> {
        self.files()
            .into_iter()
            .map(|(_, path)| path)
            .filter(|path| !path.exists())
            .collect()
    }
}

/// Open an ONNX session, failing early with a readable error for missing files.
pub(crate) fn open_session(model_path: &Path) -> Result<Session, AssetLoadError> {
    if !model_path.exists() {
        return Err(AssetLoadError::ModelNotFound(model_path.display().to_string()));
    }

    let session = Session::builder()?
        .with_intra_threads(2)?
        .commit_from_file(model_path)?;

    tracing::info!(
        path = %model_path.display(),
        inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
        outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
        "loaded model"
    );

    Ok(session)
}

/// Face locator, expression classifier and age/gender estimator, loaded together.
pub struct FaceAnalyzer {
    locator: FaceLocator,
    expressions: ExpressionClassifier,
    age_gender: AgeGenderEstimator,
}

impl FaceAnalyzer {
    /// Load all three models. Fails on the first file that is missing or unusable.
    pub fn load(models: &ModelSet) -> Result<Self, AssetLoadError> {
        if let Some(path) = models.missing().first() {
            return Err(AssetLoadError::ModelNotFound(path.display().to_string()));
        }

        Ok(Self {
            locator: FaceLocator::load(&models.dir.join(DETECTOR_MODEL))?,
            expressions: ExpressionClassifier::load(&models.dir.join(EXPRESSION_MODEL))?,
            age_gender: AgeGenderEstimator::load(&models.dir.join(AGE_GENDER_MODEL))?,
        })
    }

    /// Analyze the most confident face in `frame`; `None` when no face is found.
    pub fn analyze(&mut self, frame: &GrayImage) -> Result<Option<Observation>, InferenceError> {
        let faces = self.locator.locate(frame)?;
        let Some(face) = faces.first() else {
            return Ok(None);
        };
        tracing::trace!(confidence = face.confidence, x = face.x, y = face.y, "face located");

        let crop = crop_face(frame, face, EXPRESSION_MARGIN, FERPLUS_INPUT_SIZE);
        let expressions = self.expressions.classify(&crop)?;

        let crop = crop_face(frame, face, AGE_GENDER_MARGIN, GENDERAGE_INPUT_SIZE);
        let (age, gender) = self.age_gender.estimate(&crop)?;

        Ok(Some(Observation::new(age, gender, expressions)))
    }
}

/// Square crop centred on `face`, `margin` times its longer side, clipped to
/// the frame and resized to `size`×`size`.
pub fn crop_face(frame: &GrayImage, face: &BoundingBox, margin: f32, size: u32) -> GrayImage {
    let (width, height) = frame.dimensions();
    let (cx, cy) = face.center();
    let half = (face.width.max(face.height) * margin / 2.0).max(0.5);

    let left = (cx - half).floor().clamp(0.0, (width.saturating_sub(1)) as f32) as u32;
    let top = (cy - half).floor().clamp(0.0, (height.saturating_sub(1)) as f32) as u32;
    let right = ((cx + half).ceil() as u32).clamp(left + 1, width.max(left + 1));
    let bottom = ((cy + half).ceil() as u32).clamp(top + 1, height.max(top + 1));

    let region = imageops::crop_imm(frame, left, top, right - left, bottom - top).to_image();
    imageops::resize(&region, size, size, FilterType::Triangle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence: 0.9 }
    }

    #[test]
    fn test_model_set_lists_three_files() {
        let models = ModelSet::new("/opt/moodcam/models");
        let names: Vec<&str> = models.files().iter().map(|(n, _)| *n).collect();
        assert_eq!(names, vec![DETECTOR_MODEL, EXPRESSION_MODEL, AGE_GENDER_MODEL]);
        assert_eq!(models.files()[1].1, PathBuf::from("/opt/moodcam/models").join(EXPRESSION_MODEL));
    }

    #[test]
    fn test_missing_models_in_empty_dir() {
        let models = ModelSet::new("/nonexistent/moodcam-models");
        assert_eq!(models.missing().len(), 3);
    }

    #[test]
    fn test_load_reports_missing_model() {
        let models = ModelSet::new("/nonexistent/moodcam-models");
        match FaceAnalyzer::load(&models) {
            Err(AssetLoadError::ModelNotFound(path)) => assert!(path.ends_with(DETECTOR_MODEL)),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("load should fail without model files"),
        }
    }

    #[test]
    fn test_crop_face_output_size() {
        let frame = GrayImage::from_pixel(320, 240, image::Luma([90]));
        let crop = crop_face(&frame, &face(100.0, 60.0, 80.0, 100.0), 1.5, 96);
        assert_eq!(crop.dimensions(), (96, 96));
        assert_eq!(crop.get_pixel(48, 48)[0], 90);
    }

    #[test]
    fn test_crop_face_clips_to_frame() {
        // Box hanging off the bottom-right corner.
        let frame = GrayImage::from_fn(100, 80, |x, _| image::Luma([if x >= 90 { 255 } else { 0 }]));
        let crop = crop_face(&frame, &face(85.0, 70.0, 30.0, 30.0), 1.0, 64);
        assert_eq!(crop.dimensions(), (64, 64));
        // Right edge of the crop comes from the bright columns.
        assert_eq!(crop.get_pixel(63, 10)[0], 255);
    }

    #[test]
    fn test_crop_face_degenerate_box() {
        let frame = GrayImage::from_pixel(10, 10, image::Luma([7]));
        let crop = crop_face(&frame, &face(50.0, 50.0, 0.0, 0.0), 1.0, 64);
        assert_eq!(crop.dimensions(), (64, 64));
    }
}
