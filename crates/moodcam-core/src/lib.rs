//! moodcam-core: Emotion analysis engine and session vocabulary.
//!
//! Locates faces with SCRFD, reads expressions with FER+ and age/gender
//! with InsightFace `genderage`, all via ONNX Runtime on the CPU. Also
//! holds the emotion types, voice templates and dashboard views shared by
//! the daemon and the CLI.

pub mod age_gender;
pub mod analyzer;
pub mod dashboard;
pub mod detector;
pub mod error;
pub mod expression;
pub mod messages;
pub mod types;

pub use analyzer::{FaceAnalyzer, ModelSet};
pub use dashboard::{DashboardView, SessionSnapshot};
pub use error::{AssetLoadError, InferenceError};
pub use types::{BoundingBox, EmotionLabel, Expressions, Gender, Observation};

use std::path::PathBuf;

/// Where models live when `MOODCAM_MODEL_DIR` is unset:
/// `$XDG_DATA_HOME/moodcam/models`, falling back to `~/.local/share`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("moodcam/models")
}
