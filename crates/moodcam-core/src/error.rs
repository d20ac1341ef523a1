use thiserror::Error;

/// Failure to bring the analysis models up. Not retried automatically.
#[derive(Error, Debug)]
pub enum AssetLoadError {
    #[error("model file not found: {0} (run `moodcam models` to list the expected files)")]
    ModelNotFound(String),
    #[error("model {model} is not usable: {detail}")]
    Incompatible { model: String, detail: String },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Failure while analyzing a single frame. Callers treat this as transient.
#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("frame buffer does not match {width}x{height}")]
    InvalidFrame { width: u32, height: u32 },
    #[error("inference failed: {0}")]
    Failed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}
