use std::path::PathBuf;
use std::time::Duration;

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Requested capture size; the driver may negotiate another.
    pub capture_width: u32,
    pub capture_height: u32,
    /// A frame older than this is treated as a paused stream.
    pub stale_frame: Duration,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Time between detection ticks.
    pub poll_interval: Duration,
    /// A dominant emotion must score strictly above this to be announced.
    pub announce_threshold: f32,
    /// Delay between a voice message arriving and it being spoken.
    pub voice_delay: Duration,
    /// Speech synthesizer executable.
    pub voice_program: String,
    /// Speech rate relative to the synthesizer's default.
    pub voice_rate: f32,
    /// Start with voice feedback muted.
    pub muted: bool,
}

impl Config {
    /// Load configuration from `MOODCAM_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let parsed = |key: &str| var(key).and_then(|v| v.parse::<f64>().ok());
        let millis = |key: &str, default: u64| {
            var(key)
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(Duration::from_millis(default))
        };
        // Periods must be non-zero; zero falls back to the default.
        let period = |key: &str, default: u64| {
            Some(millis(key, default))
                .filter(|d| !d.is_zero())
                .unwrap_or(Duration::from_millis(default))
        };

        Self {
            camera_device: var("MOODCAM_CAMERA_DEVICE").unwrap_or_else(|| "/dev/video0".to_string()),
            capture_width: var("MOODCAM_CAPTURE_WIDTH").and_then(|v| v.parse().ok()).unwrap_or(1280),
            capture_height: var("MOODCAM_CAPTURE_HEIGHT").and_then(|v| v.parse().ok()).unwrap_or(720),
            stale_frame: period("MOODCAM_STALE_FRAME_MS", 2000),
            model_dir: var("MOODCAM_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(moodcam_core::default_model_dir),
            poll_interval: period("MOODCAM_POLL_INTERVAL_MS", 1000),
            announce_threshold: parsed("MOODCAM_ANNOUNCE_THRESHOLD").map(|v| v as f32).unwrap_or(0.5),
            voice_delay: millis("MOODCAM_VOICE_DELAY_MS", 300),
            voice_program: var("MOODCAM_VOICE_PROGRAM").unwrap_or_else(|| "espeak-ng".to_string()),
            voice_rate: parsed("MOODCAM_VOICE_RATE").map(|v| v as f32).unwrap_or(0.9),
            muted: var("MOODCAM_MUTED").map(|v| v != "0").unwrap_or(false),
        }
    }
}
