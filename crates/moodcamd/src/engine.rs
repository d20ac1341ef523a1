use async_trait::async_trait;
use image::GrayImage;
use moodcam_core::{AssetLoadError, FaceAnalyzer, InferenceError, ModelSet, Observation};
use moodcam_hw::Frame;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to load models: {0}")]
    AssetLoad(#[from] AssetLoadError),
    #[error("inference failed: {0}")]
    Inference(#[from] InferenceError),
    #[error("models are not loaded")]
    NotLoaded,
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Emotion inference as seen by the session controller.
#[async_trait]
pub trait InferenceEngine: Send {
    /// Load all model assets. Calling again after a success is a no-op.
    async fn load_assets(&mut self) -> Result<(), EngineError>;

    /// Analyze one frame. `Ok(None)` means no face was found.
    async fn detect_once(&mut self, frame: Frame) -> Result<Option<Observation>, EngineError>;
}

/// Messages sent from the controller to the engine thread.
enum EngineRequest {
    Load {
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Detect {
        frame: Frame,
        reply: oneshot::Sender<Result<Option<Observation>, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, EngineError>>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

#[async_trait]
impl InferenceEngine for EngineHandle {
    async fn load_assets(&mut self) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::Load { reply }).await
    }

    async fn detect_once(&mut self, frame: Frame) -> Result<Option<Observation>, EngineError> {
        self.request(|reply| EngineRequest::Detect { frame, reply })
            .await
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Models are not loaded here; the first `load_assets` call does that on
/// the engine thread so a missing file can be reported per session and
/// retried later.
pub fn spawn_engine(model_dir: PathBuf) -> std::io::Result<EngineHandle> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);
    let models = ModelSet::new(model_dir);

    std::thread::Builder::new()
        .name("moodcam-engine".into())
        .spawn(move || {
            tracing::info!(dir = %models.dir.display(), "engine thread started");
            let mut analyzer: Option<FaceAnalyzer> = None;

            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Load { reply } => {
                        let result = ensure_loaded(&mut analyzer, &models);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Detect { frame, reply } => {
                        let result = match analyzer.as_mut() {
                            Some(analyzer) => run_detect(analyzer, frame),
                            None => Err(EngineError::NotLoaded),
                        };
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}

fn ensure_loaded(analyzer: &mut Option<FaceAnalyzer>, models: &ModelSet) -> Result<(), EngineError> {
    if analyzer.is_some() {
        return Ok(());
    }
    let loaded = FaceAnalyzer::load(models)?;
    tracing::info!("emotion models loaded");
    *analyzer = Some(loaded);
    Ok(())
}

fn run_detect(analyzer: &mut FaceAnalyzer, frame: Frame) -> Result<Option<Observation>, EngineError> {
    let (width, height, sequence) = (frame.width, frame.height, frame.sequence);
    let image = GrayImage::from_raw(width, height, frame.data)
        .ok_or(InferenceError::InvalidFrame { width, height })?;

    let observation = analyzer.analyze(&image)?;
    match &observation {
        Some(obs) => tracing::debug!(
            seq = sequence,
            emotion = %obs.dominant_emotion(),
            confidence = obs.dominant_confidence(),
            "face analyzed"
        ),
        None => tracing::debug!(seq = sequence, "no face in frame"),
    }
    Ok(observation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn empty_dir() -> PathBuf {
        std::env::temp_dir().join(format!("moodcam-engine-test-{}", std::process::id()))
    }

    fn frame(width: u32, height: u32, len: usize) -> Frame {
        Frame {
            data: vec![128; len],
            width,
            height,
            timestamp: Instant::now(),
            sequence: 1,
        }
    }

    #[tokio::test]
    async fn test_detect_before_load_is_rejected() {
        let mut engine = spawn_engine(empty_dir()).unwrap();
        let err = engine.detect_once(frame(4, 4, 16)).await.unwrap_err();
        assert!(matches!(err, EngineError::NotLoaded));
    }

    #[tokio::test]
    async fn test_load_reports_missing_models() {
        let mut engine = spawn_engine(empty_dir()).unwrap();
        let err = engine.load_assets().await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::AssetLoad(AssetLoadError::ModelNotFound(_))
        ));

        // Still usable afterwards; the failure is not sticky.
        let again = engine.load_assets().await.unwrap_err();
        assert!(matches!(again, EngineError::AssetLoad(_)));
    }

    #[tokio::test]
    async fn test_handle_reports_closed_thread() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let mut engine = EngineHandle { tx };
        assert!(matches!(
            engine.load_assets().await,
            Err(EngineError::ChannelClosed)
        ));
    }
}
