//! Live frame sources.
//!
//! A [`CaptureSource`] behaves like a playing video element: once started it
//! always has a "current" frame, until it is paused, stopped or fails.

use crate::camera::{Camera, CameraError};
use crate::frame::Frame;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::{oneshot, watch};

/// How long `start` waits for the previous capture thread to close the device.
const RELEASE_TIMEOUT: Duration = Duration::from_secs(3);

/// Liveness of a capture source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureStatus {
    /// Not started, or stopped by the caller.
    Stopped,
    /// A fresh frame is available.
    Live,
    /// Started, but no frame recently (first frame pending, or stream paused).
    Stalled,
    /// The stream ended with an error.
    Failed(String),
}

#[async_trait]
pub trait CaptureSource: Send {
    /// Acquire the device and begin streaming. No-op when already running.
    async fn start(&mut self) -> Result<(), CameraError>;

    /// Release the device. Safe to call when not running.
    fn stop(&mut self);

    fn status(&self) -> CaptureStatus;

    /// The latest frame, if the source is [`CaptureStatus::Live`].
    fn current_frame(&self) -> Option<Frame>;
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub device_path: String,
    pub width: u32,
    pub height: u32,
    /// A frame older than this counts as stalled.
    pub stale_after: Duration,
}

/// The running capture thread, from the controller's side.
struct Worker {
    frames: watch::Receiver<Option<Frame>>,
    stop: Arc<AtomicBool>,
    failure: Arc<Mutex<Option<String>>>,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    /// Signal the thread to stop and hand back its handle. The device stays
    /// open until the thread's current dequeue returns.
    fn retire(mut self) -> Option<JoinHandle<()>> {
        self.stop.store(true, Ordering::Release);
        self.thread.take()
    }

    fn failed(&self) -> bool {
        self.failure.lock().map(|f| f.is_some()).unwrap_or(true)
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}

/// V4L2 camera streamed on a dedicated thread into a `watch` channel.
pub struct CameraSource {
    settings: CameraSettings,
    worker: Option<Worker>,
    /// A stopped capture thread that may still hold the device.
    retiring: Option<JoinHandle<()>>,
}

impl CameraSource {
    pub fn new(settings: CameraSettings) -> Self {
        Self {
            settings,
            worker: None,
            retiring: None,
        }
    }

    /// Wait for the previous capture thread to exit so the device can be reopened.
    async fn release_previous(&mut self) -> Result<(), CameraError> {
        let Some(thread) = self.retiring.take() else {
            return Ok(());
        };
        let joined = tokio::task::spawn_blocking(move || thread.join());
        match tokio::time::timeout(RELEASE_TIMEOUT, joined).await {
            Ok(_) => Ok(()),
            Err(_) => {
                tracing::warn!(
                    device = %self.settings.device_path,
                    "previous capture thread did not release the device"
                );
                Err(CameraError::DeviceBusy)
            }
        }
    }

    fn fresh(&self, frame: &Frame) -> bool {
        frame.age() <= self.settings.stale_after
    }
}

#[async_trait]
impl CaptureSource for CameraSource {
    async fn start(&mut self) -> Result<(), CameraError> {
        if let Some(worker) = self.worker.take() {
            if !worker.failed() {
                self.worker = Some(worker);
                return Ok(());
            }
            // A failed worker is replaced.
            self.retiring = worker.retire();
        }
        self.release_previous().await?;

        let (frame_tx, frames) = watch::channel(None);
        let (opened_tx, opened_rx) = oneshot::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let failure = Arc::new(Mutex::new(None));

        let settings = self.settings.clone();
        let thread_stop = stop.clone();
        let thread_failure = failure.clone();

        let thread = std::thread::Builder::new()
            .name("moodcam-capture".into())
            .spawn(move || {
                let camera = match Camera::open(&settings.device_path, settings.width, settings.height) {
                    Ok(camera) => camera,
                    Err(e) => {
                        let _ = opened_tx.send(Err(e));
                        return;
                    }
                };
                let _ = opened_tx.send(Ok((camera.width, camera.height)));

                let result = camera.stream_until(&thread_stop, |frame| {
                    frame_tx.send_replace(Some(frame));
                });

                match result {
                    Ok(()) => tracing::info!(device = %settings.device_path, "capture stopped"),
                    Err(e) => {
                        tracing::warn!(device = %settings.device_path, error = %e, "capture ended");
                        if let Ok(mut slot) = thread_failure.lock() {
                            *slot = Some(e.to_string());
                        }
                    }
                }
            })
            .map_err(|e| CameraError::CaptureFailed(format!("failed to spawn capture thread: {e}")))?;

        let (width, height) = opened_rx
            .await
            .map_err(|_| CameraError::CaptureFailed("capture thread exited".into()))??;

        tracing::info!(device = %self.settings.device_path, width, height, "capture started");

        self.worker = Some(Worker {
            frames,
            stop,
            failure,
            thread: Some(thread),
        });
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            tracing::debug!(device = %self.settings.device_path, "capture stop requested");
            self.retiring = worker.retire();
        }
    }

    fn status(&self) -> CaptureStatus {
        let Some(worker) = &self.worker else {
            return CaptureStatus::Stopped;
        };
        if let Some(reason) = worker.failure.lock().ok().and_then(|f| f.clone()) {
            return CaptureStatus::Failed(reason);
        }
        match &*worker.frames.borrow() {
            Some(frame) if self.fresh(frame) => CaptureStatus::Live,
            _ => CaptureStatus::Stalled,
        }
    }

    fn current_frame(&self) -> Option<Frame> {
        let worker = self.worker.as_ref()?;
        let latest = worker.frames.borrow();
        latest.as_ref().filter(|frame| self.fresh(frame)).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> CameraSettings {
        CameraSettings {
            device_path: "/dev/video-moodcam-missing".into(),
            width: 1280,
            height: 720,
            stale_after: Duration::from_secs(2),
        }
    }

    #[test]
    fn test_new_source_is_stopped() {
        let source = CameraSource::new(settings());
        assert_eq!(source.status(), CaptureStatus::Stopped);
        assert!(source.current_frame().is_none());
    }

    #[tokio::test]
    async fn test_start_reports_missing_device() {
        let mut source = CameraSource::new(settings());
        let err = source.start().await.unwrap_err();
        assert!(matches!(err, CameraError::DeviceNotFound(_)));
        assert_eq!(source.status(), CaptureStatus::Stopped);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut source = CameraSource::new(settings());
        source.stop();
        source.stop();
        assert_eq!(source.status(), CaptureStatus::Stopped);
    }

    #[test]
    fn test_stale_frames_are_not_current() {
        let (tx, frames) = watch::channel(None);
        let mut source = CameraSource::new(CameraSettings {
            stale_after: Duration::from_millis(0),
            ..settings()
        });
        source.worker = Some(Worker {
            frames,
            stop: Arc::new(AtomicBool::new(false)),
            failure: Arc::new(Mutex::new(None)),
            thread: None,
        });
        assert_eq!(source.status(), CaptureStatus::Stalled);

        tx.send_replace(Some(Frame {
            data: vec![0; 4],
            width: 2,
            height: 2,
            timestamp: std::time::Instant::now() - Duration::from_millis(50),
            sequence: 1,
        }));
        assert_eq!(source.status(), CaptureStatus::Stalled);
        assert!(source.current_frame().is_none());
    }

    #[test]
    fn test_fresh_frame_is_live() {
        let (tx, frames) = watch::channel(None);
        let mut source = CameraSource::new(settings());
        source.worker = Some(Worker {
            frames,
            stop: Arc::new(AtomicBool::new(false)),
            failure: Arc::new(Mutex::new(None)),
            thread: None,
        });
        tx.send_replace(Some(Frame {
            data: vec![9; 4],
            width: 2,
            height: 2,
            timestamp: std::time::Instant::now(),
            sequence: 7,
        }));
        assert_eq!(source.status(), CaptureStatus::Live);
        assert_eq!(source.current_frame().map(|f| f.sequence), Some(7));
    }

    #[test]
    fn test_failure_is_reported_and_stop_signals_thread() {
        let (_tx, frames) = watch::channel(None);
        let stop = Arc::new(AtomicBool::new(false));
        let mut source = CameraSource::new(settings());
        source.worker = Some(Worker {
            frames,
            stop: stop.clone(),
            failure: Arc::new(Mutex::new(Some("failed to dequeue buffer".into()))),
            thread: None,
        });
        assert_eq!(
            source.status(),
            CaptureStatus::Failed("failed to dequeue buffer".into())
        );

        source.stop();
        assert!(stop.load(Ordering::Acquire));
        assert_eq!(source.status(), CaptureStatus::Stopped);
    }

    /// A capture thread that keeps "the device" until `linger` after stop is requested.
    fn lingering_worker(linger: Duration, released: Arc<AtomicBool>) -> Worker {
        let (_tx, frames) = watch::channel(None);
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let thread = std::thread::spawn(move || {
            while !thread_stop.load(Ordering::Acquire) {
                std::thread::sleep(Duration::from_millis(5));
            }
            std::thread::sleep(linger);
            released.store(true, Ordering::Release);
        });
        Worker {
            frames,
            stop,
            failure: Arc::new(Mutex::new(None)),
            thread: Some(thread),
        }
    }

    #[tokio::test]
    async fn test_restart_waits_for_previous_thread() {
        let released = Arc::new(AtomicBool::new(false));
        let mut source = CameraSource::new(settings());
        source.worker = Some(lingering_worker(Duration::from_millis(100), released.clone()));

        source.stop();
        assert!(!released.load(Ordering::Acquire));

        // The device path is missing, so the reopen fails, but only after the
        // old thread has let go.
        let err = source.start().await.unwrap_err();
        assert!(matches!(err, CameraError::DeviceNotFound(_)));
        assert!(released.load(Ordering::Acquire));
        assert!(source.retiring.is_none());
    }

    #[tokio::test]
    async fn test_failed_worker_is_joined_before_reopen() {
        let released = Arc::new(AtomicBool::new(false));
        let mut source = CameraSource::new(settings());
        let worker = lingering_worker(Duration::from_millis(50), released.clone());
        *worker.failure.lock().unwrap() = Some("device unplugged".into());
        source.worker = Some(worker);

        let err = source.start().await.unwrap_err();
        assert!(matches!(err, CameraError::DeviceNotFound(_)));
        assert!(released.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn test_stuck_thread_reports_device_busy() {
        let released = Arc::new(AtomicBool::new(false));
        let mut source = CameraSource::new(settings());
        source.worker = Some(lingering_worker(RELEASE_TIMEOUT + Duration::from_millis(500), released.clone()));

        source.stop();
        let err = source.start().await.unwrap_err();
        assert!(matches!(err, CameraError::DeviceBusy));
        assert!(!released.load(Ordering::Acquire));
    }
}
