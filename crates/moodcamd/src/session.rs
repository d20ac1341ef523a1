//! The session controller: polling loop, emotion debounce and voice feedback.
//!
//! One controller owns the capture source, the inference engine and the
//! voice dispatcher. It runs as a single task (see [`spawn_session`]) so
//! commands, ticks and speech events never interleave.

use crate::engine::InferenceEngine;
use crate::voice::{VoiceChannel, VoiceDispatcher, VoiceWakeup};
use chrono::Timelike;
use moodcam_core::messages;
use moodcam_core::{DashboardView, EmotionLabel, Observation, SessionSnapshot};
use moodcam_hw::{CameraError, CaptureSource, CaptureStatus};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("camera unavailable: {0}")]
    Capture(#[from] CameraError),
    #[error("{0}")]
    AssetLoad(String),
    #[error("session controller is not running")]
    ControllerGone,
}

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub poll_interval: Duration,
    /// Dominant confidence must be strictly greater than this to announce.
    pub announce_threshold: f32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            announce_threshold: 0.5,
        }
    }
}

#[derive(Debug, Default)]
pub struct SessionState {
    pub is_analyzing: bool,
    pub models_loaded: bool,
    pub model_load_error: Option<String>,
    pub capture_error: Option<String>,
    pub last_analysis: Option<Observation>,
    pub last_spoken_emotion: Option<EmotionLabel>,
    pub has_greeted: bool,
    pub pending_voice_message: Option<String>,
    pub session_id: Option<Uuid>,
}

fn local_hour() -> u32 {
    chrono::Local::now().hour()
}

pub struct SessionController<C, E, V> {
    capture: C,
    engine: E,
    voice: VoiceDispatcher<V>,
    settings: SessionSettings,
    state: SessionState,
    ticker: Option<Interval>,
    rng: StdRng,
    clock: fn() -> u32,
}

impl<C, E, V> SessionController<C, E, V>
where
    C: CaptureSource,
    E: InferenceEngine,
    V: VoiceChannel,
{
    pub fn new(capture: C, engine: E, voice: VoiceDispatcher<V>, settings: SessionSettings) -> Self {
        Self {
            capture,
            engine,
            voice,
            settings,
            state: SessionState::default(),
            ticker: None,
            rng: StdRng::from_entropy(),
            clock: local_hour,
        }
    }

    /// Replace the source of the local hour used to pick a greeting.
    #[cfg(test)]
    pub fn with_clock(mut self, clock: fn() -> u32) -> Self {
        self.clock = clock;
        self
    }

    /// Acquire the camera, load models once, greet, and start polling.
    ///
    /// Calling this on a running session restarts the polling timer
    /// without stacking a second one.
    pub async fn start_session(&mut self) -> Result<(), SessionError> {
        self.ticker = None;
        self.state.is_analyzing = false;

        if let Err(e) = self.capture.start().await {
            tracing::warn!(error = %e, "failed to start capture");
            self.state.capture_error = Some(e.to_string());
            return Err(SessionError::Capture(e));
        }
        self.state.capture_error = None;

        if !self.state.models_loaded {
            if let Err(e) = self.engine.load_assets().await {
                tracing::error!(error = %e, "failed to load models");
                let message = e.to_string();
                self.state.model_load_error = Some(message.clone());
                self.capture.stop();
                return Err(SessionError::AssetLoad(message));
            }
            self.state.models_loaded = true;
            self.state.model_load_error = None;
        }

        let session_id = *self.state.session_id.get_or_insert_with(Uuid::new_v4);

        if !self.state.has_greeted {
            let greeting = messages::greeting_for_hour((self.clock)());
            self.say(greeting);
            self.state.has_greeted = true;
        }

        // interval_at panics on a zero period.
        let period = self.settings.poll_interval.max(MIN_POLL_INTERVAL);
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.ticker = Some(ticker);
        self.state.is_analyzing = true;

        tracing::info!(session = %session_id, interval_ms = period.as_millis() as u64, "session started");
        Ok(())
    }

    /// One polling step: analyze the current frame if the camera has one.
    pub async fn tick(&mut self) {
        match self.capture.status() {
            CaptureStatus::Live => {}
            CaptureStatus::Failed(reason) => {
                tracing::warn!(error = %reason, "capture failed mid-session");
                self.stop_session();
                self.state.capture_error = Some(reason);
                return;
            }
            CaptureStatus::Stalled | CaptureStatus::Stopped => {
                tracing::trace!("no live frame; skipping tick");
                return;
            }
        }

        let Some(frame) = self.capture.current_frame() else {
            return;
        };

        match self.engine.detect_once(frame).await {
            Ok(Some(observation)) => self.observe(observation),
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "detection failed"),
        }
    }

    /// Record an observation and announce it when the dominant emotion changes.
    fn observe(&mut self, observation: Observation) {
        let emotion = observation.dominant_emotion();
        let confidence = observation.dominant_confidence();
        self.state.last_analysis = Some(observation);

        if self.state.last_spoken_emotion != Some(emotion)
            && confidence > self.settings.announce_threshold
        {
            tracing::info!(%emotion, confidence, "dominant emotion changed");
            let message = messages::emotion_message(emotion, &mut self.rng);
            self.say(message);
            self.state.last_spoken_emotion = Some(emotion);
        }
    }

    fn say(&mut self, message: &str) {
        self.state.pending_voice_message = Some(message.to_string());
        self.voice.submit(message);
    }

    /// Tear the session down. Loaded models are kept.
    pub fn stop_session(&mut self) {
        self.ticker = None;
        self.voice.cancel_all();
        self.capture.stop();

        if let Some(id) = self.state.session_id.take() {
            tracing::info!(session = %id, "session stopped");
        }
        self.state.is_analyzing = false;
        self.state.last_analysis = None;
        self.state.has_greeted = false;
        self.state.last_spoken_emotion = None;
        self.state.pending_voice_message = None;
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.voice.set_muted(muted);
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            version: env!("CARGO_PKG_VERSION").to_string(),
            session_id: self.state.session_id.map(|id| id.to_string()),
            analyzing: self.state.is_analyzing,
            models_loaded: self.state.models_loaded,
            model_error: self.state.model_load_error.clone(),
            capture_error: self.state.capture_error.clone(),
            analysis: self.state.last_analysis.as_ref().map(DashboardView::from_observation),
            last_spoken_emotion: self.state.last_spoken_emotion,
            voice_message: self.state.pending_voice_message.clone(),
            speaking: self.voice.is_speaking(),
            muted: self.voice.is_muted(),
        }
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Start { reply } => {
                let result = self.start_session().await.map(|()| self.snapshot());
                let _ = reply.send(result);
            }
            SessionCommand::Stop { reply } => {
                self.stop_session();
                let _ = reply.send(self.snapshot());
            }
            SessionCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            SessionCommand::SetMuted { muted, reply } => {
                self.set_muted(muted);
                let _ = reply.send(self.snapshot());
            }
            SessionCommand::Shutdown { .. } => {}
        }
    }
}

/// Requests handled by the controller task.
enum SessionCommand {
    Start {
        reply: oneshot::Sender<Result<SessionSnapshot, SessionError>>,
    },
    Stop {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    SetMuted {
        muted: bool,
        reply: oneshot::Sender<SessionSnapshot>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Clone-safe handle to the controller task.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| SessionError::ControllerGone)?;
        reply_rx.await.map_err(|_| SessionError::ControllerGone)
    }

    pub async fn start(&self) -> Result<SessionSnapshot, SessionError> {
        self.request(|reply| SessionCommand::Start { reply }).await?
    }

    pub async fn stop(&self) -> Result<SessionSnapshot, SessionError> {
        self.request(|reply| SessionCommand::Stop { reply }).await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        self.request(|reply| SessionCommand::Snapshot { reply }).await
    }

    pub async fn set_muted(&self, muted: bool) -> Result<SessionSnapshot, SessionError> {
        self.request(|reply| SessionCommand::SetMuted { muted, reply })
            .await
    }

    /// Stop the session and end the controller task.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::Shutdown { reply }).await
    }
}

/// Run `controller` on its own task.
///
/// The task ends on [`SessionHandle::shutdown`] or when every handle is dropped.
pub fn spawn_session<C, E, V>(controller: SessionController<C, E, V>) -> SessionHandle
where
    C: CaptureSource + 'static,
    E: InferenceEngine + 'static,
    V: VoiceChannel + 'static,
{
    let (tx, rx) = mpsc::channel(8);
    tokio::spawn(run(controller, rx));
    SessionHandle { tx }
}

enum Wake {
    Command(SessionCommand),
    Tick,
    Voice(VoiceWakeup),
}

async fn run<C, E, V>(mut controller: SessionController<C, E, V>, mut commands: mpsc::Receiver<SessionCommand>)
where
    C: CaptureSource,
    E: InferenceEngine,
    V: VoiceChannel,
{
    tracing::debug!("session controller running");
    let mut shutdown_reply = None;

    loop {
        let wake = tokio::select! {
            command = commands.recv() => match command {
                Some(command) => Wake::Command(command),
                None => break,
            },
            _ = next_tick(&mut controller.ticker) => Wake::Tick,
            wakeup = controller.voice.next_wakeup() => Wake::Voice(wakeup),
        };

        match wake {
            Wake::Command(SessionCommand::Shutdown { reply }) => {
                shutdown_reply = Some(reply);
                break;
            }
            Wake::Command(command) => controller.handle_command(command).await,
            Wake::Tick => controller.tick().await,
            Wake::Voice(wakeup) => controller.voice.handle(wakeup),
        }
    }

    controller.stop_session();
    tracing::debug!("session controller exited");
    if let Some(reply) = shutdown_reply {
        let _ = reply.send(());
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
