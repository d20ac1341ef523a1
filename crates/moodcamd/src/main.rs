use anyhow::{Context, Result};
use moodcam_hw::{CameraSettings, CameraSource};
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod session;
mod voice;

use config::Config;
use dbus_interface::MoodCamService;
use session::{SessionController, SessionSettings};
use voice::{EspeakVoice, VoiceDispatcher};

const BUS_NAME: &str = "org.freedesktop.MoodCam1";
const OBJECT_PATH: &str = "/org/freedesktop/MoodCam1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "moodcamd starting");

    let config = Config::from_env();
    tracing::info!(
        camera = %config.camera_device,
        models = %config.model_dir.display(),
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        voice = %config.voice_program,
        muted = config.muted,
        "configuration loaded"
    );

    let missing = moodcam_core::ModelSet::new(&config.model_dir).missing();
    if !missing.is_empty() {
        // Not fatal: the first StartSession reports it and can be retried.
        tracing::warn!(?missing, "model files missing");
    }

    let capture = CameraSource::new(CameraSettings {
        device_path: config.camera_device.clone(),
        width: config.capture_width,
        height: config.capture_height,
        stale_after: config.stale_frame,
    });
    let engine = engine::spawn_engine(config.model_dir.clone()).context("failed to spawn engine thread")?;
    let voice = VoiceDispatcher::new(
        EspeakVoice::new(config.voice_program.clone(), config.voice_rate),
        config.voice_delay,
        config.muted,
    );
    let settings = SessionSettings {
        poll_interval: config.poll_interval,
        announce_threshold: config.announce_threshold,
    };

    let session = session::spawn_session(SessionController::new(capture, engine, voice, settings));

    let _conn = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(
            OBJECT_PATH,
            MoodCamService {
                session: session.clone(),
            },
        )?
        .build()
        .await
        .context("failed to register on the session bus")?;

    tracing::info!(bus = BUS_NAME, path = OBJECT_PATH, "moodcamd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("moodcamd shutting down");
    session.shutdown().await?;

    Ok(())
}
