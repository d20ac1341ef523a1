use crate::session::{SessionError, SessionHandle};
use moodcam_core::SessionSnapshot;
use zbus::interface;

/// D-Bus interface for the MoodCam daemon.
///
/// Bus name: org.freedesktop.MoodCam1
/// Object path: /org/freedesktop/MoodCam1
pub struct MoodCamService {
    pub session: SessionHandle,
}

fn failed(e: SessionError) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(e.to_string())
}

fn to_json(snapshot: &SessionSnapshot) -> zbus::fdo::Result<String> {
    serde_json::to_string(snapshot).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

#[interface(name = "org.freedesktop.MoodCam1")]
impl MoodCamService {
    /// Start (or restart) an analysis session. Returns the session status as JSON.
    async fn start_session(&self) -> zbus::fdo::Result<String> {
        tracing::info!("start_session requested");
        let snapshot = self.session.start().await.map_err(|e| {
            tracing::warn!(error = %e, "start_session failed");
            failed(e)
        })?;
        to_json(&snapshot)
    }

    /// End the current session. Safe to call when none is running.
    async fn stop_session(&self) -> zbus::fdo::Result<()> {
        tracing::info!("stop_session requested");
        self.session.stop().await.map_err(failed)?;
        Ok(())
    }

    /// Current dashboard, voice caption and errors as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let snapshot = self.session.snapshot().await.map_err(failed)?;
        to_json(&snapshot)
    }

    async fn set_muted(&self, muted: bool) -> zbus::fdo::Result<()> {
        self.session.set_muted(muted).await.map_err(failed)?;
        Ok(())
    }
}
