use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use moodcam_core::{ModelSet, SessionSnapshot};
use moodcam_hw::Camera;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "moodcam", about = "MoodCam emotion feedback CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an analysis session
    Start,
    /// Stop the current session
    Stop,
    /// Show the dashboard and voice caption
    Status {
        /// Print the raw JSON snapshot
        #[arg(long)]
        json: bool,
    },
    /// Silence voice feedback
    Mute,
    /// Re-enable voice feedback
    Unmute,
    /// Check that the model files are installed
    Models {
        /// Model directory (default: $MOODCAM_MODEL_DIR or the XDG data dir)
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Run camera diagnostics (bypasses the daemon)
    Test {
        /// Camera device
        #[arg(long, default_value = "/dev/video0")]
        device: String,
        /// Save the captured frame as an image
        #[arg(long)]
        save: Option<PathBuf>,
    },
}

#[zbus::proxy(
    interface = "org.freedesktop.MoodCam1",
    default_service = "org.freedesktop.MoodCam1",
    default_path = "/org/freedesktop/MoodCam1"
)]
trait MoodCam {
    async fn start_session(&self) -> zbus::Result<String>;
    async fn stop_session(&self) -> zbus::Result<()>;
    async fn status(&self) -> zbus::Result<String>;
    async fn set_muted(&self, muted: bool) -> zbus::Result<()>;
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start => {
            let proxy = connect().await?;
            let snapshot = parse(&proxy.start_session().await?)?;
            print!("{snapshot}");
        }
        Commands::Stop => {
            connect().await?.stop_session().await?;
            println!("Session stopped");
        }
        Commands::Status { json } => {
            let raw = connect().await?.status().await?;
            if json {
                println!("{raw}");
            } else {
                print!("{}", parse(&raw)?);
            }
        }
        Commands::Mute => {
            connect().await?.set_muted(true).await?;
            println!("Voice feedback muted");
        }
        Commands::Unmute => {
            connect().await?.set_muted(false).await?;
            println!("Voice feedback unmuted");
        }
        Commands::Models { dir } => check_models(dir)?,
        Commands::Test { device, save } => run_camera_test(&device, save)?,
    }

    Ok(())
}

async fn connect() -> Result<MoodCamProxy<'static>> {
    let conn = zbus::Connection::session()
        .await
        .context("failed to connect to the session bus")?;
    tracing::debug!(unique_name = ?conn.unique_name(), "connected to session bus");
    MoodCamProxy::new(&conn)
        .await
        .context("moodcamd is not reachable; is it running?")
}

fn parse(raw: &str) -> Result<SessionSnapshot> {
    serde_json::from_str(raw).context("unexpected status payload from moodcamd")
}

fn check_models(dir: Option<PathBuf>) -> Result<()> {
    let dir = dir
        .or_else(|| std::env::var_os("MOODCAM_MODEL_DIR").map(PathBuf::from))
        .unwrap_or_else(moodcam_core::default_model_dir);
    let models = ModelSet::new(dir);

    println!("Model directory: {}", models.dir.display());
    for (name, path) in models.files() {
        let state = if path.exists() { "ok" } else { "missing" };
        println!("  {name:<24} {state}");
    }

    let missing = models.missing();
    if !missing.is_empty() {
        bail!("{} model file(s) missing", missing.len());
    }
    Ok(())
}

fn run_camera_test(device: &str, save: Option<PathBuf>) -> Result<()> {
    println!("Running camera diagnostics...");

    let devices = Camera::list_devices();
    tracing::debug!(count = devices.len(), "enumerated capture devices");
    if devices.is_empty() {
        println!("No video capture devices found");
    }
    for dev in &devices {
        println!("  {}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
    }

    let camera = Camera::open(device, 1280, 720)?;
    println!(
        "Opened {device}: {}x{} {:?}",
        camera.width, camera.height, camera.fourcc
    );

    let frame = camera.capture_frame()?;
    tracing::debug!(seq = frame.sequence, bytes = frame.data.len(), "captured diagnostic frame");
    println!(
        "Captured frame #{}: average brightness {:.1}",
        frame.sequence,
        frame.avg_brightness()
    );

    if let Some(path) = save {
        let image = image::GrayImage::from_raw(frame.width, frame.height, frame.data)
            .context("captured frame has an unexpected size")?;
        image
            .save(&path)
            .with_context(|| format!("failed to save {}", path.display()))?;
        println!("Saved frame to {}", path.display());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_status_json_flag() {
        let cli = Cli::try_parse_from(["moodcam", "status", "--json"]).unwrap();
        assert!(matches!(cli.command, Commands::Status { json: true }));
    }

    #[test]
    fn test_test_defaults_to_first_camera() {
        let cli = Cli::try_parse_from(["moodcam", "test"]).unwrap();
        match cli.command {
            Commands::Test { device, save } => {
                assert_eq!(device, "/dev/video0");
                assert!(save.is_none());
            }
            _ => panic!("expected test subcommand"),
        }
    }

    #[test]
    fn test_parse_snapshot() {
        let snapshot = SessionSnapshot {
            version: "0.1.0".into(),
            analyzing: true,
            ..Default::default()
        };
        let raw = serde_json::to_string(&snapshot).unwrap();
        assert_eq!(parse(&raw).unwrap(), snapshot);
        assert!(parse("not json").is_err());
    }

    #[test]
    fn test_check_models_reports_missing() {
        let err = check_models(Some(PathBuf::from("/nonexistent/moodcam-models"))).unwrap_err();
        assert!(err.to_string().contains("3 model file(s) missing"));
    }
}
