use anyhow::Result;
use log::{error, info, warn};
use std::time::Duration;
use std::{fs, thread};

use proctor_guardian::config::CameraSource;
use proctor_guardian::{Config, Monitor, MonitorHandle, MotionStatus};

const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Proctor Guardian - unattended exam monitoring daemon.
///
/// Watches the exam camera, counts motion events and raises an alarm when
/// motion keeps recurring inside the reset window. Every motion frame is kept
/// as evidence under the snapshot directory.
///
/// # Environment Variables
///
/// Camera (first match wins):
/// * `CAMERA_URL` - JPEG snapshot URL(s), comma-separated for round robin
/// * `CAMERA_DIR` - Directory of images replayed in name order
/// * `CAMERA_INDEX` - Local camera index (default: 0, needs the `opencv` feature)
///
/// Detector (missing files are fatal):
/// * `MODEL_CFG` (default: "./yolov4.cfg")
/// * `WEIGHTS_FILE` (default: "./yolov4.weights")
/// * `LABEL_FILE` (default: "./coco.names")
///
/// Alarm and evidence:
/// * `MOTION_THRESHOLD` (default: 5), `RESET_INTERVAL_SECONDS` (default: 5)
/// * `MIN_CONTOUR_AREA` (default: 5000)
/// * `SNAPSHOT_DIR` (default: "./static/snapshots")
/// * `DASHBOARD_ALERT_URL` (default: "http://localhost:5000/trigger_alert")
/// * `DISCORD_WEBHOOK`, `EMOTION_API_URL`, `FONT_FILE` (optional)
///
/// # Usage
///
/// ```bash
/// export CAMERA_URL="http://camera.local/snapshot.jpg"
/// export EMOTION_API_URL="http://localhost:5005/analyze"
/// ./proctor-guardian
/// ```
fn main() -> Result<()> {
    // Initialize logger to output to stdout, using RUST_LOG env var or info level by default
    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Stdout)
        .filter_level(
            std::env::var("RUST_LOG")
                .ok()
                .and_then(|level| level.parse().ok())
                .unwrap_or(log::LevelFilter::Info),
        )
        .init();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            error!(
                "Failed to load configuration. Please check the environment variables: {}",
                e
            );
            return Err(e.into());
        }
    };

    info!("Proctor Guardian starting...");
    match &config.camera {
        CameraSource::Device(index) => info!("Camera: device {}", index),
        CameraSource::Http(urls) => info!("Camera: {}", urls.join(", ")),
        CameraSource::Directory(dir) => info!("Camera: replaying {}", dir.display()),
    }
    info!(
        "Alarm fires after more than {} motion events within {:?}",
        config.motion_threshold, config.reset_interval
    );

    let handle = match MonitorHandle::spawn(move || Monitor::from_config(&config)) {
        Ok(handle) => handle,
        Err(e) => {
            error!("Startup failed: {}", e);
            return Err(e.into());
        }
    };

    // Create .ready file to indicate the application is fully initialized
    fs::write(".ready", "ready")?;
    info!("Application ready - created .ready file for healthcheck");

    // Main monitoring loop: report alarm transitions until the feed ends
    let mut last_status = MotionStatus::default();
    while handle.is_running() {
        let status = handle.motion_status();
        if status.motion_detected != last_status.motion_detected {
            if status.motion_detected {
                warn!(
                    "Suspicious motion alarm active ({} motion events)",
                    status.motion_count
                );
            } else {
                info!("Alarm window reset, monitoring continues");
            }
        }
        last_status = status;
        thread::sleep(STATUS_POLL_INTERVAL);
    }

    if let Ok(snapshots) = handle.snapshots() {
        info!("{} snapshot(s) on record", snapshots.len());
    }
    handle.join();
    info!("Proctor Guardian stopped");
    Ok(())
}
