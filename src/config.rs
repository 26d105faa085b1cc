use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Where frames come from.
#[derive(Debug, Clone, PartialEq)]
pub enum CameraSource {
    /// Local camera device by index (requires the `opencv` feature).
    Device(i32),
    /// One or more JPEG snapshot URLs, fetched round robin.
    Http(Vec<String>),
    /// A directory of still images replayed in file-name order.
    Directory(PathBuf),
}

/// Configuration for the proctoring engine loaded from environment variables.
///
/// Every value has a default except the optional integrations (Discord,
/// emotion backend, overlay font), which stay disabled when unset.
#[derive(Debug, Clone)]
pub struct Config {
    /// Camera to monitor.
    ///
    /// Environment variables: `CAMERA_URL` (comma-separated), `CAMERA_DIR`,
    /// otherwise `CAMERA_INDEX` (default 0).
    pub camera: CameraSource,

    /// The object-detector config file, which usually has a .cfg extension.
    /// Environment variable: `MODEL_CFG`
    pub model_cfg: PathBuf,

    /// The object-detector weights file.
    /// Environment variable: `WEIGHTS_FILE`
    pub weights: PathBuf,

    /// The file including label names per class, one per line.
    /// Environment variable: `LABEL_FILE`
    pub label_file: PathBuf,

    /// Optional URL to download the weights from when the file is absent.
    /// Environment variable: `WEIGHTS_URL`
    pub weights_url: Option<String>,

    /// Evidence directory for motion snapshots.
    /// Environment variable: `SNAPSHOT_DIR`
    pub snapshot_dir: PathBuf,

    /// Number of detections that must be strictly exceeded before the alarm fires.
    /// Environment variable: `MOTION_THRESHOLD`
    pub motion_threshold: u32,

    /// Window after which the motion counter and trigger flag are cleared.
    /// Environment variable: `RESET_INTERVAL_SECONDS`
    pub reset_interval: Duration,

    /// Motion regions smaller than this many square pixels are treated as noise.
    /// Environment variable: `MIN_CONTOUR_AREA`
    pub min_contour_area: f64,

    /// Dashboard endpoint called on every alarm. Empty disables the call.
    /// Environment variable: `DASHBOARD_ALERT_URL`
    pub dashboard_alert_url: Option<String>,

    /// Discord webhook receiving the alarm snapshot.
    /// Environment variable: `DISCORD_WEBHOOK`
    pub discord_webhook: Option<String>,

    /// Emotion inference endpoint. Unset disables the emotion stage.
    /// Environment variable: `EMOTION_API_URL`
    pub emotion_api_url: Option<String>,

    /// TrueType font used for overlay text.
    ///
    /// Detection labels with their confidence and the `Emotion: <label>`
    /// caption are only drawn when this is set. Without it annotated frames
    /// carry the detection boxes alone and a warning is logged at startup.
    /// Environment variable: `FONT_FILE`
    pub font_file: Option<PathBuf>,

    /// Ring the terminal bell when the alarm fires.
    /// Environment variable: `AUDIBLE_ALERT`
    pub audible_alert: bool,

    /// Flip captured frames vertically (upside-down mounted cameras).
    /// Environment variable: `FLIP_IMAGE`
    pub flip_image: bool,

    /// JPEG quality for the stream and the snapshots.
    /// Environment variable: `JPEG_QUALITY`
    pub jpeg_quality: u8,
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but cannot be parsed.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    ///
    /// `load` uses the process environment; tests pass a map.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let camera = if let Some(urls) = get("CAMERA_URL") {
            CameraSource::Http(
                urls.split(',')
                    .map(|u| u.trim().to_string())
                    .filter(|u| !u.is_empty())
                    .collect(),
            )
        } else if let Some(dir) = get("CAMERA_DIR") {
            CameraSource::Directory(PathBuf::from(dir))
        } else {
            CameraSource::Device(parse_or("CAMERA_INDEX", get("CAMERA_INDEX"), 0)?)
        };

        let model_cfg = PathBuf::from(get("MODEL_CFG").unwrap_or_else(|| "./yolov4.cfg".into()));
        let weights =
            PathBuf::from(get("WEIGHTS_FILE").unwrap_or_else(|| "./yolov4.weights".into()));
        let label_file = PathBuf::from(get("LABEL_FILE").unwrap_or_else(|| "./coco.names".into()));

        let snapshot_dir =
            PathBuf::from(get("SNAPSHOT_DIR").unwrap_or_else(|| "./static/snapshots".into()));

        let motion_threshold = parse_or("MOTION_THRESHOLD", get("MOTION_THRESHOLD"), 5)?;
        let reset_seconds: u64 =
            parse_or("RESET_INTERVAL_SECONDS", get("RESET_INTERVAL_SECONDS"), 5)?;
        let min_contour_area = parse_or("MIN_CONTOUR_AREA", get("MIN_CONTOUR_AREA"), 5000.0)?;

        // An explicitly empty DASHBOARD_ALERT_URL disables the call.
        let dashboard_alert_url = match lookup("DASHBOARD_ALERT_URL") {
            Some(url) if url.trim().is_empty() => None,
            Some(url) => Some(url),
            None => Some(constants::DEFAULT_DASHBOARD_ALERT_URL.to_string()),
        };

        let jpeg_quality: u8 = parse_or("JPEG_QUALITY", get("JPEG_QUALITY"), 80)?;
        if jpeg_quality == 0 || jpeg_quality > 100 {
            return Err(ConfigError::InvalidValue {
                field: "JPEG_QUALITY".into(),
                value: jpeg_quality.to_string(),
                reason: "must be between 1 and 100".into(),
            });
        }

        Ok(Config {
            camera,
            model_cfg,
            weights,
            label_file,
            weights_url: get("WEIGHTS_URL"),
            snapshot_dir,
            motion_threshold,
            reset_interval: Duration::from_secs(reset_seconds),
            min_contour_area,
            dashboard_alert_url,
            discord_webhook: get("DISCORD_WEBHOOK"),
            emotion_api_url: get("EMOTION_API_URL"),
            font_file: get("FONT_FILE").map(PathBuf::from),
            audible_alert: parse_or("AUDIBLE_ALERT", get("AUDIBLE_ALERT"), true)?,
            flip_image: parse_or("FLIP_IMAGE", get("FLIP_IMAGE"), false)?,
            jpeg_quality,
        })
    }

    /// Check that every model file the object detector needs is on disk.
    ///
    /// A missing file is a startup failure: the engine refuses to run
    /// without its detector rather than run degraded.
    pub fn validate_model_files(&self) -> Result<(), ConfigError> {
        for path in [&self.model_cfg, &self.weights, &self.label_file] {
            require_file(path)?;
        }
        Ok(())
    }
}

fn require_file(path: &Path) -> Result<(), ConfigError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(ConfigError::MissingFile {
            path: path.display().to_string(),
        })
    }
}

fn parse_or<T>(field: &str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue {
                field: field.to_string(),
                value,
                reason: e.to_string(),
            }),
    }
}

/// Fixed algorithm constants.
pub mod constants {
    /// Gaussian sigma matching a 21x21 kernel with automatic sigma.
    pub const BLUR_SIGMA: f32 = 3.5;

    /// Intensity difference above which a pixel counts as changed.
    pub const PIXEL_DIFF_THRESHOLD: u8 = 30;

    /// Dilation radius used to merge nearby motion fragments.
    pub const DILATE_RADIUS: u8 = 2;

    /// Side length of the square object-detector input.
    pub const DETECTOR_INPUT_SIZE: u32 = 416;

    /// Minimum top-class confidence for an object proposal.
    pub const DETECTION_CONFIDENCE_THRESHOLD: f32 = 0.5;

    /// Maximum IoU allowed between two surviving detections.
    pub const NMS_IOU_THRESHOLD: f32 = 0.4;

    /// Number of emotion score sets averaged together.
    pub const EMOTION_WINDOW: usize = 10;

    /// Maximum attempts for one HTTP camera snapshot.
    pub const CAPTURE_MAX_RETRIES: u32 = 5;

    /// Delay between snapshot attempts in milliseconds.
    pub const CAPTURE_RETRY_DELAY_MS: u64 = 500;

    /// Frames buffered per stream subscriber before new frames are dropped.
    pub const STREAM_BUFFER_FRAMES: usize = 4;

    /// Pitch of the local alarm tone.
    pub const ALERT_TONE_HZ: f32 = 1000.0;

    /// Length of the local alarm tone in milliseconds.
    pub const ALERT_TONE_DURATION_MS: u64 = 1000;

    pub const DEFAULT_DASHBOARD_ALERT_URL: &str = "http://localhost:5000/trigger_alert";
}
