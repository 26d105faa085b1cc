use std::fmt;

/// Error types for the proctoring engine.
///
/// Only startup (configuration/model loading) and capture failures propagate
/// out of the engine. Detector and notifier failures are absorbed at their
/// stage boundary and only logged, so their variants exist mostly to give
/// those log lines a consistent shape.

/// Main error type for proctoring operations.
#[derive(Debug)]
pub enum ProctorError {
    /// Errors related to reading frames from the camera.
    Capture(CaptureError),

    /// Errors raised by the motion analyzer.
    Motion(MotionError),

    /// Errors related to emotion/object detection.
    Detection(DetectionError),

    /// Errors related to alarm notifications.
    Alert(AlertError),

    /// Configuration and startup errors.
    Config(ConfigError),

    /// Evidence storage errors.
    Storage(StorageError),
}

/// Errors specific to frame capture.
#[derive(Debug)]
pub enum CaptureError {
    /// The camera device could not be opened.
    DeviceUnavailable { device: String, reason: String },

    /// A frame could not be read after exhausting retries.
    ReadFailed { source: String, attempts: u32, reason: String },

    /// The captured bytes could not be decoded into an image.
    DecodeFailed { source: String, reason: String },
}

/// Errors raised by the motion analyzer.
#[derive(Debug)]
pub enum MotionError {
    /// Frame dimensions changed mid-stream.
    DimensionMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },
}

/// Errors specific to the annotation stages.
#[derive(Debug)]
pub enum DetectionError {
    /// Model configuration file could not be loaded.
    ModelConfigLoadFailed { path: String, reason: String },

    /// Labels file could not be read or parsed.
    LabelsLoadFailed { path: String, reason: String },

    /// Inference failed for a single frame.
    InferenceFailed { stage: &'static str, reason: String },

    /// The emotion backend answered with a body we could not interpret.
    MalformedResponse { reason: String },

    /// Model weights download failed.
    WeightsDownloadFailed { url: String, reason: String },
}

/// Errors specific to alarm notifications.
#[derive(Debug)]
pub enum AlertError {
    /// Dashboard or webhook request failed.
    RequestFailed { url: String, reason: String },

    /// The local audible alert could not be produced.
    AudioUnavailable { reason: String },
}

/// Errors related to configuration and application setup.
#[derive(Debug)]
pub enum ConfigError {
    /// No usable camera source could be configured.
    NoCameraSource { reason: String },

    /// Invalid configuration values provided.
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    /// Required file path does not exist.
    MissingFile { path: String },
}

/// Errors related to evidence storage.
#[derive(Debug)]
pub enum StorageError {
    /// The evidence directory could not be created.
    DirectoryCreateFailed { path: String, reason: String },

    /// A snapshot could not be written.
    WriteFailed { path: String, reason: String },

    /// A processed frame could not be JPEG-encoded.
    EncodeFailed { reason: String },
}

impl fmt::Display for ProctorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProctorError::Capture(e) => write!(f, "Capture error: {}", e),
            ProctorError::Motion(e) => write!(f, "Motion error: {}", e),
            ProctorError::Detection(e) => write!(f, "Detection error: {}", e),
            ProctorError::Alert(e) => write!(f, "Alert error: {}", e),
            ProctorError::Config(e) => write!(f, "Configuration error: {}", e),
            ProctorError::Storage(e) => write!(f, "Storage error: {}", e),
        }
    }
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::DeviceUnavailable { device, reason } => {
                write!(f, "Camera '{}' is unavailable: {}", device, reason)
            }
            CaptureError::ReadFailed {
                source,
                attempts,
                reason,
            } => {
                write!(
                    f,
                    "Failed to read a frame from '{}' after {} attempt(s): {}",
                    source, attempts, reason
                )
            }
            CaptureError::DecodeFailed { source, reason } => {
                write!(f, "Failed to decode frame from '{}': {}", source, reason)
            }
        }
    }
}

impl fmt::Display for MotionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MotionError::DimensionMismatch { expected, actual } => {
                write!(
                    f,
                    "Frame size changed mid-stream: baseline is {}x{}, frame is {}x{}",
                    expected.0, expected.1, actual.0, actual.1
                )
            }
        }
    }
}

impl fmt::Display for DetectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectionError::ModelConfigLoadFailed { path, reason } => {
                write!(f, "Failed to load model from '{}': {}", path, reason)
            }
            DetectionError::LabelsLoadFailed { path, reason } => {
                write!(f, "Failed to load labels from '{}': {}", path, reason)
            }
            DetectionError::InferenceFailed { stage, reason } => {
                write!(f, "{} inference failed: {}", stage, reason)
            }
            DetectionError::MalformedResponse { reason } => {
                write!(f, "Malformed emotion response: {}", reason)
            }
            DetectionError::WeightsDownloadFailed { url, reason } => {
                write!(
                    f,
                    "Failed to download model weights from '{}': {}",
                    url, reason
                )
            }
        }
    }
}

impl fmt::Display for AlertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertError::RequestFailed { url, reason } => {
                write!(f, "Alert request to '{}' failed: {}", url, reason)
            }
            AlertError::AudioUnavailable { reason } => {
                write!(f, "Audible alert unavailable: {}", reason)
            }
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::NoCameraSource { reason } => {
                write!(f, "No camera source available: {}", reason)
            }
            ConfigError::InvalidValue {
                field,
                value,
                reason,
            } => {
                write!(
                    f,
                    "Invalid value '{}' for field '{}': {}",
                    value, field, reason
                )
            }
            ConfigError::MissingFile { path } => {
                write!(f, "Required file not found: {}", path)
            }
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::DirectoryCreateFailed { path, reason } => {
                write!(f, "Failed to create evidence directory '{}': {}", path, reason)
            }
            StorageError::WriteFailed { path, reason } => {
                write!(f, "Failed to write snapshot '{}': {}", path, reason)
            }
            StorageError::EncodeFailed { reason } => {
                write!(f, "Failed to encode frame: {}", reason)
            }
        }
    }
}

impl std::error::Error for ProctorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProctorError::Capture(e) => Some(e),
            ProctorError::Motion(e) => Some(e),
            ProctorError::Detection(e) => Some(e),
            ProctorError::Alert(e) => Some(e),
            ProctorError::Config(e) => Some(e),
            ProctorError::Storage(e) => Some(e),
        }
    }
}

impl std::error::Error for CaptureError {}
impl std::error::Error for MotionError {}
impl std::error::Error for DetectionError {}
impl std::error::Error for AlertError {}
impl std::error::Error for ConfigError {}
impl std::error::Error for StorageError {}

impl From<CaptureError> for ProctorError {
    fn from(err: CaptureError) -> Self {
        ProctorError::Capture(err)
    }
}

impl From<MotionError> for ProctorError {
    fn from(err: MotionError) -> Self {
        ProctorError::Motion(err)
    }
}

impl From<DetectionError> for ProctorError {
    fn from(err: DetectionError) -> Self {
        ProctorError::Detection(err)
    }
}

impl From<AlertError> for ProctorError {
    fn from(err: AlertError) -> Self {
        ProctorError::Alert(err)
    }
}

impl From<ConfigError> for ProctorError {
    fn from(err: ConfigError) -> Self {
        ProctorError::Config(err)
    }
}

impl From<StorageError> for ProctorError {
    fn from(err: StorageError) -> Self {
        ProctorError::Storage(err)
    }
}
