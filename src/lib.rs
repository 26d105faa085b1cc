//! Proctor Guardian - unattended exam monitoring engine.
//!
//! Watches a live camera feed, flags sustained suspicious motion, annotates
//! frames with emotion and object detections, keeps snapshot evidence and
//! republishes the annotated feed as a multipart JPEG stream.
//!
//! # Core Components
//!
//! * [`config`] - Configuration loaded from environment variables
//! * [`capture`] - Frame sources (HTTP snapshot cameras, image directories)
//! * [`motion`] - Frame-differencing motion analysis
//! * [`alarm`] - Debounced alarm state machine
//! * [`annotation`] - Failure-isolated emotion/object annotation pipeline
//! * [`emotion`] - Emotion stage with rolling-window smoothing
//! * [`detector`] - YOLO/Darknet object stage with non-maximum suppression
//! * [`snapshot`] - Motion evidence files
//! * [`stream`] - Multipart JPEG stream encoding
//! * [`alerts`] - Audible, dashboard and Discord alarm notifications
//! * [`monitor`] - The per-tick pipeline and its owning worker thread
//! * [`error`] - Error types
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use proctor_guardian::*;
//!
//! let config = Config::load()?;
//! let handle = MonitorHandle::spawn(move || Monitor::from_config(&config))?;
//!
//! // Poll the alarm and serve the live feed.
//! let status = handle.motion_status();
//! for segment in handle.stream() {
//!     // write `segment` to a `multipart/x-mixed-replace; boundary=frame` response
//!     # let _ = (status, segment);
//!     # break;
//! }
//! # Ok::<(), ProctorError>(())
//! ```

pub mod alarm;
pub mod alerts;
pub mod annotation;
pub mod capture;
pub mod config;
pub mod detector;
#[cfg(feature = "opencv")]
pub mod device;
pub mod emotion;
pub mod error;
pub mod monitor;
pub mod motion;
pub mod snapshot;
pub mod stream;

// Re-export commonly used types for convenience
pub use alarm::{AlarmPhase, AlarmState, AlarmStateMachine};
pub use alerts::{AlarmEvent, AlertNotifier};
pub use annotation::{AnnotationPipeline, AnnotationStage, Annotations, Overlay, StageOutcome};
pub use capture::{DirectorySource, Frame, FrameSource, HttpCamera};
pub use config::{CameraSource, Config};
pub use detector::{Detection, ObjectDetector, Proposal, ProposalModel};
pub use emotion::{Emotion, EmotionDetector, EmotionModel, EmotionScores};
pub use error::ProctorError;
pub use monitor::{Monitor, MonitorHandle, MotionStatus, TickOutcome};
pub use motion::{MotionAnalyzer, MotionEvent};
pub use snapshot::{Snapshot, SnapshotWriter};
pub use stream::FrameStream;
