//! The per-tick proctoring pipeline and the worker that owns it.
//!
//! [`Monitor`] runs one synchronous tick at a time:
//! capture → motion → alarm → {snapshot, alert} → annotation → JPEG.
//!
//! [`MonitorHandle::spawn`] confines a `Monitor` (and therefore the camera,
//! the models and the alarm state) to a single worker thread. Callers never
//! touch the camera directly: they read the latest [`MotionStatus`] and
//! subscribe to the broadcast of encoded frames.

use bytes::Bytes;
use chrono::{DateTime, Local};
use crossbeam::channel::{self, Sender, TrySendError};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crate::alarm::{AlarmState, AlarmStateMachine};
use crate::alerts::{AlarmEvent, AlertNotifier};
use crate::annotation::{AnnotationPipeline, Annotations, Overlay};
use crate::capture::{self, FrameSource};
use crate::config::{Config, constants};
use crate::detector::ObjectDetector;
use crate::emotion::{EmotionDetector, RemoteEmotionModel};
use crate::error::{CaptureError, ConfigError, ProctorError, StorageError};
use crate::motion::{MotionAnalyzer, MotionEvent};
use crate::snapshot::{Snapshot, SnapshotWriter, list_snapshots};
use crate::stream::{FrameStream, encode_jpeg, multipart_segment};

/// Body of the motion poll endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MotionStatus {
    /// The alarm has fired in the current reset window.
    pub motion_detected: bool,
    /// Motion events counted in the current window.
    pub motion_count: u32,
    /// The alarm fired on the most recent frame.
    pub alarm_fired: bool,
    /// The most recent frame contained motion.
    pub frame_motion: bool,
}

/// Everything one tick produced.
#[derive(Debug, Clone)]
pub struct TickOutcome {
    pub timestamp: DateTime<Local>,
    pub motion: MotionEvent,
    pub alarm_fired: bool,
    pub alarm: AlarmState,
    pub snapshot: Option<Snapshot>,
    pub annotations: Annotations,
    /// The fully annotated frame as JPEG.
    pub jpeg: Bytes,
}

impl TickOutcome {
    pub fn status(&self) -> MotionStatus {
        MotionStatus {
            motion_detected: self.alarm.triggered,
            motion_count: self.alarm.motion_count,
            alarm_fired: self.alarm_fired,
            frame_motion: self.motion.detected,
        }
    }

    /// The frame wrapped as a multipart stream segment.
    pub fn segment(&self) -> Bytes {
        multipart_segment(&self.jpeg)
    }
}

/// The proctoring pipeline for one camera.
pub struct Monitor {
    source: Box<dyn FrameSource>,
    motion: MotionAnalyzer,
    alarm: AlarmStateMachine,
    annotations: AnnotationPipeline,
    snapshots: SnapshotWriter,
    notifier: Option<AlertNotifier>,
    jpeg_quality: u8,
}

impl Monitor {
    pub fn new(
        source: Box<dyn FrameSource>,
        motion: MotionAnalyzer,
        alarm: AlarmStateMachine,
        annotations: AnnotationPipeline,
        snapshots: SnapshotWriter,
    ) -> Self {
        Self {
            source,
            motion,
            alarm,
            annotations,
            snapshots,
            notifier: None,
            jpeg_quality: 80,
        }
    }

    pub fn with_notifier(mut self, notifier: AlertNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }

    /// Build the full pipeline from configuration.
    ///
    /// Models are loaded before the camera is opened. Missing model files,
    /// an unreadable font or an unusable camera are fatal.
    pub fn from_config(config: &Config) -> Result<Self, ProctorError> {
        if let Some(url) = &config.weights_url {
            ObjectDetector::ensure_weights_downloaded(&config.weights, url)?;
        }
        config.validate_model_files()?;

        let objects = ObjectDetector::load(&config.model_cfg, &config.weights, &config.label_file)?;

        let emotion = match &config.emotion_api_url {
            Some(url) => {
                let model = RemoteEmotionModel::new(url.clone()).map_err(|e| {
                    ConfigError::InvalidValue {
                        field: "EMOTION_API_URL".into(),
                        value: url.clone(),
                        reason: e.to_string(),
                    }
                })?;
                info!("Emotion stage enabled via {}", url);
                Some(EmotionDetector::new(Box::new(model), constants::EMOTION_WINDOW))
            }
            None => {
                info!("Emotion stage disabled (EMOTION_API_URL not set)");
                None
            }
        };

        let overlay = Overlay::load(config.font_file.as_deref())?;
        if !overlay.has_font() {
            warn!(
                "No FONT_FILE configured; detection labels and emotion text will not be drawn, only boxes"
            );
        }

        let snapshots = SnapshotWriter::new(&config.snapshot_dir, config.jpeg_quality)?;

        let notifier = AlertNotifier::new(
            config.dashboard_alert_url.clone(),
            config.discord_webhook.clone(),
            config.audible_alert,
        )
        .map_err(|e| ConfigError::InvalidValue {
            field: "DASHBOARD_ALERT_URL".into(),
            value: config.dashboard_alert_url.clone().unwrap_or_default(),
            reason: e.to_string(),
        })?;

        let source = capture::open_source(config)?;
        info!("Monitoring {}", source.describe());

        Ok(Self::new(
            source,
            MotionAnalyzer::new(config.min_contour_area),
            AlarmStateMachine::new(config.motion_threshold, config.reset_interval),
            AnnotationPipeline::new(emotion, Some(objects), overlay),
            snapshots,
        )
        .with_notifier(notifier)
        .with_jpeg_quality(config.jpeg_quality))
    }

    pub fn snapshot_dir(&self) -> PathBuf {
        self.snapshots.dir().to_path_buf()
    }

    pub fn alarm(&self) -> &AlarmStateMachine {
        &self.alarm
    }

    /// Capture and fully process one frame.
    ///
    /// Returns `Ok(None)` when the camera has no more frames.
    ///
    /// # Errors
    ///
    /// Capture failures are returned as [`ProctorError::Capture`] and end the
    /// feed. A frame whose size differs from the previous one is rejected
    /// with [`ProctorError::Motion`]; the feed may continue after that.
    pub fn analyze_tick(&mut self) -> Result<Option<TickOutcome>, ProctorError> {
        let frame = match self.source.read() {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(None),
            Err(e) => return Err(self.capture_error(e).into()),
        };
        let now = Instant::now();

        let (mut frame, motion) = self.motion.analyze(frame)?;
        let alarm_fired = self.alarm.update(motion.detected, now);

        let snapshot = match self.snapshots.maybe_save(&frame, &motion) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!("{}", e);
                None
            }
        };

        let annotations = self.annotations.run(&mut frame);

        let jpeg = encode_jpeg(&frame.image, self.jpeg_quality).map_err(|e| {
            StorageError::EncodeFailed {
                reason: e.to_string(),
            }
        })?;

        let alarm = self.alarm.state();
        if alarm_fired {
            warn!(
                "Suspicious motion: alarm fired after {} motion events",
                alarm.motion_count
            );
            if let Some(notifier) = &self.notifier {
                notifier.notify(AlarmEvent {
                    motion_count: alarm.motion_count,
                    timestamp: frame.timestamp,
                    image: Some(jpeg.clone()),
                });
            }
        }

        Ok(Some(TickOutcome {
            timestamp: frame.timestamp,
            motion,
            alarm_fired,
            alarm,
            snapshot,
            annotations,
            jpeg,
        }))
    }

    /// Turn the monitor into a lazy stream of multipart segments.
    ///
    /// The stream ends, without error, when the camera stops producing
    /// frames; the camera is released at that point.
    pub fn into_stream(self) -> MonitorStream {
        MonitorStream {
            monitor: Some(self),
        }
    }

    fn capture_error(&self, e: anyhow::Error) -> CaptureError {
        match e.downcast::<CaptureError>() {
            Ok(capture) => capture,
            Err(other) => CaptureError::ReadFailed {
                source: self.source.describe(),
                attempts: 1,
                reason: format!("{:#}", other),
            },
        }
    }
}

/// What the driving loop should do after a tick.
enum Step {
    Frame(TickOutcome),
    Skip,
    Stop,
}

fn step(monitor: &mut Monitor) -> Step {
    match monitor.analyze_tick() {
        Ok(Some(outcome)) => Step::Frame(outcome),
        Ok(None) => {
            info!("Camera feed ended");
            Step::Stop
        }
        Err(ProctorError::Motion(e)) => {
            warn!("Skipping frame: {}", e);
            Step::Skip
        }
        Err(e) => {
            error!("Stopping monitor: {}", e);
            Step::Stop
        }
    }
}

/// Single-consumer iterator over a monitor's multipart output.
pub struct MonitorStream {
    monitor: Option<Monitor>,
}

impl Iterator for MonitorStream {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        loop {
            let monitor = self.monitor.as_mut()?;
            match step(monitor) {
                Step::Frame(outcome) => return Some(outcome.segment()),
                Step::Skip => continue,
                Step::Stop => {
                    self.monitor = None;
                    return None;
                }
            }
        }
    }
}

struct Shared {
    status: Mutex<MotionStatus>,
    subscribers: Mutex<Vec<Sender<Bytes>>>,
    running: AtomicBool,
    snapshot_dir: PathBuf,
}

impl Shared {
    fn broadcast(&self, segment: &Bytes) {
        let Ok(mut subscribers) = self.subscribers.lock() else {
            return;
        };
        subscribers.retain(|tx| match tx.try_send(segment.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!("Stream subscriber is lagging; dropping a frame");
                true
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!("Stream subscriber disconnected");
                false
            }
        });
    }
}

/// Handle to a monitor running on its own worker thread.
///
/// The worker is the only owner of the camera and the alarm state. The
/// handle is what an HTTP layer holds on to.
pub struct MonitorHandle {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    /// Build a monitor on a dedicated worker thread and start it.
    ///
    /// `factory` runs on the worker, so the monitor never crosses threads.
    /// If it fails, the error is returned here and no worker keeps running.
    pub fn spawn<F>(factory: F) -> Result<Self, ProctorError>
    where
        F: FnOnce() -> Result<Monitor, ProctorError> + Send + 'static,
    {
        let (ready_tx, ready_rx) = channel::bounded::<Result<Arc<Shared>, ProctorError>>(1);

        let worker = thread::Builder::new()
            .name("proctor-monitor".into())
            .spawn(move || {
                let mut monitor = match factory() {
                    Ok(monitor) => monitor,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let shared = Arc::new(Shared {
                    status: Mutex::new(MotionStatus::default()),
                    subscribers: Mutex::new(Vec::new()),
                    running: AtomicBool::new(true),
                    snapshot_dir: monitor.snapshot_dir(),
                });
                if ready_tx.send(Ok(Arc::clone(&shared))).is_err() {
                    return;
                }

                run_worker(&mut monitor, &shared);

                // Release the camera before ending the subscribers' streams.
                drop(monitor);
                if let Ok(mut subscribers) = shared.subscribers.lock() {
                    shared.running.store(false, Ordering::SeqCst);
                    subscribers.clear();
                }
            })
            .map_err(|e| CaptureError::DeviceUnavailable {
                device: "monitor worker".into(),
                reason: e.to_string(),
            })?;

        match ready_rx.recv() {
            Ok(Ok(shared)) => Ok(Self {
                shared,
                worker: Some(worker),
            }),
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(e)
            }
            Err(_) => {
                let _ = worker.join();
                Err(CaptureError::DeviceUnavailable {
                    device: "monitor worker".into(),
                    reason: "worker exited during startup".into(),
                }
                .into())
            }
        }
    }

    /// Alarm evaluation of the most recently analyzed frame.
    pub fn motion_status(&self) -> MotionStatus {
        self.shared
            .status
            .lock()
            .map(|status| *status)
            .unwrap_or_default()
    }

    /// Subscribe to the live stream, starting at the next processed frame.
    ///
    /// If the monitor has already stopped, the returned stream is empty.
    pub fn stream(&self) -> FrameStream {
        let (tx, rx) = channel::bounded(constants::STREAM_BUFFER_FRAMES);
        // The worker clears the list under the same lock after it stops, so
        // checking `running` here cannot leave a subscriber behind.
        if let Ok(mut subscribers) = self.shared.subscribers.lock() {
            if self.is_running() {
                subscribers.push(tx);
            }
        }
        FrameStream::new(rx)
    }

    /// Evidence file names, most recent first.
    pub fn snapshots(&self) -> std::io::Result<Vec<String>> {
        list_snapshots(&self.shared.snapshot_dir)
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Ask the worker to stop after the frame it is currently processing.
    pub fn shutdown(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
    }

    /// Wait for the worker to finish.
    pub fn join(mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Monitor worker panicked");
            }
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.shutdown();
        }
    }
}

fn run_worker(monitor: &mut Monitor, shared: &Shared) {
    while shared.running.load(Ordering::SeqCst) {
        match step(monitor) {
            Step::Frame(outcome) => {
                if let Ok(mut status) = shared.status.lock() {
                    *status = outcome.status();
                }
                shared.broadcast(&outcome.segment());
            }
            Step::Skip => continue,
            Step::Stop => break,
        }
    }
}
