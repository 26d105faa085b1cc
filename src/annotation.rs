use anyhow::Result;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use log::{debug, warn};
use rusttype::{Font, Scale};
use std::fs;
use std::path::Path;

use crate::capture::Frame;
use crate::detector::{Detection, ObjectDetector};
use crate::emotion::{Emotion, EmotionDetector};
use crate::error::{ConfigError, DetectionError};

const DETECTION_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
const DETECTION_THICKNESS: i32 = 2;
const EMOTION_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// Result of one annotation stage for one frame.
///
/// Stages never propagate failures; a failed stage reports `Unavailable`
/// and downstream code branches on the tag.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome<T> {
    Detected(T),
    Unavailable,
}

impl<T> StageOutcome<T> {
    pub fn is_detected(&self) -> bool {
        matches!(self, StageOutcome::Detected(_))
    }

    pub fn detected(&self) -> Option<&T> {
        match self {
            StageOutcome::Detected(value) => Some(value),
            StageOutcome::Unavailable => None,
        }
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            StageOutcome::Detected(value) => Some(value),
            StageOutcome::Unavailable => None,
        }
    }
}

/// A pluggable per-frame analysis step.
///
/// Implementations report failures through `Err`; [`run_stage`] is the only
/// place those errors are caught and turned into `Unavailable`.
pub trait AnnotationStage {
    type Output;

    fn name(&self) -> &'static str;

    fn analyze(&mut self, frame: &RgbImage) -> Result<Self::Output>;
}

/// Run a stage, absorbing any failure.
pub fn run_stage<S: AnnotationStage + ?Sized>(stage: &mut S, frame: &RgbImage) -> StageOutcome<S::Output> {
    match stage.analyze(frame) {
        Ok(output) => StageOutcome::Detected(output),
        Err(e) => {
            warn!(
                "{}",
                DetectionError::InferenceFailed {
                    stage: stage.name(),
                    reason: format!("{:#}", e),
                }
            );
            StageOutcome::Unavailable
        }
    }
}

/// Draw a rectangle outline `thickness` pixels wide, growing outwards.
///
/// Parts falling outside the canvas are clipped.
pub fn draw_box(canvas: &mut RgbImage, rect: Rect, color: Rgb<u8>, thickness: i32) {
    for t in 0..thickness.max(1) {
        let outline = Rect::at(rect.left() - t, rect.top() - t)
            .of_size(rect.width() + 2 * t as u32, rect.height() + 2 * t as u32);
        draw_hollow_rect_mut(canvas, outline, color);
    }
}

/// Draws detector results onto frames.
///
/// Without a font only boxes are drawn. Detection labels and the emotion
/// caption need a TrueType font (see [`Config::font_file`](crate::config::Config::font_file)).
pub struct Overlay {
    font: Option<Font<'static>>,
}

impl Overlay {
    /// Overlay that draws boxes only.
    pub fn boxes_only() -> Self {
        Self { font: None }
    }

    /// Load the overlay font, if one is configured.
    pub fn load(font_file: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = font_file else {
            return Ok(Self::boxes_only());
        };

        let data = fs::read(path).map_err(|_| ConfigError::MissingFile {
            path: path.display().to_string(),
        })?;
        let font = Font::try_from_vec(data).ok_or_else(|| ConfigError::InvalidValue {
            field: "FONT_FILE".into(),
            value: path.display().to_string(),
            reason: "not a TrueType font".into(),
        })?;

        Ok(Self { font: Some(font) })
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    fn text(&self, canvas: &mut RgbImage, x: i32, y: i32, size: f32, color: Rgb<u8>, text: &str) {
        if let Some(font) = &self.font {
            draw_text_mut(canvas, color, x, y.max(0), Scale::uniform(size), font, text);
        }
    }

    pub fn draw_detections(&self, canvas: &mut RgbImage, detections: &[Detection]) {
        for detection in detections {
            draw_box(canvas, detection.bbox, DETECTION_COLOR, DETECTION_THICKNESS);
            self.text(
                canvas,
                detection.bbox.left(),
                detection.bbox.top() - 16,
                14.0,
                DETECTION_COLOR,
                &format!("{} ({:.2})", detection.label, detection.confidence),
            );
        }
    }

    pub fn draw_emotion(&self, canvas: &mut RgbImage, emotion: Emotion) {
        self.text(
            canvas,
            10,
            10,
            26.0,
            EMOTION_COLOR,
            &format!("Emotion: {}", emotion.as_str()),
        );
    }
}

/// What the annotation stages found on one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotations {
    /// `None` when no emotion stage is configured.
    pub emotion: Option<StageOutcome<Emotion>>,
    /// `None` when no object stage is configured.
    pub objects: Option<StageOutcome<Vec<Detection>>>,
}

impl Annotations {
    /// Emotion shown for the frame; a failed stage reads as neutral.
    pub fn emotion_shown(&self) -> Option<Emotion> {
        self.emotion
            .as_ref()
            .map(|outcome| outcome.detected().copied().unwrap_or(Emotion::Neutral))
    }

    pub fn emotion_label(&self) -> Option<&'static str> {
        self.emotion_shown().map(Emotion::as_str)
    }

    pub fn detections(&self) -> &[Detection] {
        self.objects
            .as_ref()
            .and_then(StageOutcome::detected)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Emotion and object stages plus the overlay that renders their results.
///
/// Both stages look at the same input frame; drawing happens only after both
/// have finished, so neither sees the other's overlay.
pub struct AnnotationPipeline {
    emotion: Option<EmotionDetector>,
    objects: Option<ObjectDetector>,
    overlay: Overlay,
}

impl AnnotationPipeline {
    pub fn new(
        emotion: Option<EmotionDetector>,
        objects: Option<ObjectDetector>,
        overlay: Overlay,
    ) -> Self {
        Self {
            emotion,
            objects,
            overlay,
        }
    }

    /// Run every configured stage and draw the results onto the frame.
    pub fn run(&mut self, frame: &mut Frame) -> Annotations {
        let emotion = self
            .emotion
            .as_mut()
            .map(|stage| run_stage(stage, &frame.image));
        let objects = self
            .objects
            .as_mut()
            .map(|stage| run_stage(stage, &frame.image));

        let annotations = Annotations { emotion, objects };

        self.overlay
            .draw_detections(&mut frame.image, annotations.detections());
        if let Some(emotion) = annotations.emotion_shown() {
            debug!("Emotion: {}", emotion.as_str());
            self.overlay.draw_emotion(&mut frame.image, emotion);
        }

        annotations
    }
}
