use anyhow::Result;
use darknet::{Image, Network};
use image::RgbImage;
use image::imageops::FilterType;
use imageproc::rect::Rect;
use log::info;
use std::{fs, path::Path};

use crate::annotation::AnnotationStage;
use crate::config::constants;
use crate::error::{DetectionError, ProctorError};

/// One raw box proposal from an object-detection network.
///
/// Coordinates are normalized to `0.0..=1.0` and describe the box centre
/// and size, as YOLO outputs them.
#[derive(Debug, Clone, PartialEq)]
pub struct Proposal {
    pub center_x: f32,
    pub center_y: f32,
    pub width: f32,
    pub height: f32,
    pub class_scores: Vec<f32>,
}

impl Proposal {
    /// Index and score of the best class, if there are any classes.
    pub fn top_class(&self) -> Option<(usize, f32)> {
        self.class_scores
            .iter()
            .copied()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
    }

    /// Convert the normalized box to pixel space, clamped to the frame.
    pub fn pixel_rect(&self, frame_width: u32, frame_height: u32) -> Rect {
        let fw = frame_width as f32;
        let fh = frame_height as f32;
        let w = (self.width * fw).max(1.0);
        let h = (self.height * fh).max(1.0);
        let x = (self.center_x * fw - w / 2.0).max(0.0);
        let y = (self.center_y * fh - h / 2.0).max(0.0);
        let w = w.min(fw - x).max(1.0);
        let h = h.min(fh - y).max(1.0);
        Rect::at(x as i32, y as i32).of_size(w as u32, h as u32)
    }
}

/// A network producing box proposals for a frame.
pub trait ProposalModel {
    fn propose(&mut self, frame: &RgbImage) -> Result<Vec<Proposal>>;
}

/// YOLO network loaded through Darknet.
pub struct DarknetModel {
    network: Network,
    input_size: u32,
}

impl DarknetModel {
    /// Load the network from its config and weights files.
    pub fn load(model_cfg: &Path, weights: &Path) -> Result<Self, DetectionError> {
        let network = Network::load(model_cfg, Some(weights), false).map_err(|e| {
            DetectionError::ModelConfigLoadFailed {
                path: model_cfg.display().to_string(),
                reason: e.to_string(),
            }
        })?;

        Ok(Self {
            network,
            input_size: constants::DETECTOR_INPUT_SIZE,
        })
    }
}

impl ProposalModel for DarknetModel {
    fn propose(&mut self, frame: &RgbImage) -> Result<Vec<Proposal>> {
        let resized = image::imageops::resize(
            frame,
            self.input_size,
            self.input_size,
            FilterType::Triangle,
        );
        let image = Image::from(image::DynamicImage::ImageRgb8(resized));

        // NMS is applied by the detector itself, so the network's own is disabled.
        let detections = self.network.predict(&image, 0.25, 0.5, 0.0, false);

        Ok(detections
            .iter()
            .map(|det| {
                let bbox = det.bbox();
                Proposal {
                    center_x: bbox.x,
                    center_y: bbox.y,
                    width: bbox.w,
                    height: bbox.h,
                    class_scores: det.probabilities().to_vec(),
                }
            })
            .collect())
    }
}

/// A detected object in pixel coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub label: String,
    pub class_id: usize,
    /// Confidence score from 0.0 to 1.0.
    pub confidence: f32,
    pub bbox: Rect,
}

impl Detection {
    /// Get the confidence as a percentage.
    pub fn confidence_percent(&self) -> f32 {
        self.confidence * 100.0
    }
}

/// Object detection stage.
///
/// Keeps proposals whose best class beats the confidence threshold, maps
/// them to pixel space and runs non-maximum suppression over all classes,
/// so no two surviving boxes overlap by more than the IoU threshold.
pub struct ObjectDetector {
    model: Box<dyn ProposalModel>,
    labels: Vec<String>,
    confidence_threshold: f32,
    iou_threshold: f32,
}

impl ObjectDetector {
    pub fn new(model: Box<dyn ProposalModel>, labels: Vec<String>) -> Self {
        Self {
            model,
            labels,
            confidence_threshold: constants::DETECTION_CONFIDENCE_THRESHOLD,
            iou_threshold: constants::NMS_IOU_THRESHOLD,
        }
    }

    /// Load the Darknet model and class labels from disk.
    ///
    /// # Errors
    ///
    /// Fails if the labels cannot be read or the network cannot be loaded.
    pub fn load(model_cfg: &Path, weights: &Path, labels_path: &Path) -> Result<Self, ProctorError> {
        let labels = load_labels(labels_path)?;
        let model = DarknetModel::load(model_cfg, weights)?;
        info!(
            "Object detector loaded from {} with {} classes",
            model_cfg.display(),
            labels.len()
        );
        Ok(Self::new(Box::new(model), labels))
    }

    /// Download model weights if they don't exist locally.
    pub fn ensure_weights_downloaded(weights_path: &Path, download_url: &str) -> Result<(), DetectionError> {
        if weights_path.exists() {
            return Ok(());
        }

        info!("Model weights not found, downloading from: {}", download_url);
        let failed = |reason: String| DetectionError::WeightsDownloadFailed {
            url: download_url.to_string(),
            reason,
        };

        let response = reqwest::blocking::get(download_url).map_err(|e| failed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(failed(format!("HTTP {}", response.status())));
        }

        let data = response.bytes().map_err(|e| failed(e.to_string()))?;
        fs::write(weights_path, data).map_err(|e| failed(e.to_string()))?;

        info!("Model weights downloaded successfully");
        Ok(())
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    fn label_for(&self, class_id: usize) -> String {
        self.labels
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class {}", class_id))
    }
}

impl AnnotationStage for ObjectDetector {
    type Output = Vec<Detection>;

    fn name(&self) -> &'static str {
        "Object detection"
    }

    fn analyze(&mut self, frame: &RgbImage) -> Result<Vec<Detection>> {
        let proposals = self.model.propose(frame)?;

        let candidates: Vec<Detection> = proposals
            .iter()
            .filter_map(|p| {
                let (class_id, confidence) = p.top_class()?;
                (confidence > self.confidence_threshold).then(|| Detection {
                    label: self.label_for(class_id),
                    class_id,
                    confidence,
                    bbox: p.pixel_rect(frame.width(), frame.height()),
                })
            })
            .collect();

        let boxes: Vec<Rect> = candidates.iter().map(|d| d.bbox).collect();
        let scores: Vec<f32> = candidates.iter().map(|d| d.confidence).collect();
        let keep = non_max_suppression(&boxes, &scores, self.iou_threshold);

        Ok(keep.into_iter().map(|i| candidates[i].clone()).collect())
    }
}

fn load_labels(path: &Path) -> Result<Vec<String>, DetectionError> {
    let text = fs::read_to_string(path).map_err(|e| DetectionError::LabelsLoadFailed {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(ToOwned::to_owned)
        .collect())
}

/// Intersection over union of two pixel rectangles.
pub fn iou(a: &Rect, b: &Rect) -> f32 {
    let Some(overlap) = a.intersect(*b) else {
        return 0.0;
    };
    let inter = overlap.width() as f32 * overlap.height() as f32;
    let area_a = a.width() as f32 * a.height() as f32;
    let area_b = b.width() as f32 * b.height() as f32;
    let union = area_a + area_b - inter;
    if union <= 0.0 { 0.0 } else { inter / union }
}

/// Greedy non-maximum suppression.
///
/// Returns the indices of the kept boxes, highest score first. A box is
/// dropped when its IoU with an already kept box exceeds `iou_threshold`.
pub fn non_max_suppression(boxes: &[Rect], scores: &[f32], iou_threshold: f32) -> Vec<usize> {
    let mut order: Vec<usize> = (0..boxes.len().min(scores.len())).collect();
    order.sort_by(|&a, &b| {
        scores[b]
            .partial_cmp(&scores[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<usize> = Vec::new();
    for i in order {
        if keep
            .iter()
            .all(|&k| iou(&boxes[i], &boxes[k]) <= iou_threshold)
        {
            keep.push(i);
        }
    }
    keep
}
