use image::{GrayImage, Luma, Rgb};
use imageproc::contours::{BorderType, find_contours};
use imageproc::distance_transform::Norm;
use imageproc::point::Point;
use imageproc::rect::Rect;
use log::debug;

use crate::annotation::draw_box;
use crate::capture::Frame;
use crate::config::constants;
use crate::error::MotionError;

const MOTION_BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const MOTION_BOX_THICKNESS: i32 = 3;

/// Outcome of analyzing one frame for motion.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionEvent {
    pub detected: bool,
    /// Bounding boxes of the motion regions, top-to-bottom then left-to-right.
    pub regions: Vec<Rect>,
}

impl MotionEvent {
    pub fn none() -> Self {
        Self {
            detected: false,
            regions: Vec::new(),
        }
    }
}

/// Frame-differencing motion detector.
///
/// Each frame is converted to grayscale and blurred, then compared with the
/// previous one. Changed pixels are thresholded, dilated so nearby fragments
/// merge, and grouped into external contours; contours smaller than
/// `min_area` are ignored as noise.
pub struct MotionAnalyzer {
    baseline: Option<GrayImage>,
    min_area: f64,
}

impl MotionAnalyzer {
    pub fn new(min_area: f64) -> Self {
        Self {
            baseline: None,
            min_area,
        }
    }

    /// Forget the baseline; the next frame is treated as the first one.
    pub fn reset(&mut self) {
        self.baseline = None;
    }

    pub fn has_baseline(&self) -> bool {
        self.baseline.is_some()
    }

    /// Analyze a frame against the previous one.
    ///
    /// Returns the frame with motion regions drawn on it. The very first
    /// frame only seeds the baseline and never reports motion.
    ///
    /// # Errors
    ///
    /// Returns [`MotionError::DimensionMismatch`] if the frame size differs
    /// from the baseline. The baseline is left untouched in that case.
    pub fn analyze(&mut self, mut frame: Frame) -> Result<(Frame, MotionEvent), MotionError> {
        let gray = preprocess(&frame);

        let Some(baseline) = self.baseline.take() else {
            self.baseline = Some(gray);
            return Ok((frame, MotionEvent::none()));
        };

        if baseline.dimensions() != gray.dimensions() {
            let expected = baseline.dimensions();
            self.baseline = Some(baseline);
            return Err(MotionError::DimensionMismatch {
                expected,
                actual: gray.dimensions(),
            });
        }

        let diff = imageproc::map::map_colors2(&baseline, &gray, |a: Luma<u8>, b: Luma<u8>| {
            Luma([a[0].abs_diff(b[0])])
        });
        self.baseline = Some(gray);

        let mask = imageproc::contrast::threshold(&diff, constants::PIXEL_DIFF_THRESHOLD);
        let mask = imageproc::morphology::dilate(&mask, Norm::LInf, constants::DILATE_RADIUS);

        let mut regions: Vec<Rect> = find_contours::<i32>(&pad(&mask))
            .into_iter()
            .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
            .map(|c| unpad(c.points))
            .filter(|points| polygon_area(points) >= self.min_area)
            .filter_map(|points| bounding_rect(&points))
            .collect();
        regions.sort_by_key(|r| (r.top(), r.left()));

        for region in &regions {
            draw_box(&mut frame.image, *region, MOTION_BOX_COLOR, MOTION_BOX_THICKNESS);
        }

        if !regions.is_empty() {
            debug!("Motion in {} region(s)", regions.len());
        }

        let event = MotionEvent {
            detected: !regions.is_empty(),
            regions,
        };
        Ok((frame, event))
    }
}

fn preprocess(frame: &Frame) -> GrayImage {
    let gray = image::imageops::grayscale(&frame.image);
    imageproc::filter::gaussian_blur_f32(&gray, constants::BLUR_SIGMA)
}

/// Surround the mask with a one pixel background border.
///
/// Contour tracing reports regions touching the image edge as holes, so the
/// mask is traced padded and the points are shifted back with [`unpad`].
fn pad(mask: &GrayImage) -> GrayImage {
    let (width, height) = mask.dimensions();
    let mut padded = GrayImage::new(width + 2, height + 2);
    for (x, y, pixel) in mask.enumerate_pixels() {
        padded.put_pixel(x + 1, y + 1, *pixel);
    }
    padded
}

fn unpad(points: Vec<Point<i32>>) -> Vec<Point<i32>> {
    points
        .into_iter()
        .map(|p| Point::new(p.x - 1, p.y - 1))
        .collect()
}

/// Shoelace area of a closed contour.
fn polygon_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let twice: i64 = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(a, b)| a.x as i64 * b.y as i64 - b.x as i64 * a.y as i64)
        .sum();
    twice.abs() as f64 / 2.0
}

fn bounding_rect(points: &[Point<i32>]) -> Option<Rect> {
    let min_x = points.iter().map(|p| p.x).min()?;
    let max_x = points.iter().map(|p| p.x).max()?;
    let min_y = points.iter().map(|p| p.y).min()?;
    let max_y = points.iter().map(|p| p.y).max()?;
    Some(Rect::at(min_x, min_y).of_size((max_x - min_x + 1) as u32, (max_y - min_y + 1) as u32))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pts(coords: &[(i32, i32)]) -> Vec<Point<i32>> {
        coords.iter().map(|&(x, y)| Point::new(x, y)).collect()
    }

    #[test]
    fn test_polygon_area_square() {
        let square = pts(&[(0, 0), (10, 0), (10, 10), (0, 10)]);
        assert_eq!(polygon_area(&square), 100.0);
    }

    #[test]
    fn test_polygon_area_degenerate() {
        assert_eq!(polygon_area(&pts(&[(3, 3)])), 0.0);
        assert_eq!(polygon_area(&pts(&[(0, 0), (5, 0)])), 0.0);
    }

    #[test]
    fn test_edge_region_traces_as_outer_once_padded() {
        let mut mask = GrayImage::new(40, 30);
        for y in 0..30 {
            for x in 0..10 {
                mask.put_pixel(x, y, Luma([255]));
            }
        }

        let outer: Vec<_> = find_contours::<i32>(&pad(&mask))
            .into_iter()
            .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
            .map(|c| unpad(c.points))
            .collect();

        assert_eq!(outer.len(), 1);
        let rect = bounding_rect(&outer[0]).unwrap();
        assert_eq!((rect.left(), rect.top()), (0, 0));
        assert_eq!((rect.width(), rect.height()), (10, 30));
    }

    #[test]
    fn test_bounding_rect_is_inclusive() {
        let rect = bounding_rect(&pts(&[(2, 3), (7, 3), (7, 9), (2, 9)])).unwrap();
        assert_eq!((rect.left(), rect.top()), (2, 3));
        assert_eq!((rect.width(), rect.height()), (6, 7));
    }
}
