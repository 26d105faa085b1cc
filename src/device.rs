use anyhow::Result;
use image::RgbImage;
use log::info;
use opencv::core::{AlgorithmHint, Mat};
use opencv::imgproc;
use opencv::prelude::{MatTraitConst, MatTraitConstManual, VideoCaptureTrait, VideoCaptureTraitConst};
use opencv::videoio::{CAP_ANY, VideoCapture};

use crate::capture::{Frame, FrameSource};
use crate::error::CaptureError;

/// Local camera opened by device index.
///
/// The capture handle is owned exclusively by this value and released once,
/// when it is dropped.
pub struct DeviceCamera {
    index: i32,
    capture: Option<VideoCapture>,
    flip_vertical: bool,
}

impl DeviceCamera {
    pub fn open(index: i32, flip_vertical: bool) -> Result<Self, CaptureError> {
        let unavailable = |reason: String| CaptureError::DeviceUnavailable {
            device: format!("camera {}", index),
            reason,
        };

        let capture = VideoCapture::new(index, CAP_ANY).map_err(|e| unavailable(e.to_string()))?;
        if !capture.is_opened().unwrap_or(false) {
            return Err(unavailable("device could not be opened".into()));
        }

        info!("Opened camera device {}", index);
        Ok(Self {
            index,
            capture: Some(capture),
            flip_vertical,
        })
    }
}

impl FrameSource for DeviceCamera {
    fn describe(&self) -> String {
        format!("camera device {}", self.index)
    }

    fn read(&mut self) -> Result<Option<Frame>> {
        let Some(capture) = self.capture.as_mut() else {
            return Ok(None);
        };

        let mut bgr = Mat::default();
        if !capture.read(&mut bgr)? || bgr.empty() {
            return Ok(None);
        }

        let mut rgb = Mat::default();
        imgproc::cvt_color(
            &bgr,
            &mut rgb,
            imgproc::COLOR_BGR2RGB,
            0,
            AlgorithmHint::ALGO_HINT_DEFAULT,
        )?;

        let width = rgb.cols() as u32;
        let height = rgb.rows() as u32;
        let data = rgb.data_bytes()?.to_vec();
        let image = RgbImage::from_raw(width, height, data).ok_or_else(|| {
            CaptureError::DecodeFailed {
                source: self.describe(),
                reason: format!("buffer does not hold a {}x{} RGB image", width, height),
            }
        })?;

        let image = if self.flip_vertical {
            image::imageops::flip_vertical(&image)
        } else {
            image
        };

        Ok(Some(Frame::new(image)))
    }
}

impl Drop for DeviceCamera {
    fn drop(&mut self) {
        if self.capture.take().is_some() {
            info!("Released {}", self.describe());
        }
    }
}
