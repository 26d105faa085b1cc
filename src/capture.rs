use anyhow::Result;
use chrono::{DateTime, Local};
use image::RgbImage;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::{fs, thread, time::Duration};

use crate::config::{CameraSource, Config, constants};
use crate::error::{CaptureError, ConfigError, ProctorError};

/// A single captured camera frame.
///
/// Frames are moved from stage to stage; nothing holds on to one after the
/// tick that produced it has finished.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub timestamp: DateTime<Local>,
}

impl Frame {
    /// Wrap an image captured right now.
    pub fn new(image: RgbImage) -> Self {
        Self {
            image,
            timestamp: Local::now(),
        }
    }

    pub fn with_timestamp(image: RgbImage, timestamp: DateTime<Local>) -> Self {
        Self { image, timestamp }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Decode an encoded image (JPEG, PNG, ...) into a frame.
    pub fn decode(data: &[u8], origin: &str, flip_vertical: bool) -> Result<Self, CaptureError> {
        let decoded = image::load_from_memory(data).map_err(|e| CaptureError::DecodeFailed {
            source: origin.to_string(),
            reason: e.to_string(),
        })?;
        let decoded = if flip_vertical { decoded.flipv() } else { decoded };
        Ok(Self::new(decoded.to_rgb8()))
    }
}

/// A camera-like producer of frames.
///
/// `Ok(None)` means the feed has ended; `Err` is a capture failure. Both are
/// terminal for whoever is driving the source.
pub trait FrameSource {
    /// Human-readable description used in logs.
    fn describe(&self) -> String;

    /// Read the next frame.
    fn read(&mut self) -> Result<Option<Frame>>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn describe(&self) -> String {
        (**self).describe()
    }

    fn read(&mut self) -> Result<Option<Frame>> {
        (**self).read()
    }
}

/// Open the frame source selected by the configuration.
pub fn open_source(config: &Config) -> Result<Box<dyn FrameSource>, ProctorError> {
    match &config.camera {
        CameraSource::Http(urls) => {
            if urls.is_empty() {
                return Err(ConfigError::NoCameraSource {
                    reason: "CAMERA_URL contains no URLs".into(),
                }
                .into());
            }
            Ok(Box::new(HttpCamera::new(
                urls.clone(),
                constants::CAPTURE_MAX_RETRIES,
                Duration::from_millis(constants::CAPTURE_RETRY_DELAY_MS),
                config.flip_image,
            )))
        }
        CameraSource::Directory(dir) => Ok(Box::new(DirectorySource::open(dir, config.flip_image)?)),
        CameraSource::Device(index) => open_device(*index, config.flip_image),
    }
}

#[cfg(feature = "opencv")]
fn open_device(index: i32, flip_vertical: bool) -> Result<Box<dyn FrameSource>, ProctorError> {
    Ok(Box::new(crate::device::DeviceCamera::open(index, flip_vertical)?))
}

#[cfg(not(feature = "opencv"))]
fn open_device(index: i32, _flip_vertical: bool) -> Result<Box<dyn FrameSource>, ProctorError> {
    Err(ConfigError::NoCameraSource {
        reason: format!(
            "camera device {} requested but this build has no `opencv` feature; set CAMERA_URL or CAMERA_DIR",
            index
        ),
    }
    .into())
}

/// Network camera that serves still JPEG snapshots over HTTP.
///
/// Supports multiple URLs with round-robin selection. Each `read` retries a
/// failing fetch a bounded number of times before reporting a capture error.
pub struct HttpCamera {
    image_urls: Vec<String>,
    current_url_index: usize,
    max_retries: u32,
    retry_delay: Duration,
    flip_vertical: bool,
    client: reqwest::blocking::Client,
}

impl HttpCamera {
    /// Create a new HttpCamera.
    ///
    /// # Arguments
    ///
    /// * `image_urls` - URLs to fetch snapshots from (round robin)
    /// * `max_retries` - Attempts per frame before giving up
    /// * `retry_delay` - Delay between attempts
    /// * `flip_vertical` - Flip every frame vertically
    pub fn new(
        image_urls: Vec<String>,
        max_retries: u32,
        retry_delay: Duration,
        flip_vertical: bool,
    ) -> Self {
        Self {
            image_urls,
            current_url_index: 0,
            max_retries: max_retries.max(1),
            retry_delay,
            flip_vertical,
            client: reqwest::blocking::Client::new(),
        }
    }

    /// Get the configured image URLs.
    pub fn image_urls(&self) -> &[String] {
        &self.image_urls
    }

    /// Get the maximum attempts per frame.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Make a single HTTP request for the next URL in rotation.
    fn attempt_fetch(&mut self) -> Result<(String, Vec<u8>)> {
        let url = self
            .image_urls
            .get(self.current_url_index)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no snapshot URL configured"))?;
        self.current_url_index = (self.current_url_index + 1) % self.image_urls.len();

        let response = self.client.get(&url).send()?;
        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "HTTP request failed with status: {}",
                response.status()
            ));
        }

        Ok((url, response.bytes()?.to_vec()))
    }
}

impl FrameSource for HttpCamera {
    fn describe(&self) -> String {
        format!("http camera [{}]", self.image_urls.join(", "))
    }

    fn read(&mut self) -> Result<Option<Frame>> {
        if self.image_urls.is_empty() {
            return Err(CaptureError::ReadFailed {
                source: self.describe(),
                attempts: 0,
                reason: "no snapshot URLs configured".to_string(),
            }
            .into());
        }

        let mut last_error = String::new();
        for attempt in 1..=self.max_retries {
            match self.attempt_fetch() {
                Ok((url, data)) => {
                    let frame = Frame::decode(&data, &url, self.flip_vertical)?;
                    return Ok(Some(frame));
                }
                Err(e) => {
                    warn!("Failed to fetch frame (attempt {}): {}", attempt, e);
                    last_error = e.to_string();
                    if attempt < self.max_retries {
                        thread::sleep(self.retry_delay);
                    }
                }
            }
        }

        Err(CaptureError::ReadFailed {
            source: self.image_urls.join(", "),
            attempts: self.max_retries,
            reason: last_error,
        }
        .into())
    }
}

impl Drop for HttpCamera {
    fn drop(&mut self) {
        info!("Released {}", self.describe());
    }
}

/// Replays the still images of a directory in file-name order.
///
/// The feed ends after the last image. Files that are not decodable images
/// are skipped when the directory is scanned.
pub struct DirectorySource {
    dir: PathBuf,
    files: std::vec::IntoIter<PathBuf>,
    flip_vertical: bool,
}

impl DirectorySource {
    pub fn open(dir: &Path, flip_vertical: bool) -> Result<Self, CaptureError> {
        let entries = fs::read_dir(dir).map_err(|e| CaptureError::DeviceUnavailable {
            device: dir.display().to_string(),
            reason: e.to_string(),
        })?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && image::ImageFormat::from_path(path).is_ok())
            .collect();
        files.sort();

        debug!("Replaying {} image(s) from {}", files.len(), dir.display());

        Ok(Self {
            dir: dir.to_path_buf(),
            files: files.into_iter(),
            flip_vertical,
        })
    }
}

impl FrameSource for DirectorySource {
    fn describe(&self) -> String {
        format!("image directory {}", self.dir.display())
    }

    fn read(&mut self) -> Result<Option<Frame>> {
        let Some(path) = self.files.next() else {
            return Ok(None);
        };
        let data = fs::read(&path)?;
        let frame = Frame::decode(&data, &path.display().to_string(), self.flip_vertical)?;
        Ok(Some(frame))
    }
}

impl Drop for DirectorySource {
    fn drop(&mut self) {
        info!("Released {}", self.describe());
    }
}
