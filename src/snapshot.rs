use chrono::{DateTime, Local};
use image::codecs::jpeg::JpegEncoder;
use log::{debug, info};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::capture::Frame;
use crate::error::StorageError;
use crate::motion::MotionEvent;

/// An evidence file written for a motion-positive frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub path: PathBuf,
    pub timestamp: DateTime<Local>,
}

/// Writes motion evidence to a flat directory.
///
/// Files are named `snapshot_<YYYYMMDD-HHMMSS>.jpg`, so sorting names in
/// descending order lists the most recent first. Two motion frames in the
/// same second share a name and the later one wins.
pub struct SnapshotWriter {
    dir: PathBuf,
    jpeg_quality: u8,
}

impl SnapshotWriter {
    /// Create the writer, creating the evidence directory if needed.
    pub fn new(dir: impl Into<PathBuf>, jpeg_quality: u8) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| StorageError::DirectoryCreateFailed {
            path: dir.display().to_string(),
            reason: e.to_string(),
        })?;
        info!("Evidence directory ready at: {}", dir.display());
        Ok(Self { dir, jpeg_quality })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File name used for a frame captured at `timestamp`.
    pub fn file_name(timestamp: &DateTime<Local>) -> String {
        format!("snapshot_{}.jpg", timestamp.format("%Y%m%d-%H%M%S"))
    }

    /// Save the frame if motion was detected in it.
    pub fn maybe_save(
        &self,
        frame: &Frame,
        event: &MotionEvent,
    ) -> Result<Option<Snapshot>, StorageError> {
        if !event.detected {
            return Ok(None);
        }

        let path = self.dir.join(Self::file_name(&frame.timestamp));
        let write_failed = |reason: String| StorageError::WriteFailed {
            path: path.display().to_string(),
            reason,
        };

        let file = File::create(&path).map_err(|e| write_failed(e.to_string()))?;
        let mut writer = BufWriter::new(file);
        JpegEncoder::new_with_quality(&mut writer, self.jpeg_quality)
            .encode_image(&frame.image)
            .map_err(|e| write_failed(e.to_string()))?;
        writer.flush().map_err(|e| write_failed(e.to_string()))?;

        debug!("Saved snapshot {}", path.display());
        Ok(Some(Snapshot {
            path,
            timestamp: frame.timestamp,
        }))
    }

    /// Names of the snapshots in the evidence directory, most recent first.
    pub fn list(&self) -> std::io::Result<Vec<String>> {
        list_snapshots(&self.dir)
    }
}

/// Names of the snapshots in `dir`, most recent first.
pub fn list_snapshots(dir: &Path) -> std::io::Result<Vec<String>> {
    let mut names: Vec<String> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.starts_with("snapshot_") && name.ends_with(".jpg"))
        .collect();
    names.sort_unstable_by(|a, b| b.cmp(a));
    Ok(names)
}
