//! Data products on disk.
//!
//! - `create_data_path` makes the timestamped output directory of an experiment.
//! - `FrameWriter` implementations store processed and raw camera frames: CSV is
//!   always available, FITS needs the `storage_fits` feature.
//! - `txt` reads and writes numeric tables, `readme` writes parameter listings
//!   and `calibration` appends to the calibration database.

pub mod calibration;
pub mod csv_frames;
pub mod fits;
pub mod readme;
pub mod txt;

use crate::error::{AppResult, DaqError};
use crate::hardware::frame::Frame;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use csv_frames::CsvFrameWriter;
#[cfg(feature = "storage_fits")]
pub use fits::FitsFrameWriter;

/// Exposure time header card, in seconds.
pub const EXPTIME: &str = "EXPTIME";

/// Ordered header cards stored with a frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameHeader {
    cards: Vec<(String, String)>,
}

impl FrameHeader {
    /// Empty header.
    pub fn new() -> Self {
        Self::default()
    }

    /// Header carrying the frame's exposure time.
    pub fn for_frame(frame: &Frame) -> Self {
        Self::new().with(EXPTIME, frame.exposure.as_secs_f64())
    }

    /// Builder form of [`FrameHeader::push`].
    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.push(key, value);
        self
    }

    /// Add a card, replacing an existing card with the same key.
    pub fn push(&mut self, key: &str, value: impl ToString) {
        let value = value.to_string();
        match self.cards.iter_mut().find(|(k, _)| k == key) {
            Some(card) => card.1 = value,
            None => self.cards.push((key.to_string(), value)),
        }
    }

    /// Value of `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.cards
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Cards in insertion order.
    pub fn cards(&self) -> impl Iterator<Item = (&str, &str)> {
        self.cards.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Writes and reads frame files. `path` excludes the extension.
pub trait FrameWriter: Send + Sync {
    /// File extension without the dot
    fn extension(&self) -> &'static str;

    /// Write `frame`, returning the full path including extension.
    fn write(&self, path: &Path, frame: &Frame, header: &FrameHeader) -> AppResult<PathBuf>;

    /// Read a frame written by [`FrameWriter::write`]
    fn read(&self, path: &Path) -> AppResult<(Frame, FrameHeader)>;

    /// Path a frame written to `path` ends up at.
    fn output_path(&self, path: &Path) -> PathBuf {
        append_extension(path, self.extension())
    }
}

/// Frame file format selected in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameFormat {
    /// Text frames with `#` header lines
    #[default]
    Csv,
    /// FITS images (feature `storage_fits`)
    Fits,
}

/// Build the writer for `format`.
pub fn frame_writer(format: FrameFormat) -> AppResult<Arc<dyn FrameWriter>> {
    match format {
        FrameFormat::Csv => Ok(Arc::new(CsvFrameWriter::new())),
        #[cfg(feature = "storage_fits")]
        FrameFormat::Fits => Ok(Arc::new(FitsFrameWriter::new())),
        #[cfg(not(feature = "storage_fits"))]
        FrameFormat::Fits => Err(DaqError::FeatureNotEnabled("storage_fits".to_string())),
    }
}

/// Append `.ext` without touching dots already in the file name
/// (`amplitude0.4` becomes `amplitude0.4.csv`).
pub fn append_extension(path: &Path, ext: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

/// Drop a `.fits`/`.csv` extension from a requested file name; the writer picks its own.
pub fn strip_frame_extension(filename: &str) -> &str {
    [".fits", ".csv"]
        .iter()
        .find_map(|ext| filename.strip_suffix(ext))
        .unwrap_or(filename)
}

/// Create `<initial_path>/<timestamp>_<suffix>` and return it.
///
/// A counter is appended when two experiments start within the same second.
pub fn create_data_path(initial_path: &Path, suffix: &str) -> AppResult<PathBuf> {
    let stamp = chrono::Local::now().format("%Y-%m-%dT%H-%M-%S");
    let base = initial_path.join(format!("{stamp}_{suffix}"));

    let mut candidate = base.clone();
    let mut counter = 1;
    while candidate.exists() {
        candidate = append_counter(&base, counter);
        counter += 1;
    }
    std::fs::create_dir_all(&candidate).map_err(|e| {
        DaqError::Storage(format!(
            "Failed to create data path '{}': {}",
            candidate.display(),
            e
        ))
    })?;
    Ok(candidate)
}

fn append_counter(base: &Path, counter: usize) -> PathBuf {
    let mut name = OsString::from(base.as_os_str());
    name.push(format!("_{counter}"));
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_paths_are_unique_and_suffixed() {
        let root = tempfile::tempdir().unwrap();
        let first = create_data_path(root.path(), "speckle_nulling").unwrap();
        let second = create_data_path(root.path(), "speckle_nulling").unwrap();
        assert_ne!(first, second);
        assert!(first.is_dir() && second.is_dir());
        let name = first.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.ends_with("_speckle_nulling"));
    }

    #[test]
    fn extension_handling() {
        assert_eq!(
            append_extension(Path::new("a/amplitude1.3"), "fits"),
            PathBuf::from("a/amplitude1.3.fits")
        );
        assert_eq!(strip_frame_extension("final_dark_zone.fits"), "final_dark_zone");
        assert_eq!(strip_frame_extension("dms_flat"), "dms_flat");
    }

    #[test]
    fn header_push_replaces_existing_card() {
        let mut header = FrameHeader::new().with("FPM", "direct");
        header.push("FPM", "coron");
        assert_eq!(header.get("FPM"), Some("coron"));
        assert_eq!(header.cards().count(), 1);
    }

    #[test]
    fn fits_requires_feature() {
        let result = frame_writer(FrameFormat::Fits);
        if cfg!(feature = "storage_fits") {
            assert!(result.is_ok());
        } else {
            assert!(matches!(result, Err(DaqError::FeatureNotEnabled(_))));
        }
    }
}
