//! CSV frame files.
//!
//! Header cards go first as `# KEY = value` comment lines, followed by one CSV
//! record per image row.

use super::{append_extension, FrameHeader, FrameWriter, EXPTIME};
use crate::error::{AppResult, DaqError};
use crate::hardware::frame::Frame;
use ndarray::Array2;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A writer for CSV frame files.
#[derive(Debug, Default, Clone, Copy)]
pub struct CsvFrameWriter;

impl CsvFrameWriter {
    /// CSV writer.
    pub fn new() -> Self {
        Self
    }
}

impl FrameWriter for CsvFrameWriter {
    fn extension(&self) -> &'static str {
        "csv"
    }

    fn write(&self, path: &Path, frame: &Frame, header: &FrameHeader) -> AppResult<PathBuf> {
        let path = append_extension(path, self.extension());
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let storage_err = |e: &dyn std::fmt::Display| {
            DaqError::Storage(format!("Failed to write '{}': {}", path.display(), e))
        };

        let mut file = BufWriter::new(File::create(&path).map_err(|e| storage_err(&e))?);
        for (key, value) in header.cards() {
            writeln!(file, "# {key} = {value}").map_err(|e| storage_err(&e))?;
        }

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        for row in frame.data.rows() {
            writer
                .write_record(row.iter().map(|v| v.to_string()))
                .map_err(|e| storage_err(&e))?;
        }
        writer.flush().map_err(|e| storage_err(&e))?;
        Ok(path)
    }

    fn read(&self, path: &Path) -> AppResult<(Frame, FrameHeader)> {
        let storage_err = |e: &dyn std::fmt::Display| {
            DaqError::Storage(format!("Failed to read '{}': {}", path.display(), e))
        };
        let text = std::fs::read_to_string(path).map_err(|e| storage_err(&e))?;

        let mut header = FrameHeader::new();
        for line in text.lines().take_while(|line| line.starts_with('#')) {
            if let Some((key, value)) = line.trim_start_matches('#').split_once('=') {
                header.push(key.trim(), value.trim());
            }
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .comment(Some(b'#'))
            .from_reader(text.as_bytes());
        let mut values = Vec::new();
        let mut rows = 0;
        let mut cols = 0;
        for record in reader.records() {
            let record = record.map_err(|e| storage_err(&e))?;
            cols = record.len();
            for field in record.iter() {
                values.push(field.trim().parse::<f64>().map_err(|e| storage_err(&e))?);
            }
            rows += 1;
        }
        let data = Array2::from_shape_vec((rows, cols), values).map_err(|e| storage_err(&e))?;

        let exposure = header
            .get(EXPTIME)
            .and_then(|v| v.parse::<f64>().ok())
            .map(Duration::from_secs_f64)
            .unwrap_or_default();
        Ok((Frame::new(data, exposure), header))
    }
}
