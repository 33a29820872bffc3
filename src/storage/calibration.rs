//! Calibration database.
//!
//! A CSV file under the data root; each call appends one measurement.

use crate::error::{AppResult, DaqError};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tracing::info;

const DATABASE_FILE: &str = "calibration_db.csv";

/// One row of the calibration database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    /// RFC 3339 time of the measurement
    pub timestamp: String,
    /// What was measured
    pub description: String,
    /// Measured value
    pub value: f64,
    /// Unit of `value`
    pub unit: String,
}

/// Database file under `data_root`.
pub fn database_path(data_root: &Path) -> PathBuf {
    data_root.join(DATABASE_FILE)
}

/// Append a measurement to `<data_root>/calibration_db.csv`.
pub fn record_calibration_measurement(
    data_root: &Path,
    description: &str,
    value: f64,
    unit: &str,
) -> AppResult<()> {
    std::fs::create_dir_all(data_root)?;
    let path = database_path(data_root);
    let is_new = !path.exists();
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| DaqError::Storage(format!("Failed to open '{}': {}", path.display(), e)))?;

    let mut writer = csv::WriterBuilder::new()
        .has_headers(is_new)
        .from_writer(file);
    let record = CalibrationRecord {
        timestamp: chrono::Local::now().to_rfc3339(),
        description: description.to_string(),
        value,
        unit: unit.to_string(),
    };
    writer
        .serialize(&record)
        .and_then(|_| writer.flush().map_err(csv::Error::from))
        .map_err(|e| DaqError::Storage(format!("Failed to write '{}': {}", path.display(), e)))?;

    info!(description, value, unit, "Recorded calibration measurement");
    Ok(())
}

/// Read all measurements back, oldest first.
pub fn read_calibration_records(data_root: &Path) -> AppResult<Vec<CalibrationRecord>> {
    let path = database_path(data_root);
    let mut reader = csv::Reader::from_path(&path)
        .map_err(|e| DaqError::Storage(format!("Failed to open '{}': {}", path.display(), e)))?;
    reader
        .deserialize()
        .collect::<Result<Vec<CalibrationRecord>, _>>()
        .map_err(|e| DaqError::Storage(format!("Failed to parse '{}': {}", path.display(), e)))
}
