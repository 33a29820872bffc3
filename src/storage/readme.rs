//! Tab-separated parameter listings written next to experiment data.

use crate::error::{AppResult, DaqError};
use std::path::Path;

/// Write `rows` as `parameter<TAB>value` lines, without a header row.
pub fn write_readme(path: &Path, rows: &[(&str, String)]) -> AppResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let storage_err =
        |e: csv::Error| DaqError::Storage(format!("Failed to write '{}': {}", path.display(), e));

    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_path(path)
        .map_err(storage_err)?;
    for (parameter, value) in rows {
        writer
            .write_record([*parameter, value.as_str()])
            .map_err(storage_err)?;
    }
    writer.flush().map_err(|e| storage_err(e.into()))
}
