//! Plain-text numeric tables.
//!
//! Reads whitespace- or comma-separated matrices (lines starting with `#` are
//! comments) and writes them back in the `%.18e` scientific layout analysis
//! notebooks expect.

use crate::error::{AppResult, DaqError};
use ndarray::Array2;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

/// Read a numeric matrix. A file with one value per line becomes a column.
pub fn load_matrix(path: &Path) -> AppResult<Array2<f64>> {
    let text = fs::read_to_string(path).map_err(|e| {
        DaqError::Storage(format!("Failed to read '{}': {}", path.display(), e))
    })?;

    let mut values = Vec::new();
    let mut cols = None;
    let mut rows = 0;
    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let row = line
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|token| !token.is_empty())
            .map(|token| {
                token.parse::<f64>().map_err(|_| {
                    DaqError::Storage(format!(
                        "{}:{}: '{}' is not a number",
                        path.display(),
                        line_no + 1,
                        token
                    ))
                })
            })
            .collect::<AppResult<Vec<f64>>>()?;

        match cols {
            None => cols = Some(row.len()),
            Some(n) if n != row.len() => {
                return Err(DaqError::Storage(format!(
                    "{}:{}: expected {} columns, found {}",
                    path.display(),
                    line_no + 1,
                    n,
                    row.len()
                )))
            }
            Some(_) => {}
        }
        values.extend(row);
        rows += 1;
    }

    let cols = cols.ok_or_else(|| {
        DaqError::Storage(format!("'{}' contains no data", path.display()))
    })?;
    Array2::from_shape_vec((rows, cols), values)
        .map_err(|e| DaqError::Storage(format!("'{}': {}", path.display(), e)))
}

/// Read a file as a flat vector, whatever its row/column layout.
pub fn load_vector(path: &Path) -> AppResult<Vec<f64>> {
    Ok(load_matrix(path)?.iter().copied().collect())
}

/// Write one value per line.
pub fn save_vector(path: &Path, values: &[f64]) -> AppResult<()> {
    let mut out = String::new();
    for value in values {
        let _ = writeln!(out, "{}", scientific(*value));
    }
    write(path, out)
}

/// Write a matrix with space-separated columns.
pub fn save_matrix(path: &Path, matrix: &Array2<f64>) -> AppResult<()> {
    let mut out = String::new();
    for row in matrix.rows() {
        let line: Vec<String> = row.iter().map(|v| scientific(*v)).collect();
        let _ = writeln!(out, "{}", line.join(" "));
    }
    write(path, out)
}

fn write(path: &Path, contents: String) -> AppResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)
        .map_err(|e| DaqError::Storage(format!("Failed to write '{}': {}", path.display(), e)))
}

/// `%.18e` with a signed, two-digit exponent (`2.500000000000000000e+02`).
pub fn scientific(value: f64) -> String {
    let formatted = format!("{:.18e}", value);
    pad_exponent(&formatted)
}

/// Shortest decimal form that round-trips, switching to exponent notation for
/// very small or large magnitudes (`1e-10`, `2.5e-09`, `0.001`, `3.0`).
///
/// Used for numbers that end up in file names so they match names produced by
/// the analysis tooling.
pub fn short_float(value: f64) -> String {
    let magnitude = value.abs();
    if value != 0.0 && !(1e-4..1e16).contains(&magnitude) {
        pad_exponent(&format!("{:e}", value))
    } else {
        let plain = format!("{}", value);
        if plain.contains('.') || plain.contains("inf") || plain.contains("NaN") {
            plain
        } else {
            format!("{plain}.0")
        }
    }
}

fn pad_exponent(formatted: &str) -> String {
    match formatted.split_once('e') {
        Some((mantissa, exponent)) => {
            let exp: i32 = exponent.parse().unwrap_or(0);
            let sign = if exp < 0 { '-' } else { '+' };
            format!("{mantissa}e{sign}{:02}", exp.abs())
        }
        None => formatted.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn short_float_matches_analysis_file_names() {
        assert_eq!(short_float(1e-10), "1e-10");
        assert_eq!(short_float(2.5e-9), "2.5e-09");
        assert_eq!(short_float(1e-5), "1e-05");
        assert_eq!(short_float(0.001), "0.001");
        assert_eq!(short_float(3.0), "3.0");
    }

    #[test]
    fn scientific_layout() {
        assert_eq!(scientific(0.0015), "1.500000000000000031e-03");
        assert_eq!(scientific(-0.5), "-5.000000000000000000e-01");
        assert_eq!(scientific(250.0), "2.500000000000000000e+02");
    }

    #[test]
    fn matrix_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("modes.txt");
        let matrix = array![[1.0, -2.5], [3.25, 4.0], [0.0, 1e-12]];
        save_matrix(&path, &matrix).unwrap();
        assert_eq!(load_matrix(&path).unwrap(), matrix);
    }

    #[test]
    fn loads_comma_separated_with_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cmd.csv");
        fs::write(&path, "# DM command\n1,2,3\n4, 5, 6\n").unwrap();
        let matrix = load_matrix(&path).unwrap();
        assert_eq!(matrix.dim(), (2, 3));
        assert_eq!(matrix[[1, 1]], 5.0);
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.txt");
        fs::write(&path, "1 2 3\n4 5\n").unwrap();
        let err = load_matrix(&path).unwrap_err();
        assert!(err.to_string().contains("expected 3 columns"));
    }
}
