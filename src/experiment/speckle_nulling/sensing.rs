//! Locate the brightest dark-zone speckle and the sine that would create it.
//!
//! A sine of `ncycles` cycles across the DM puts a speckle `ncycles` lambda/D
//! from the star along the sine's wave vector. Its contrast relates to the
//! surface peak-to-valley by `C = (π·ptv/λ)²`, so the sine that matches an
//! observed speckle has `ptv = λ·√C / π`.

use crate::analysis::peak_centroid;
use crate::error::{AppResult, DaqError};
use crate::imaging::DarkZone;
use crate::types::Nanometers;
use ndarray::Array2;
use serde::Serialize;
use std::f64::consts::PI;

/// Speckle found by [`speckle_sensing`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SpeckleEstimate {
    /// Brightest dark-zone pixel `(row, col)`
    pub location: (usize, usize),
    /// Sub-pixel peak position `(row, col)`
    pub centroid: (f64, f64),
    /// Contrast at `location`
    pub contrast: f64,
    /// Distance from the star in lambda/D, i.e. cycles across the DM
    pub ncycles: f64,
    /// Angle of the speckle from the image x axis in degrees
    pub angle_deg: f64,
    /// Sine surface peak-to-valley producing the speckle
    pub peak_to_valley: Nanometers,
}

/// Find the brightest speckle of `contrast` inside `zone`.
///
/// `contrast` is the image normalized by the direct PSF peak, with the star at
/// `(rows/2, cols/2)`.
pub fn speckle_sensing(
    contrast: &Array2<f64>,
    zone: &DarkZone,
    wavelength_nm: f64,
) -> AppResult<SpeckleEstimate> {
    if contrast.dim() != zone.shape() {
        return Err(DaqError::Processing(format!(
            "Image shape {:?} does not match dark zone shape {:?}",
            contrast.dim(),
            zone.shape()
        )));
    }
    let (location, peak) = zone
        .max_location(contrast)
        .ok_or_else(|| DaqError::Processing("Dark zone is empty".to_string()))?;
    if peak.is_nan() || peak <= 0.0 {
        return Err(DaqError::Processing(
            "No speckle found in the dark zone".to_string(),
        ));
    }

    let centroid = peak_centroid(contrast, location);
    let (rows, cols) = contrast.dim();
    let dy = centroid.0 - (rows / 2) as f64;
    let dx = centroid.1 - (cols / 2) as f64;
    let ppld = zone.pixels_per_lambda_over_d();

    Ok(SpeckleEstimate {
        location,
        centroid,
        contrast: peak,
        ncycles: dx.hypot(dy) / ppld,
        angle_deg: dy.atan2(dx).to_degrees(),
        peak_to_valley: Nanometers(wavelength_nm * peak.sqrt() / PI),
    })
}
