//! Phase and amplitude of the correcting sine from probe measurements.

use crate::analysis::{box_sum, fit_parabola, fit_sinusoid};
use crate::error::{AppResult, DaqError};
use crate::hardware::frame::Frame;
use tracing::debug;

/// Probe phases in degrees, 0 to 330 in steps of 30.
pub const PROBE_PHASES_DEG: [f64; 12] = [
    0.0, 30.0, 60.0, 90.0, 120.0, 150.0, 180.0, 210.0, 240.0, 270.0, 300.0, 330.0,
];

/// Probe amplitudes as multiples of the sensed peak-to-valley, 0.1 to 1.9 in
/// steps of 0.3.
pub const AMPLITUDE_COEFFICIENTS: [f64; 7] = [0.1, 0.4, 0.7, 1.0, 1.3, 1.6, 1.9];

/// Half width of the box the speckle intensity is summed over.
const SPECKLE_BOX_HALF_WIDTH: usize = 1;

/// Speckle intensity at `location`, in counts per ms so images with different
/// exposure times compare.
pub fn speckle_intensity(image: &Frame, location: (usize, usize)) -> f64 {
    box_sum(&image.rate_per_ms(), location, SPECKLE_BOX_HALF_WIDTH)
}

/// Phase in degrees, within `[0, 360)`, minimizing the fitted
/// `A + B·cos φ + C·sin φ` through the probe intensities.
pub fn speckle_control_phase(phases_deg: &[f64], intensities: &[f64]) -> AppResult<f64> {
    let fit = fit_sinusoid(phases_deg, intensities)?;
    let phase = fit.minimum_phase_deg();
    debug!(?fit, phase, "Phase control");
    Ok(phase)
}

/// Amplitude coefficient minimizing a parabola fitted through the probe
/// intensities, clamped to the tested range.
///
/// When the parabola has no minimum the best tested coefficient is used.
pub fn speckle_control_amplitude(coefficients: &[f64], intensities: &[f64]) -> AppResult<f64> {
    let (low, high) = coefficients
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &c| {
            (lo.min(c), hi.max(c))
        });
    let fit = fit_parabola(coefficients, intensities)?;
    let coefficient = match fit.minimum() {
        Some(minimum) => minimum.clamp(low, high),
        None => coefficients
            .iter()
            .zip(intensities)
            .min_by(|a, b| a.1.total_cmp(b.1))
            .map(|(&c, _)| c)
            .ok_or_else(|| DaqError::Processing("No amplitude probes".to_string()))?,
    };
    debug!(?fit, coefficient, "Amplitude control");
    Ok(coefficient)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    use std::time::Duration;

    #[test]
    fn phase_of_minimum_intensity() {
        let intensities: Vec<f64> = PROBE_PHASES_DEG
            .iter()
            .map(|p| 5.0 + 4.0 * (p - 200.0_f64).to_radians().cos())
            .collect();
        let phase = speckle_control_phase(&PROBE_PHASES_DEG, &intensities).unwrap();
        assert!((phase - 20.0).abs() < 1e-6, "phase = {phase}");
    }

    #[test]
    fn amplitude_at_parabola_minimum() {
        let intensities: Vec<f64> = AMPLITUDE_COEFFICIENTS
            .iter()
            .map(|c| (c - 1.15_f64).powi(2) + 0.5)
            .collect();
        let coefficient =
            speckle_control_amplitude(&AMPLITUDE_COEFFICIENTS, &intensities).unwrap();
        assert!((coefficient - 1.15).abs() < 1e-9);
    }

    #[test]
    fn amplitude_is_clamped_to_tested_range() {
        let intensities: Vec<f64> = AMPLITUDE_COEFFICIENTS
            .iter()
            .map(|c| (c - 3.0_f64).powi(2))
            .collect();
        let coefficient =
            speckle_control_amplitude(&AMPLITUDE_COEFFICIENTS, &intensities).unwrap();
        assert_eq!(coefficient, 1.9);
    }

    #[test]
    fn concave_fit_falls_back_to_best_probe() {
        let intensities: Vec<f64> = AMPLITUDE_COEFFICIENTS
            .iter()
            .map(|c| -(c - 1.0_f64).powi(2) + (c - 0.1) * 0.01)
            .collect();
        let coefficient =
            speckle_control_amplitude(&AMPLITUDE_COEFFICIENTS, &intensities).unwrap();
        assert_eq!(coefficient, 0.1);
    }

    #[test]
    fn intensity_is_normalized_by_exposure() {
        let mut data = Array2::zeros((8, 8));
        data[[4, 4]] = 20.0;
        data[[4, 5]] = 10.0;
        let frame = Frame::new(data, Duration::from_millis(10));
        assert!((speckle_intensity(&frame, (4, 4)) - 3.0).abs() < 1e-12);
    }
}
