//! Linear least-squares fits used by the speckle nulling control steps.
//!
//! Both models are linear in their coefficients; each fit solves the design
//! matrix with an SVD.

use crate::error::{AppResult, DaqError};
use nalgebra::{DMatrix, DVector};

/// Singular values below this fraction of the largest count as zero.
const SINGULAR_TOLERANCE: f64 = 1e-12;

/// `offset + cos_coeff·cos φ + sin_coeff·sin φ`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SinusoidFit {
    /// Constant term
    pub offset: f64,
    /// Coefficient of `cos φ`
    pub cos_coeff: f64,
    /// Coefficient of `sin φ`
    pub sin_coeff: f64,
}

impl SinusoidFit {
    /// Model value at `phase_deg`.
    pub fn evaluate(&self, phase_deg: f64) -> f64 {
        let (sin, cos) = phase_deg.to_radians().sin_cos();
        self.offset + self.cos_coeff * cos + self.sin_coeff * sin
    }

    /// Phase in `[0, 360)` degrees where the model is smallest.
    pub fn minimum_phase_deg(&self) -> f64 {
        let phase = (-self.sin_coeff).atan2(-self.cos_coeff).to_degrees();
        phase.rem_euclid(360.0)
    }

    /// Half the peak-to-valley of the fitted sinusoid.
    pub fn amplitude(&self) -> f64 {
        self.cos_coeff.hypot(self.sin_coeff)
    }
}

/// `a·x² + b·x + c`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParabolaFit {
    /// Quadratic coefficient
    pub a: f64,
    /// Linear coefficient
    pub b: f64,
    /// Constant term
    pub c: f64,
}

impl ParabolaFit {
    /// Model value at `x`.
    pub fn evaluate(&self, x: f64) -> f64 {
        (self.a * x + self.b) * x + self.c
    }

    /// Abscissa of the vertex; `None` unless the parabola opens upward.
    pub fn minimum(&self) -> Option<f64> {
        (self.a > 0.0).then(|| -self.b / (2.0 * self.a))
    }
}

/// Fit a sinusoid in the phase (degrees) to `values`.
pub fn fit_sinusoid(phases_deg: &[f64], values: &[f64]) -> AppResult<SinusoidFit> {
    let rows: Vec<[f64; 3]> = phases_deg
        .iter()
        .map(|phase| {
            let (sin, cos) = phase.to_radians().sin_cos();
            [1.0, cos, sin]
        })
        .collect();
    let [offset, cos_coeff, sin_coeff] = least_squares(&rows, values)?;
    Ok(SinusoidFit {
        offset,
        cos_coeff,
        sin_coeff,
    })
}

/// Fit a parabola to `(x, y)` samples.
pub fn fit_parabola(x: &[f64], y: &[f64]) -> AppResult<ParabolaFit> {
    let rows: Vec<[f64; 3]> = x.iter().map(|&x| [x * x, x, 1.0]).collect();
    let [a, b, c] = least_squares(&rows, y)?;
    Ok(ParabolaFit { a, b, c })
}

fn least_squares(rows: &[[f64; 3]], values: &[f64]) -> AppResult<[f64; 3]> {
    if rows.len() != values.len() {
        return Err(DaqError::Processing(format!(
            "Fit needs one value per sample, got {} samples and {} values",
            rows.len(),
            values.len()
        )));
    }
    if rows.len() < 3 {
        return Err(DaqError::Processing(format!(
            "Fit needs at least 3 samples, got {}",
            rows.len()
        )));
    }

    let design = DMatrix::from_fn(rows.len(), 3, |r, c| rows[r][c]);
    let observed = DVector::from_column_slice(values);
    let svd = design.svd(true, true);
    let eps = svd.singular_values.max() * SINGULAR_TOLERANCE;
    if svd.rank(eps) < 3 {
        return Err(DaqError::Processing(
            "Fit is singular: samples do not constrain the model".to_string(),
        ));
    }
    let solution = svd
        .solve(&observed, eps)
        .map_err(|e| DaqError::Processing(format!("Least-squares solve failed: {e}")))?;
    Ok([solution[0], solution[1], solution[2]])
}
