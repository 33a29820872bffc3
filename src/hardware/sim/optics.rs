//! Fourier optics model of the bench.
//!
//! The pupil is sampled on the DM actuator grid (one pixel per actuator) and
//! zero-padded by the camera oversampling factor, so one lambda/D in the focal
//! plane spans `oversampling` pixels and a DM sine with `n` cycles across the
//! aperture lands `n` lambda/D from the star.
//!
//! The coronagraph is ideal: it removes the component of the pupil field that
//! matches the unaberrated pupil, leaving only light scattered by the DM and
//! segment errors.

use crate::hardware::segmented::{segment_centers, SegmentedDmCommand};
use ndarray::Array2;
use num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::f64::consts::PI;
use std::sync::Arc;

/// Physical segment pitch, used to turn tip/tilt into surface height.
const SEGMENT_PITCH_MM: f64 = 1.4;

/// Pupil geometry and the FFT plan from pupil to focal plane.
pub struct OpticalModel {
    n: usize,
    size: usize,
    pupil: Array2<f64>,
    segment_index: Array2<usize>,
    segment_centers_px: Vec<(f64, f64)>,
    pixel_mm: f64,
    wavelength_nm: f64,
    normalization: f64,
    fft: Arc<dyn Fft<f64>>,
}

impl OpticalModel {
    /// `n` pupil samples across, focal plane of `n * oversampling` pixels.
    pub fn new(n: usize, oversampling: usize, rings: usize, wavelength_nm: f64) -> Self {
        let size = n * oversampling.max(1);
        let center = (n as f64 - 1.0) / 2.0;
        let radius = n as f64 / 2.0;
        let pupil = Array2::from_shape_fn((n, n), |(row, col)| {
            let dy = row as f64 - center;
            let dx = col as f64 - center;
            if dx.hypot(dy) <= radius {
                1.0
            } else {
                0.0
            }
        });

        let pitch_px = n as f64 / (2 * rings + 1) as f64;
        let segment_centers_px: Vec<(f64, f64)> = segment_centers(rings)
            .into_iter()
            .map(|(x, y)| (center + x * pitch_px, center + y * pitch_px))
            .collect();
        let segment_index = Array2::from_shape_fn((n, n), |(row, col)| {
            nearest(&segment_centers_px, col as f64, row as f64)
        });

        let open_area: f64 = pupil.sum();
        let fft = FftPlanner::new().plan_fft_forward(size);

        Self {
            n,
            size,
            pupil,
            segment_index,
            segment_centers_px,
            pixel_mm: SEGMENT_PITCH_MM / pitch_px,
            wavelength_nm,
            normalization: open_area * open_area,
            fft,
        }
    }

    /// Focal plane size in pixels.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Focal plane intensity normalized to the peak of the unaberrated,
    /// unocculted PSF. The star sits at pixel `(size/2, size/2)`.
    pub fn intensity(
        &self,
        dm1_nm: &Array2<f64>,
        dm2_nm: &Array2<f64>,
        segments: &SegmentedDmCommand,
        coronagraph: bool,
    ) -> Array2<f64> {
        let surface = self.surface_nm(dm1_nm, dm2_nm, segments);

        let mut field = Array2::from_shape_fn((self.n, self.n), |(row, col)| {
            let phase = 4.0 * PI * surface[[row, col]] / self.wavelength_nm;
            Complex::from_polar(self.pupil[[row, col]], phase)
        });

        if coronagraph {
            let open: f64 = self.pupil.sum();
            let mean = field.sum() / open;
            field.zip_mut_with(&self.pupil, |e, &p| *e -= mean * p);
        }

        let focal = self.fft2(&field);
        let half = self.size / 2;
        Array2::from_shape_fn((self.size, self.size), |(row, col)| {
            let r = (row + half) % self.size;
            let c = (col + half) % self.size;
            focal[r * self.size + c].norm_sqr() / self.normalization
        })
    }

    fn surface_nm(
        &self,
        dm1_nm: &Array2<f64>,
        dm2_nm: &Array2<f64>,
        segments: &SegmentedDmCommand,
    ) -> Array2<f64> {
        let mut surface = Array2::<f64>::zeros((self.n, self.n));
        for dm in [dm1_nm, dm2_nm] {
            if dm.dim() == surface.dim() {
                surface += dm;
            }
        }
        if segments.is_flat() {
            return surface;
        }
        for ((row, col), value) in surface.indexed_iter_mut() {
            let index = self.segment_index[[row, col]];
            let Some(segment) = segments.segments().get(index) else {
                continue;
            };
            let (cx, cy) = self.segment_centers_px[index];
            let dx_mm = (col as f64 - cx) * self.pixel_mm;
            let dy_mm = (row as f64 - cy) * self.pixel_mm;
            // mrad * mm = um
            let height_um = segment.piston_um + segment.tip_mrad * dx_mm + segment.tilt_mrad * dy_mm;
            *value += height_um * 1e3;
        }
        surface
    }

    /// Zero-padded 2-D FFT, row-major result.
    fn fft2(&self, field: &Array2<Complex<f64>>) -> Vec<Complex<f64>> {
        let size = self.size;
        let offset = (size - self.n) / 2;
        let mut buffer = vec![Complex::new(0.0, 0.0); size * size];
        for ((row, col), value) in field.indexed_iter() {
            buffer[(row + offset) * size + col + offset] = *value;
        }

        self.fft.process(&mut buffer);
        let mut transposed = transpose(&buffer, size);
        self.fft.process(&mut transposed);
        transpose(&transposed, size)
    }
}

fn transpose(buffer: &[Complex<f64>], size: usize) -> Vec<Complex<f64>> {
    let mut out = vec![Complex::new(0.0, 0.0); size * size];
    for row in 0..size {
        for col in 0..size {
            out[col * size + row] = buffer[row * size + col];
        }
    }
    out
}

fn nearest(centers: &[(f64, f64)], x: f64, y: f64) -> usize {
    centers
        .iter()
        .enumerate()
        .map(|(i, &(cx, cy))| (i, (cx - x).powi(2) + (cy - y).powi(2)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::dm::sine_surface;
    use crate::types::{Nanometers, SinSpecification};

    fn model() -> OpticalModel {
        OpticalModel::new(32, 4, 3, 640.0)
    }

    fn flat(n: usize) -> Array2<f64> {
        Array2::zeros((n, n))
    }

    #[test]
    fn unocculted_flat_peak_is_one() {
        let optics = model();
        let image = optics.intensity(&flat(32), &flat(32), &SegmentedDmCommand::flat(37), false);
        let half = optics.size() / 2;
        assert!((image[[half, half]] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn coronagraph_removes_flat_wavefront() {
        let optics = model();
        let image = optics.intensity(&flat(32), &flat(32), &SegmentedDmCommand::flat(37), true);
        assert!(image.iter().all(|&v| v < 1e-20));
    }

    #[test]
    fn sine_makes_speckle_pair_at_ncycles() {
        let optics = model();
        let spec = SinSpecification::new(0.0, 8.0, Nanometers(20.0), 0.0);
        let dm1 = sine_surface(&spec, 32);
        let image = optics.intensity(&dm1, &flat(32), &SegmentedDmCommand::flat(37), true);
        let half = optics.size() / 2;
        let right = image[[half, half + 32]];
        let left = image[[half, half - 32]];
        // (pi * ptv / lambda)^2 for a small phase sine
        let expected = (PI * 20.0 / 640.0).powi(2);
        assert!((right - left).abs() / right < 1e-6);
        assert!((right / expected - 1.0).abs() < 0.1, "{right} vs {expected}");
    }

    #[test]
    fn segment_piston_scatters_light() {
        let optics = model();
        let mut pistons = vec![0.0; 37];
        pistons[3] = 0.02;
        let segments = SegmentedDmCommand::from_pistons_um(&pistons);
        let image = optics.intensity(&flat(32), &flat(32), &segments, true);
        assert!(image.sum() > 1e-6);
    }
}
