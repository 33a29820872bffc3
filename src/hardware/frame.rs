//! Camera frames.

use ndarray::Array2;
use std::time::Duration;

/// A single camera readout in counts, row-major `(rows, cols)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Pixel counts
    pub data: Array2<f64>,
    /// Exposure time of the frame
    pub exposure: Duration,
}

impl Frame {
    /// Frame from pixel data.
    pub fn new(data: Array2<f64>, exposure: Duration) -> Self {
        Self { data, exposure }
    }

    /// Dark frame.
    pub fn zeros(rows: usize, cols: usize, exposure: Duration) -> Self {
        Self::new(Array2::zeros((rows, cols)), exposure)
    }

    /// `(rows, cols)`
    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    /// Geometric center `(row, col)`; for even sizes this is the pixel
    /// an fftshifted PSF peaks on.
    pub fn center(&self) -> (f64, f64) {
        let (rows, cols) = self.shape();
        ((rows / 2) as f64, (cols / 2) as f64)
    }

    /// Brightest pixel.
    pub fn max(&self) -> f64 {
        self.data.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    /// Mean pixel value.
    pub fn mean(&self) -> f64 {
        self.data.mean().unwrap_or(0.0)
    }

    /// Location and value of the brightest pixel.
    pub fn argmax(&self) -> ((usize, usize), f64) {
        let mut best = ((0, 0), f64::NEG_INFINITY);
        for ((row, col), &value) in self.data.indexed_iter() {
            if value > best.1 {
                best = ((row, col), value);
            }
        }
        best
    }

    /// Counts per millisecond of exposure.
    pub fn rate_per_ms(&self) -> Array2<f64> {
        let ms = (self.exposure.as_secs_f64() * 1e3).max(f64::MIN_POSITIVE);
        &self.data / ms
    }

    /// Pixel-wise mean of several frames. All frames must share a shape.
    pub fn average(frames: &[Frame]) -> Option<Frame> {
        let first = frames.first()?;
        let mut sum = Array2::<f64>::zeros(first.shape());
        for frame in frames {
            if frame.shape() != first.shape() {
                return None;
            }
            sum += &frame.data;
        }
        Some(Frame::new(sum / frames.len() as f64, first.exposure))
    }
}
