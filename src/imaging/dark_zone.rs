//! Dark zone geometry.

use crate::config::{DarkZoneConfig, DarkZoneSide};
use ndarray::Array2;

/// Pixel mask of the dark zone: an annulus around the star, optionally cut to
/// one half of the image.
#[derive(Debug, Clone, PartialEq)]
pub struct DarkZone {
    mask: Array2<bool>,
    pixels_per_lambda_over_d: f64,
}

impl DarkZone {
    /// Dark zone on a `shape` image with the star at `(rows/2, cols/2)`.
    pub fn new(config: &DarkZoneConfig, shape: (usize, usize), pixels_per_lambda_over_d: f64) -> Self {
        let (rows, cols) = shape;
        let (center_row, center_col) = ((rows / 2) as f64, (cols / 2) as f64);
        let inner = config.inner_lambda_over_d * pixels_per_lambda_over_d;
        let outer = config.outer_lambda_over_d * pixels_per_lambda_over_d;
        let mask = Array2::from_shape_fn(shape, |(row, col)| {
            let dy = row as f64 - center_row;
            let dx = col as f64 - center_col;
            let radius = dx.hypot(dy);
            let on_side = match config.side {
                DarkZoneSide::Full => true,
                DarkZoneSide::Left => dx < 0.0,
                DarkZoneSide::Right => dx > 0.0,
                DarkZoneSide::Top => dy < 0.0,
                DarkZoneSide::Bottom => dy > 0.0,
            };
            on_side && radius >= inner && radius <= outer
        });
        Self {
            mask,
            pixels_per_lambda_over_d,
        }
    }

    /// Circular region of radius `radius_lambda_over_d` around the star.
    pub fn circle(shape: (usize, usize), radius_lambda_over_d: f64, pixels_per_lambda_over_d: f64) -> Self {
        let config = DarkZoneConfig {
            inner_lambda_over_d: 0.0,
            outer_lambda_over_d: radius_lambda_over_d,
            side: DarkZoneSide::Full,
        };
        Self::new(&config, shape, pixels_per_lambda_over_d)
    }

    /// `true` inside the dark zone.
    pub fn mask(&self) -> &Array2<bool> {
        &self.mask
    }

    /// `(rows, cols)` of the mask.
    pub fn shape(&self) -> (usize, usize) {
        self.mask.dim()
    }

    /// Sampling the mask was built with.
    pub fn pixels_per_lambda_over_d(&self) -> f64 {
        self.pixels_per_lambda_over_d
    }

    /// Pixels inside the dark zone.
    pub fn pixel_count(&self) -> usize {
        self.mask.iter().filter(|&&inside| inside).count()
    }

    /// Whether `(row, col)` lies inside the dark zone.
    pub fn contains(&self, row: usize, col: usize) -> bool {
        self.mask.get((row, col)).copied().unwrap_or(false)
    }

    /// Mean of `image` over the dark zone.
    pub fn mean(&self, image: &Array2<f64>) -> f64 {
        let (sum, count) = self.masked(image).fold((0.0, 0usize), |(s, n), (_, v)| (s + v, n + 1));
        if count == 0 {
            0.0
        } else {
            sum / count as f64
        }
    }

    /// Brightest dark zone pixel of `image`.
    pub fn max_location(&self, image: &Array2<f64>) -> Option<((usize, usize), f64)> {
        self.masked(image)
            .max_by(|a, b| a.1.total_cmp(&b.1))
    }

    /// Largest dark zone value of `image`, 0 for an empty zone.
    pub fn max(&self, image: &Array2<f64>) -> f64 {
        self.max_location(image).map(|(_, v)| v).unwrap_or(0.0)
    }

    fn masked<'a>(&'a self, image: &'a Array2<f64>) -> impl Iterator<Item = ((usize, usize), f64)> + 'a {
        image
            .indexed_iter()
            .filter(move |(index, _)| self.mask.get(*index).copied().unwrap_or(false))
            .map(|(index, &value)| (index, value))
    }
}
