//! Image recentering.

use crate::analysis::{bright_centroid, peak_centroid};
use crate::types::{FpmPosition, ImageCentering};
use ndarray::Array2;
use tracing::debug;

/// Pixels at or above this fraction of the peak count as satellite spots.
const SPOT_FRACTION: f64 = 0.5;

/// Recenter `image` so the star lands on `(rows/2, cols/2)`.
///
/// Returns the image and the integer `(row, col)` shift applied.
pub fn recenter(
    image: Array2<f64>,
    centering: ImageCentering,
    fpm_position: FpmPosition,
) -> (Array2<f64>, (isize, isize)) {
    let method = match (centering, fpm_position) {
        (ImageCentering::Auto, FpmPosition::Direct) => ImageCentering::Psf,
        // Occulted star and no apodizer spots to register on.
        (ImageCentering::Auto, FpmPosition::Coron) => ImageCentering::Off,
        (other, _) => other,
    };

    let found = match method {
        ImageCentering::Off | ImageCentering::Auto => None,
        ImageCentering::Psf => psf_center(&image),
        ImageCentering::CustomApodizerSpots => bright_centroid(&image, SPOT_FRACTION),
    };
    let Some((row, col)) = found else {
        return (image, (0, 0));
    };

    let (rows, cols) = image.dim();
    let shift = (
        (rows / 2) as isize - row.round() as isize,
        (cols / 2) as isize - col.round() as isize,
    );
    if shift == (0, 0) {
        return (image, shift);
    }
    debug!(?method, ?shift, "Recentering image");
    (shift_image(&image, shift), shift)
}

fn psf_center(image: &Array2<f64>) -> Option<(f64, f64)> {
    let mut best: Option<((usize, usize), f64)> = None;
    for (index, &value) in image.indexed_iter() {
        if best.map_or(true, |(_, v)| value > v) {
            best = Some((index, value));
        }
    }
    let (peak, value) = best?;
    (value > 0.0).then(|| peak_centroid(image, peak))
}

/// Shift by whole pixels, filling uncovered pixels with zero.
pub fn shift_image(image: &Array2<f64>, (rows_shift, cols_shift): (isize, isize)) -> Array2<f64> {
    let (rows, cols) = image.dim();
    Array2::from_shape_fn((rows, cols), |(r, c)| {
        let src_r = r as isize - rows_shift;
        let src_c = c as isize - cols_shift;
        if (0..rows as isize).contains(&src_r) && (0..cols as isize).contains(&src_c) {
            image[[src_r as usize, src_c as usize]]
        } else {
            0.0
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn psf_is_moved_to_center() {
        let mut image = Array2::zeros((16, 16));
        image[[5, 6]] = 10.0;
        let (centered, shift) = recenter(image, ImageCentering::Psf, FpmPosition::Direct);
        assert_eq!(shift, (3, 2));
        assert_eq!(centered[[8, 8]], 10.0);
    }

    #[test]
    fn auto_leaves_coronagraphic_images_alone() {
        let mut image = Array2::zeros((16, 16));
        image[[2, 2]] = 1.0;
        let (_, shift) = recenter(image, ImageCentering::Auto, FpmPosition::Coron);
        assert_eq!(shift, (0, 0));
    }

    #[test]
    fn spots_register_on_their_midpoint() {
        let mut image = Array2::zeros((16, 16));
        image[[7, 3]] = 4.0;
        image[[7, 11]] = 4.0;
        let (centered, shift) =
            recenter(image, ImageCentering::CustomApodizerSpots, FpmPosition::Coron);
        assert_eq!(shift, (1, 1));
        assert_eq!(centered[[8, 4]], 4.0);
    }

    #[test]
    fn dark_image_is_not_moved() {
        let (_, shift) = recenter(Array2::zeros((8, 8)), ImageCentering::Psf, FpmPosition::Direct);
        assert_eq!(shift, (0, 0));
    }
}
