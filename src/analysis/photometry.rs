//! Pixel photometry on processed images.

use ndarray::Array2;

/// Sum of the `(2·half_width + 1)²` box around `(row, col)`, clipped to the image.
pub fn box_sum(image: &Array2<f64>, (row, col): (usize, usize), half_width: usize) -> f64 {
    let (rows, cols) = image.dim();
    let mut sum = 0.0;
    for r in row.saturating_sub(half_width)..=(row + half_width).min(rows.saturating_sub(1)) {
        for c in col.saturating_sub(half_width)..=(col + half_width).min(cols.saturating_sub(1)) {
            sum += image[[r, c]];
        }
    }
    sum
}

/// Intensity-weighted centroid of the 3×3 neighbourhood of `(row, col)`.
///
/// Negative pixels (background-subtracted noise) are ignored; an empty
/// neighbourhood returns the pixel itself.
pub fn peak_centroid(image: &Array2<f64>, (row, col): (usize, usize)) -> (f64, f64) {
    let (rows, cols) = image.dim();
    let mut weight = 0.0;
    let mut row_sum = 0.0;
    let mut col_sum = 0.0;
    for r in row.saturating_sub(1)..=(row + 1).min(rows.saturating_sub(1)) {
        for c in col.saturating_sub(1)..=(col + 1).min(cols.saturating_sub(1)) {
            let value = image[[r, c]].max(0.0);
            weight += value;
            row_sum += value * r as f64;
            col_sum += value * c as f64;
        }
    }
    if weight > 0.0 {
        (row_sum / weight, col_sum / weight)
    } else {
        (row as f64, col as f64)
    }
}

/// Intensity-weighted centroid of all pixels at or above `fraction` of the peak.
pub fn bright_centroid(image: &Array2<f64>, fraction: f64) -> Option<(f64, f64)> {
    let peak = image.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if peak.is_nan() || peak <= 0.0 {
        return None;
    }
    let threshold = peak * fraction;
    let mut weight = 0.0;
    let mut row_sum = 0.0;
    let mut col_sum = 0.0;
    for ((r, c), &value) in image.indexed_iter() {
        if value >= threshold {
            weight += value;
            row_sum += value * r as f64;
            col_sum += value * c as f64;
        }
    }
    Some((row_sum / weight, col_sum / weight))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn box_sum_clips_at_edges() {
        let image = Array2::from_elem((5, 5), 1.0);
        assert_eq!(box_sum(&image, (2, 2), 1), 9.0);
        assert_eq!(box_sum(&image, (0, 0), 1), 4.0);
    }

    #[test]
    fn centroid_moves_toward_brighter_neighbour() {
        let mut image = Array2::zeros((7, 7));
        image[[3, 3]] = 3.0;
        image[[3, 4]] = 1.0;
        let (row, col) = peak_centroid(&image, (3, 3));
        assert_eq!(row, 3.0);
        assert!((col - 3.25).abs() < 1e-12);
    }

    #[test]
    fn bright_centroid_of_symmetric_pair_is_midpoint() {
        let mut image = Array2::zeros((9, 9));
        image[[4, 1]] = 5.0;
        image[[4, 7]] = 5.0;
        image[[0, 0]] = 1.0;
        assert_eq!(bright_centroid(&image, 0.5), Some((4.0, 4.0)));
        assert_eq!(bright_centroid(&Array2::zeros((3, 3)), 0.5), None);
    }
}
