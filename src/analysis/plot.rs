//! SVG line plots of experiment results.
//!
//! Plots are drawn without text: the plotting stack is built without font
//! support, so axes are plain lines and the data range is recorded next to the
//! plot by the caller.

use crate::error::{AppResult, DaqError};
use plotters::prelude::*;
use std::path::Path;

/// Draw `(x, y)` as a line with axes to `path` (SVG).
pub fn line_plot_svg(path: &Path, points: &[(f64, f64)]) -> AppResult<()> {
    if points.is_empty() {
        return Err(DaqError::Processing("Nothing to plot".to_string()));
    }
    let (x_range, y_range) = padded_ranges(points);

    let root = SVGBackend::new(path, (1100, 800)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_error)?;

    let mut chart = ChartBuilder::on(&root)
        .margin(40)
        .build_cartesian_2d(x_range.clone(), y_range.clone())
        .map_err(plot_error)?;

    // Axes along the lower and left edges of the data range.
    chart
        .draw_series(std::iter::once(PathElement::new(
            vec![(x_range.start, y_range.start), (x_range.end, y_range.start)],
            BLACK.stroke_width(2),
        )))
        .map_err(plot_error)?;
    chart
        .draw_series(std::iter::once(PathElement::new(
            vec![(x_range.start, y_range.start), (x_range.start, y_range.end)],
            BLACK.stroke_width(2),
        )))
        .map_err(plot_error)?;

    chart
        .draw_series(LineSeries::new(points.iter().copied(), BLUE.stroke_width(3)))
        .map_err(plot_error)?;
    chart
        .draw_series(
            points
                .iter()
                .map(|&point| Circle::new(point, 5, BLUE.filled())),
        )
        .map_err(plot_error)?;

    root.present().map_err(plot_error)?;
    Ok(())
}

fn padded_ranges(points: &[(f64, f64)]) -> (std::ops::Range<f64>, std::ops::Range<f64>) {
    let pad = |min: f64, max: f64| {
        let span = if max > min { max - min } else { min.abs().max(1.0) };
        (min - 0.05 * span)..(max + 0.05 * span)
    };
    let (mut x_min, mut x_max, mut y_min, mut y_max) =
        (f64::INFINITY, f64::NEG_INFINITY, f64::INFINITY, f64::NEG_INFINITY);
    for &(x, y) in points {
        x_min = x_min.min(x);
        x_max = x_max.max(x);
        y_min = y_min.min(y);
        y_max = y_max.max(y);
    }
    (pad(x_min, x_max), pad(y_min, y_max))
}

fn plot_error<E: std::fmt::Display>(err: E) -> DaqError {
    DaqError::Storage(format!("Plot failed: {err}"))
}
