//! Post-processing of acquired images: fits, photometry and plots.

pub mod fit;
pub mod photometry;
pub mod plot;

pub use fit::{fit_parabola, fit_sinusoid, ParabolaFit, SinusoidFit};
pub use photometry::{box_sum, bright_centroid, peak_centroid};
pub use plot::line_plot_svg;
