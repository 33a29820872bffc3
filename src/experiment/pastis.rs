//! PASTIS mode amplitude scan on the segmented DM.
//!
//! One PASTIS mode, weighted by its requirement for the target contrast, is
//! scaled by a list of WFE amplitudes and applied to the segmented DM as
//! segment pistons. The mean normalized dark-zone contrast is measured for
//! each amplitude.

use super::{with_suffix, Experiment, ExperimentContext};
use crate::analysis::line_plot_svg;
use crate::error::{AppResult, DaqError};
use crate::hardware::dm::flat_command;
use crate::hardware::frame::Frame;
use crate::hardware::scoped;
use crate::hardware::segmented::{segment_count, SegmentedDmCommand};
use crate::imaging::{run_imaging, DarkZone, ImagingRequest};
use crate::storage::readme::write_readme;
use crate::storage::txt::{load_matrix, load_vector, save_vector, short_float};
use crate::testbed::Testbed;
use crate::types::{FpmPosition, LyotStopPosition};
use anyhow::Result;
use async_trait::async_trait;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Parameters of [`PastisModeAmplitudes`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PastisModeAmplitudesParams {
    /// Directory with `eigenvalues.txt`, `pastis_modes.txt` and the mode requirements
    pub pastis_results_path: PathBuf,
    /// Index into the columns of `pastis_modes.txt`
    pub mode_number: usize,
    /// Target contrast the mode weights were computed for
    pub c_target: f64,
    /// WFE rms amplitudes in nm
    pub wfe_amplitudes: Vec<f64>,
    /// Exposures averaged per image
    pub num_exposures: usize,
    /// Starting coronagraphic exposure time
    #[serde(with = "humantime_serde")]
    pub exposure_time_coron: Duration,
    /// Direct exposure time
    #[serde(with = "humantime_serde")]
    pub exposure_time_direct: Duration,
    /// Run the exposure search before imaging
    pub auto_expose: bool,
    /// Save images
    pub file_mode: bool,
    /// Raw frames skipped after each one saved
    pub raw_skip: usize,
    /// Output directory; timestamped under the data root when unset
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Output directory suffix
    #[serde(default)]
    pub suffix: Option<String>,
}

/// PASTIS results read when the experiment is built.
#[derive(Debug, Clone)]
struct PastisResults {
    eigenvalues: Vec<f64>,
    /// `(segments, modes)`, one mode per column, nm
    modes: Array2<f64>,
    /// Per-mode weight for the target contrast
    mode_weights: Vec<f64>,
}

/// Dark-zone contrast of one PASTIS mode scaled to a range of WFE amplitudes.
pub struct PastisModeAmplitudes {
    params: PastisModeAmplitudesParams,
    results: PastisResults,
    /// Direct PSF peak in counts per ms
    direct_max: Option<f64>,
    coronagraph_floor: Option<f64>,
    measured_contrast: Vec<f64>,
}

/// `mode_requirements_<c>_uniform.txt`
pub fn mode_requirements_file(c_target: f64) -> String {
    format!("mode_requirements_{}_uniform.txt", short_float(c_target))
}

impl PastisModeAmplitudes {
    /// Read the PASTIS modes and mode weights from `params.pastis_results_path`.
    pub fn new(params: PastisModeAmplitudesParams) -> AppResult<Self> {
        let dir = &params.pastis_results_path;
        let results = PastisResults {
            eigenvalues: load_vector(&dir.join("eigenvalues.txt"))?,
            modes: load_matrix(&dir.join("pastis_modes.txt"))?,
            mode_weights: load_vector(&dir.join(mode_requirements_file(params.c_target)))?,
        };

        let num_modes = results.modes.ncols();
        if params.mode_number >= num_modes || params.mode_number >= results.mode_weights.len() {
            return Err(DaqError::Configuration(format!(
                "Mode number {} out of range: {} modes, {} mode weights",
                params.mode_number,
                num_modes,
                results.mode_weights.len()
            )));
        }
        if params.num_exposures == 0 {
            return Err(DaqError::Configuration(
                "num_exposures must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            params,
            results,
            direct_max: None,
            coronagraph_floor: None,
            measured_contrast: Vec::new(),
        })
    }

    /// Mean normalized contrast per WFE amplitude, after a run.
    pub fn measured_contrast(&self) -> &[f64] {
        &self.measured_contrast
    }

    /// Contrast with a flat segmented DM, after a run.
    pub fn coronagraph_floor(&self) -> Option<f64> {
        self.coronagraph_floor
    }

    /// Segment pistons (µm) of the scaled mode for `wfe_nm`.
    pub fn scaled_mode_pistons_um(&self, wfe_nm: f64) -> Vec<f64> {
        let mode = self.params.mode_number;
        let weight = self.results.mode_weights[mode];
        self.results
            .modes
            .column(mode)
            .iter()
            .map(|opd_nm| opd_nm * weight * wfe_nm * 1e-3)
            .collect()
    }

    fn request(&self, fpm: FpmPosition, path: PathBuf, filename: &str) -> ImagingRequest {
        let p = &self.params;
        let exposure_time = match fpm {
            FpmPosition::Coron => p.exposure_time_coron,
            FpmPosition::Direct => p.exposure_time_direct,
        };
        ImagingRequest::new(exposure_time, p.num_exposures, fpm, path)
            .lyot_stop(LyotStopPosition::InBeam)
            .filename(filename)
            .auto_expose(p.auto_expose)
            .file_mode(p.file_mode)
            .raw_skip(p.raw_skip)
    }

    fn readme_rows(&self) -> Vec<(&'static str, String)> {
        let amplitudes: Vec<String> = self
            .params
            .wfe_amplitudes
            .iter()
            .map(|a| short_float(*a))
            .collect();
        vec![
            (
                "pastis_results_path",
                self.params.pastis_results_path.display().to_string(),
            ),
            ("MODE_NUMBER", self.params.mode_number.to_string()),
            ("target_contrast", short_float(self.params.c_target)),
            ("wfe_amplitudes", format!("[{}]", amplitudes.join(", "))),
        ]
    }

    /// Direct PSF peak rate, with the laser at the coronagraphic current so
    /// coronagraphic images normalize without a current correction.
    async fn run_flux_normalization(&mut self, testbed: &Testbed, output: &Path) -> Result<f64> {
        let request = self.request(FpmPosition::Direct, output.join("reference"), "direct");
        let direct = run_imaging(testbed, &request).await?;
        let peak = peak_rate(&direct.image);
        if peak.is_nan() || peak <= 0.0 {
            return Err(DaqError::Processing("Direct reference image is dark".to_string()).into());
        }
        info!(direct_max = peak, "Flux normalization");
        self.direct_max = Some(peak);
        Ok(peak)
    }

    /// Mean normalized dark-zone contrast with an unaberrated segmented DM.
    async fn measure_coronagraph_floor(
        &mut self,
        testbed: &Testbed,
        output: &Path,
        direct_max: f64,
    ) -> Result<f64> {
        let request = self.request(FpmPosition::Coron, output.join("reference"), "coron");
        let coron = run_imaging(testbed, &request).await?;
        let floor = mean_contrast(testbed, &coron.image, direct_max);
        info!(coronagraph_floor = floor, "Coronagraph floor");
        self.coronagraph_floor = Some(floor);
        Ok(floor)
    }

    async fn scan(&mut self, testbed: &Testbed, output: &Path) -> Result<()> {
        let iris = testbed.segmented_dm();
        let num_segments = segment_count(testbed.config().segmented_dm.rings);
        if self.results.modes.nrows() != num_segments {
            return Err(DaqError::Configuration(format!(
                "PASTIS modes have {} segments, the segmented DM has {}",
                self.results.modes.nrows(),
                num_segments
            ))
            .into());
        }

        iris.apply_shape(&SegmentedDmCommand::flat(num_segments))
            .await?;
        let direct_max = self.run_flux_normalization(testbed, output).await?;
        let floor = self
            .measure_coronagraph_floor(testbed, output, direct_max)
            .await?;
        if self.params.c_target <= floor {
            return Err(DaqError::Processing(format!(
                "Coronagraph floor ({}) cannot be above target contrast ({})",
                floor, self.params.c_target
            ))
            .into());
        }

        for wfe in self.params.wfe_amplitudes.clone() {
            info!(wfe_nm = wfe, "Applying scaled mode");
            let command = SegmentedDmCommand::from_pistons_um(&self.scaled_mode_pistons_um(wfe));
            iris.apply_shape(&command).await?;

            let path = output.join(format!("wfe_{}nm", short_float(wfe)));
            let request = self.request(FpmPosition::Coron, path, "coron");
            let coron = run_imaging(testbed, &request).await?;
            self.measured_contrast
                .push(mean_contrast(testbed, &coron.image, direct_max));
        }
        Ok(())
    }
}

fn peak_rate(image: &Frame) -> f64 {
    image.max() / (image.exposure.as_secs_f64() * 1e3)
}

fn mean_contrast(testbed: &Testbed, image: &Frame, direct_max: f64) -> f64 {
    let zone = DarkZone::new(
        &testbed.config().dark_zone,
        image.shape(),
        testbed.config().camera.pixels_per_lambda_over_d,
    );
    zone.mean(&(image.rate_per_ms() / direct_max))
}

#[async_trait]
impl Experiment for PastisModeAmplitudes {
    fn name(&self) -> &str {
        "PASTIS Mode Amplitudes"
    }

    fn suffix(&self) -> String {
        with_suffix("pastis_mode_amplitudes", self.params.suffix.as_deref())
    }

    fn output_path(&self) -> Option<PathBuf> {
        self.params.path.clone()
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::to_value(&self.params).unwrap_or_default()
    }

    async fn experiment(&mut self, ctx: &ExperimentContext<'_>) -> Result<()> {
        let testbed = ctx.testbed;
        let output = ctx.output_path();
        write_readme(&output.join("_README.txt"), &self.readme_rows())?;

        info!(mode = self.params.mode_number, "Will be scaling mode");
        info!(c_target = self.params.c_target, "Target contrast");
        info!(
            amplitudes = ?self.params.wfe_amplitudes,
            eigenvalues = self.results.eigenvalues.len(),
            "WFE amplitudes used for scaling (nm)"
        );
        self.measured_contrast.clear();

        let n = testbed.config().dm.actuators_across;
        let laser = testbed.laser();
        let dm = testbed.dm();
        let iris = testbed.segmented_dm();
        let channel = testbed.laser_channel();
        let current = testbed.laser_current_for(FpmPosition::Coron);
        let this = &mut *self;

        scoped(laser, move || async move {
            laser.set_current(channel, current).await?;
            scoped(dm, move || async move {
                let (flat1, _) = flat_command(n, 1, false, true);
                let (flat2, _) = flat_command(n, 2, false, true);
                dm.apply_shape_to_both(&flat1, &flat2).await?;
                scoped(iris, move || async move { this.scan(testbed, output).await }).await
            })
            .await
        })
        .await?;

        let c = short_float(self.params.c_target);
        save_vector(
            &output.join(format!("scaled_mode_contrasts_{c}.txt")),
            &self.measured_contrast,
        )?;
        save_vector(
            &output.join(format!("wfe_amplitudes_{c}.txt")),
            &self.params.wfe_amplitudes,
        )?;
        Ok(())
    }

    async fn post_experiment(&mut self, ctx: &ExperimentContext<'_>) -> Result<()> {
        let floor = self.coronagraph_floor.unwrap_or(0.0);
        let points: Vec<(f64, f64)> = self
            .params
            .wfe_amplitudes
            .iter()
            .zip(&self.measured_contrast)
            .map(|(&wfe, &contrast)| (wfe, contrast - floor))
            .collect();
        let c = short_float(self.params.c_target);
        line_plot_svg(
            &ctx.output_path().join(format!("scaled_mode_{c}.svg")),
            &points,
        )?;
        Ok(())
    }
}
