//! Iterative speckle nulling on DM1.
//!
//! Each iteration senses the brightest dark-zone speckle, probes the phase and
//! then the amplitude of a sine wave that cancels it, and adds the best sine to
//! the running DM1 command:
//!
//! ```text
//! apply command ─> tune exposure ─> image ─> sense speckle
//!       ▲                                          │
//!       │                                          ▼
//!  command += sine <─ fit amplitude <─ 7 amplitude probes <─ fit phase <─ 12 phase probes
//! ```
//!
//! Images are normalized by the peak of a direct image taken with the same
//! laser current at the start of the run, so the dark-zone values are contrast.

pub mod control;
pub mod sensing;

pub use control::{
    speckle_control_amplitude, speckle_control_phase, speckle_intensity, AMPLITUDE_COEFFICIENTS,
    PROBE_PHASES_DEG,
};
pub use sensing::{speckle_sensing, SpeckleEstimate};

use super::{with_suffix, Experiment, ExperimentContext};
use crate::error::{AppResult, DaqError};
use crate::hardware::dm::{flat_command, sin_command, DmCommand};
use crate::hardware::frame::Frame;
use crate::hardware::scoped;
use crate::imaging::{run_imaging, AutoExposure, DarkZone, ImagingRequest, ImagingResult};
use crate::testbed::Testbed;
use crate::types::{
    FpmPosition, ImageCentering, LyotStopPosition, Nanometers, SinSpecification,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Per-iteration log written next to the data.
pub const LOG_FILE: &str = "speckle_nulling_log.csv";

/// Dark zone exposure headroom: the brightest dark-zone pixel is kept this many
/// times below the auto exposure thresholds, leaving room for probes that
/// brighten the speckle.
const DARK_ZONE_HEADROOM: f64 = 2.0;

/// Parameters of [`SpeckleNulling`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeckleNullingParams {
    /// Correction iterations
    pub num_iterations: usize,
    /// Add the DM bias voltage to every command
    pub bias: bool,
    /// Add the DM1 flat map to every command
    pub flat_map: bool,
    /// Output directory; timestamped under the data root when unset
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Starting exposure time
    #[serde(with = "humantime_serde")]
    pub exposure_time: Duration,
    /// Exposures averaged per image
    pub num_exposures: usize,
    /// Initial DM1 command (nm); takes precedence over `initial_speckles`
    #[serde(default)]
    pub dm_command_path: Option<PathBuf>,
    /// Sine injected on DM1 before the first iteration
    #[serde(default)]
    pub initial_speckles: Option<SinSpecification>,
    /// Output directory suffix
    #[serde(default)]
    pub suffix: Option<String>,
    /// FPM position for the dark-zone images
    pub fpm_position: FpmPosition,
    /// Lyot stop position for the dark-zone images
    pub lyot_stop_position: LyotStopPosition,
    /// Image centering
    pub centering: ImageCentering,
    /// Raw frames skipped after each saved one
    #[serde(default)]
    pub raw_skip: usize,
}

impl Default for SpeckleNullingParams {
    fn default() -> Self {
        Self {
            num_iterations: 10,
            bias: false,
            flat_map: true,
            path: None,
            exposure_time: Duration::from_millis(100),
            num_exposures: 3,
            dm_command_path: None,
            initial_speckles: Some(SinSpecification::new(10.0, 12.0, Nanometers(25.0), 90.0)),
            suffix: None,
            fpm_position: FpmPosition::Coron,
            lyot_stop_position: LyotStopPosition::InBeam,
            centering: ImageCentering::Auto,
            raw_skip: 0,
        }
    }
}

/// Estimates and correction of one iteration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IterationRecord {
    /// Zero-based iteration
    pub iteration: usize,
    /// Exposure time used for the iteration
    pub exposure_ms: f64,
    /// Sensed speckle cycles across the DM
    pub ncycles: f64,
    /// Sensed speckle angle
    pub angle_deg: f64,
    /// Sensed speckle peak-to-valley
    pub peak_to_valley_nm: f64,
    /// Phase chosen from the phase probes
    pub phase_deg: f64,
    /// Amplitude coefficient chosen from the amplitude probes
    pub amplitude_coefficient: f64,
    /// Peak-to-valley of the sine added to the command
    pub amplitude_nm: f64,
    /// Mean dark-zone contrast before the correction
    pub mean_contrast: f64,
}

/// Outcome of a speckle nulling run.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeckleNullingReport {
    /// Direct PSF peak in counts per ms
    pub direct_peak: f64,
    /// One record per completed iteration
    pub iterations: Vec<IterationRecord>,
    /// Mean dark-zone contrast of the final image
    pub final_mean_contrast: f64,
}

impl SpeckleNullingReport {
    /// Mean dark-zone contrast before the first correction.
    pub fn initial_mean_contrast(&self) -> Option<f64> {
        self.iterations.first().map(|record| record.mean_contrast)
    }

    /// Write the iteration log as CSV; the last row holds the final contrast.
    pub fn write_csv(&self, path: &Path) -> AppResult<()> {
        let storage_err =
            |e: csv::Error| DaqError::Storage(format!("Failed to write '{}': {}", path.display(), e));
        let mut writer = csv::Writer::from_path(path).map_err(storage_err)?;
        for record in &self.iterations {
            writer
                .serialize(LogRow::from(record))
                .map_err(storage_err)?;
        }
        writer
            .serialize(LogRow::final_row(self.final_mean_contrast))
            .map_err(storage_err)?;
        writer.flush().map_err(|e| storage_err(e.into()))
    }
}

#[derive(Serialize)]
struct LogRow {
    iteration: String,
    exposure_ms: Option<f64>,
    ncycles: Option<f64>,
    angle_deg: Option<f64>,
    peak_to_valley_nm: Option<f64>,
    phase_deg: Option<f64>,
    amplitude_coefficient: Option<f64>,
    amplitude_nm: Option<f64>,
    mean_contrast: f64,
}

impl From<&IterationRecord> for LogRow {
    fn from(record: &IterationRecord) -> Self {
        Self {
            iteration: record.iteration.to_string(),
            exposure_ms: Some(record.exposure_ms),
            ncycles: Some(record.ncycles),
            angle_deg: Some(record.angle_deg),
            peak_to_valley_nm: Some(record.peak_to_valley_nm),
            phase_deg: Some(record.phase_deg),
            amplitude_coefficient: Some(record.amplitude_coefficient),
            amplitude_nm: Some(record.amplitude_nm),
            mean_contrast: record.mean_contrast,
        }
    }
}

impl LogRow {
    fn final_row(mean_contrast: f64) -> Self {
        Self {
            iteration: "final".to_string(),
            exposure_ms: None,
            ncycles: None,
            angle_deg: None,
            peak_to_valley_nm: None,
            phase_deg: None,
            amplitude_coefficient: None,
            amplitude_nm: None,
            mean_contrast,
        }
    }
}

/// Search for an exposure time that keeps the brightest dark-zone pixel
/// `headroom` times below the auto exposure thresholds.
///
/// Moves the FPM and Lyot stop, and opens the camera for the search. Returns
/// `exposure_time` unchanged when it already fits.
pub async fn test_dark_zone_intensity(
    testbed: &Testbed,
    exposure_time: Duration,
    headroom: f64,
    fpm_position: FpmPosition,
    lyot_stop_position: LyotStopPosition,
) -> Result<Duration> {
    testbed.move_fpm(fpm_position).await?;
    testbed.move_lyot_stop(lyot_stop_position).await?;

    let config = testbed.config();
    let settings = AutoExposure::from_config(&config.camera).with_headroom(headroom);
    let ppld = config.camera.pixels_per_lambda_over_d;
    let dark_zone = &config.dark_zone;
    let camera = testbed.camera();

    let tuned = scoped(camera, move || async move {
        settings
            .tune(camera, exposure_time, |frame: &Frame| {
                DarkZone::new(dark_zone, frame.shape(), ppld).max(&frame.data)
            })
            .await
    })
    .await
    .context("Dark zone exposure search failed")?;

    if tuned != exposure_time {
        info!(from = ?exposure_time, to = ?tuned, "Updated dark zone exposure time");
    }
    Ok(tuned)
}

/// Iterative speckle nulling on DM1.
pub struct SpeckleNulling {
    params: SpeckleNullingParams,
    report: Option<SpeckleNullingReport>,
}

impl SpeckleNulling {
    /// Experiment with the given parameters.
    pub fn new(params: SpeckleNullingParams) -> Self {
        Self {
            params,
            report: None,
        }
    }

    /// Parameters of this experiment.
    pub fn params(&self) -> &SpeckleNullingParams {
        &self.params
    }

    /// Report of the last completed run.
    pub fn report(&self) -> Option<&SpeckleNullingReport> {
        self.report.as_ref()
    }

    /// Starting DM1 command and its short name: the command file, else the
    /// initial speckles, else a flat command.
    pub fn initial_command(&self, actuators_across: usize) -> Result<(DmCommand, String)> {
        let p = &self.params;
        if let Some(path) = &p.dm_command_path {
            if p.initial_speckles.is_some() {
                warn!("Ignoring initial speckles and loading DM command from disk");
            }
            let command = DmCommand::load(path, 1, p.bias, p.flat_map, false)
                .with_context(|| format!("Failed to load DM command '{}'", path.display()))?;
            if command.data.nrows() != actuators_across {
                return Err(DaqError::Configuration(format!(
                    "DM command '{}' has {} actuators across, expected {}",
                    path.display(),
                    command.data.nrows(),
                    actuators_across
                ))
                .into());
            }
            let name = if p.flat_map { "flat_map" } else { "bias" };
            return Ok((command, name.to_string()));
        }
        Ok(match &p.initial_speckles {
            Some(spec) => sin_command(spec, actuators_across, 1, p.bias, p.flat_map, None),
            None => flat_command(actuators_across, 1, p.bias, p.flat_map),
        })
    }

    fn request(&self, exposure_time: Duration, path: PathBuf, filename: String) -> ImagingRequest {
        let p = &self.params;
        ImagingRequest::new(exposure_time, p.num_exposures, p.fpm_position, path)
            .lyot_stop(p.lyot_stop_position)
            .exposure_set(p.fpm_position.exposure_set_name())
            .filename(filename)
            .centering(p.centering)
            .auto_expose(false)
            .raw_skip(p.raw_skip)
    }

    /// Apply `command` to DM1 and take one image at `exposure_time`.
    async fn probe(
        &self,
        testbed: &Testbed,
        command: &DmCommand,
        exposure_time: Duration,
        path: PathBuf,
        filename: String,
    ) -> Result<ImagingResult> {
        testbed.dm().apply_shape(command).await?;
        run_imaging(testbed, &self.request(exposure_time, path, filename)).await
    }

    /// Direct PSF peak in counts per ms with `command` applied.
    async fn direct_reference(
        &self,
        testbed: &Testbed,
        command: &DmCommand,
        path: &Path,
    ) -> Result<f64> {
        testbed.dm().apply_shape(command).await?;
        let request = ImagingRequest::new(
            self.params.exposure_time,
            self.params.num_exposures,
            FpmPosition::Direct,
            path.join("direct_reference"),
        )
        .lyot_stop(self.params.lyot_stop_position)
        .filename("direct_reference")
        .raw_skip(self.params.raw_skip);
        let reference = run_imaging(testbed, &request).await?;
        let peak = reference.image.max() / exposure_ms(reference.exposure_time);
        if peak.is_nan() || peak <= 0.0 {
            return Err(DaqError::Processing("Direct reference image is dark".to_string()).into());
        }
        info!(direct_peak = peak, "Direct reference");
        Ok(peak)
    }

    /// The nulling loop. The laser and DM are open.
    async fn null_speckles(
        &self,
        testbed: &Testbed,
        path: &Path,
        initial: DmCommand,
        file_name: &str,
    ) -> Result<SpeckleNullingReport> {
        let config = testbed.config();
        let n = config.dm.actuators_across;
        let ppld = config.camera.pixels_per_lambda_over_d;
        let wavelength_nm = config.camera.wavelength_nm;
        let p = &self.params;

        let mut current = initial;
        let direct_peak = self.direct_reference(testbed, &current, path).await?;
        let mut exposure_time = p.exposure_time;
        let mut iterations = Vec::with_capacity(p.num_iterations);

        for i in 0..p.num_iterations {
            testbed.dm().apply_shape(&current).await?;
            exposure_time = test_dark_zone_intensity(
                testbed,
                exposure_time,
                DARK_ZONE_HEADROOM,
                p.fpm_position,
                p.lyot_stop_position,
            )
            .await?;

            let iteration_path = path.join(format!("iteration{i}"));
            let image = run_imaging(
                testbed,
                &self.request(
                    exposure_time,
                    iteration_path.clone(),
                    format!("itr{i}_{file_name}"),
                ),
            )
            .await?;

            let contrast = normalized(&image.image, direct_peak);
            let zone = DarkZone::new(&config.dark_zone, contrast.dim(), ppld);
            let mean_contrast = zone.mean(&contrast);
            if zone.max(&contrast) <= 0.0 {
                info!(iteration = i, "No light left in the dark zone; stopping");
                break;
            }
            let estimate = speckle_sensing(&contrast, &zone, wavelength_nm)?;
            info!(
                iteration = i,
                mean_contrast,
                ncycles = estimate.ncycles,
                angle = estimate.angle_deg,
                ptv_nm = estimate.peak_to_valley.value(),
                "Sensed speckle"
            );

            let mut phase_intensities = Vec::with_capacity(PROBE_PHASES_DEG.len());
            for phase in PROBE_PHASES_DEG {
                let spec = SinSpecification::new(
                    estimate.angle_deg,
                    estimate.ncycles,
                    estimate.peak_to_valley,
                    phase,
                );
                let (command, name) = sin_command(&spec, n, 1, p.bias, p.flat_map, Some(&current.data));
                let result = self
                    .probe(
                        testbed,
                        &command,
                        exposure_time,
                        iteration_path.join(format!("phase{phase}")),
                        format!("itr{i}_{name}"),
                    )
                    .await?;
                phase_intensities.push(speckle_intensity(&result.image, estimate.location));
            }
            let phase = speckle_control_phase(&PROBE_PHASES_DEG, &phase_intensities)?;

            let mut amplitude_intensities = Vec::with_capacity(AMPLITUDE_COEFFICIENTS.len());
            for coefficient in AMPLITUDE_COEFFICIENTS {
                let spec = SinSpecification::new(
                    estimate.angle_deg,
                    estimate.ncycles,
                    Nanometers(estimate.peak_to_valley.value() * coefficient),
                    phase,
                );
                let (command, name) = sin_command(&spec, n, 1, p.bias, p.flat_map, Some(&current.data));
                let result = self
                    .probe(
                        testbed,
                        &command,
                        exposure_time,
                        iteration_path.join(format!("amplitude{coefficient:.1}")),
                        format!("itr{i}_{name}"),
                    )
                    .await?;
                amplitude_intensities.push(speckle_intensity(&result.image, estimate.location));
            }
            let coefficient =
                speckle_control_amplitude(&AMPLITUDE_COEFFICIENTS, &amplitude_intensities)?;
            let amplitude = Nanometers(estimate.peak_to_valley.value() * coefficient);

            let correction =
                SinSpecification::new(estimate.angle_deg, estimate.ncycles, amplitude, phase);
            current = sin_command(&correction, n, 1, p.bias, p.flat_map, Some(&current.data)).0;

            info!(
                iteration = i,
                phase,
                amplitude_nm = amplitude.value(),
                "Applied correction"
            );
            iterations.push(IterationRecord {
                iteration: i,
                exposure_ms: exposure_ms(exposure_time),
                ncycles: estimate.ncycles,
                angle_deg: estimate.angle_deg,
                peak_to_valley_nm: estimate.peak_to_valley.value(),
                phase_deg: phase,
                amplitude_coefficient: coefficient,
                amplitude_nm: amplitude.value(),
                mean_contrast,
            });
        }

        // Final image with auto exposure over the whole frame.
        testbed.dm().apply_shape(&current).await?;
        let request = ImagingRequest::new(p.exposure_time, p.num_exposures, p.fpm_position, path)
            .lyot_stop(p.lyot_stop_position)
            .exposure_set("final")
            .filename("final_dark_zone")
            .centering(p.centering)
            .raw_skip(p.raw_skip);
        let final_image = run_imaging(testbed, &request).await?;
        let contrast = normalized(&final_image.image, direct_peak);
        let final_mean_contrast =
            DarkZone::new(&config.dark_zone, contrast.dim(), ppld).mean(&contrast);
        info!(final_mean_contrast, "Final dark zone");

        Ok(SpeckleNullingReport {
            direct_peak,
            iterations,
            final_mean_contrast,
        })
    }
}

fn exposure_ms(exposure: Duration) -> f64 {
    exposure.as_secs_f64() * 1e3
}

/// Image as contrast: counts per ms over the direct peak per ms.
fn normalized(image: &Frame, direct_peak: f64) -> Array2<f64> {
    image.rate_per_ms() / direct_peak
}

#[async_trait]
impl Experiment for SpeckleNulling {
    fn name(&self) -> &str {
        "Speckle Nulling"
    }

    fn suffix(&self) -> String {
        with_suffix("speckle_nulling", self.params.suffix.as_deref())
    }

    fn output_path(&self) -> Option<PathBuf> {
        self.params.path.clone()
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::to_value(&self.params).unwrap_or_default()
    }

    async fn experiment(&mut self, ctx: &ExperimentContext<'_>) -> Result<()> {
        let testbed = ctx.testbed;
        let path = ctx.output_path();
        if self.params.num_exposures == 0 {
            return Err(DaqError::Configuration("num_exposures must be at least 1".to_string()).into());
        }
        let (initial, file_name) = self.initial_command(testbed.config().dm.actuators_across)?;

        let laser = testbed.laser();
        let dm = testbed.dm();
        let channel = testbed.laser_channel();
        let current = testbed.laser_current_for(self.params.fpm_position);
        let this = &*self;
        let file_name = file_name.as_str();

        let report = scoped(laser, move || async move {
            laser.set_current(channel, current).await?;
            scoped(dm, move || async move {
                this.null_speckles(testbed, path, initial, file_name).await
            })
            .await
        })
        .await?;

        report.write_csv(&path.join(LOG_FILE))?;
        info!(
            iterations = report.iterations.len(),
            final_mean_contrast = report.final_mean_contrast,
            "Speckle nulling complete"
        );
        self.report = Some(report);
        Ok(())
    }
}
