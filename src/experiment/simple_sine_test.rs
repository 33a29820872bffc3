//! DM alignment check with the same sine wave on both DMs.
//!
//! Each combination of cycles, orientation and phase shift puts a 50 nm sine on
//! DM1 (phase 90°) and DM2 (phase 90° + shift). A DM2 misalignment changes how
//! the two satellite speckles interfere, which shows in the coronagraphic
//! images. Output is grouped under `x=<µm>_y=<µm>` after the configured DM2
//! translation.

use super::{Experiment, ExperimentContext};
use crate::hardware::dm::{flat_command, sin_command};
use crate::hardware::scoped;
use crate::hardware::segmented::{segment_count, SegmentedDmCommand};
use crate::imaging::{run_imaging, ImagingRequest};
use crate::storage::calibration::record_calibration_measurement;
use crate::storage::create_data_path;
use crate::testbed::Testbed;
use crate::types::{FpmPosition, ImageCentering, LyotStopPosition, Nanometers, SinSpecification};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Sine amplitude on both DMs.
const SINE_PEAK_TO_VALLEY: Nanometers = Nanometers(50.0);
/// DM1 sine phase; DM2 is offset from it by the phase shift.
const DM1_PHASE_DEG: f64 = 90.0;
/// Auto exposure mask radius in lambda/D.
const AUTO_EXPOSURE_MASK_SIZE: f64 = 5.5;
/// First exposure time tried when no exposure time is given.
const AUTO_EXPOSURE_START: Duration = Duration::from_millis(1);

/// Parameters of [`SimpleSineTest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimpleSineTestParams {
    /// Cycles per aperture
    pub cycles: Vec<f64>,
    /// Sine orientations in degrees
    pub orientation_angles: Vec<f64>,
    /// DM2 phase relative to DM1 in degrees
    pub phase_shifts: Vec<f64>,
    /// `None` searches for an exposure time for every image
    #[serde(default, with = "humantime_serde")]
    pub exposure_time: Option<Duration>,
    /// Exposures averaged per image
    pub num_exposures: usize,
    /// Output directory; timestamped under the data root when unset
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Default for SimpleSineTestParams {
    fn default() -> Self {
        Self {
            cycles: vec![10.0],
            orientation_angles: vec![0.0],
            phase_shifts: vec![0.0],
            exposure_time: None,
            num_exposures: 20,
            path: None,
        }
    }
}

/// DM1/DM2 alignment check with matching sine waves on both DMs.
pub struct SimpleSineTest {
    params: SimpleSineTestParams,
}

impl SimpleSineTest {
    /// Experiment with the given parameters.
    pub fn new(params: SimpleSineTestParams) -> Self {
        Self { params }
    }

    /// `x=<µm>_y=<µm>` from the DM2 translation, truncated to whole microns.
    pub fn translation_subdirectory(testbed: &Testbed) -> String {
        let dm = &testbed.config().dm;
        let x = (1e6 * dm.dm2_translation_x) as i64;
        let y = (1e6 * dm.dm2_translation_y) as i64;
        format!("x={x}_y={y}")
    }

    /// `(ncycles, angle, phase shift)` in nesting order.
    fn combinations(&self) -> Vec<(f64, f64, f64)> {
        let p = &self.params;
        p.cycles
            .iter()
            .flat_map(|&ncyc| {
                p.orientation_angles.iter().flat_map(move |&angle| {
                    p.phase_shifts.iter().map(move |&shift| (ncyc, angle, shift))
                })
            })
            .collect()
    }

    fn request(&self, path: PathBuf, filename: &str) -> ImagingRequest {
        let p = &self.params;
        ImagingRequest::new(
            p.exposure_time.unwrap_or(AUTO_EXPOSURE_START),
            p.num_exposures,
            FpmPosition::Coron,
            path,
        )
        .lyot_stop(LyotStopPosition::InBeam)
        .exposure_set("coron")
        .filename(filename)
        .raw_skip(p.num_exposures + 1)
        .auto_expose(p.exposure_time.is_none())
        .auto_exposure_mask_size(AUTO_EXPOSURE_MASK_SIZE)
        .centering(ImageCentering::CustomApodizerSpots)
    }

    async fn run_sequence(&self, testbed: &Testbed, base: &Path) -> Result<()> {
        let n = testbed.config().dm.actuators_across;
        let dm = testbed.dm();
        let iris = testbed.segmented_dm();

        // Baseline with both DMs flat, for background subtraction of the PSF.
        let (flat1, _) = flat_command(n, 1, false, true);
        let (flat2, _) = flat_command(n, 2, false, true);
        dm.apply_shape_to_both(&flat1, &flat2).await?;
        iris.apply_shape(&SegmentedDmCommand::flat(segment_count(
            testbed.config().segmented_dm.rings,
        )))
        .await?;
        let saveto = create_data_path(base, "both_dms_flat")?;
        run_imaging(testbed, &self.request(saveto, "dms_flat")).await?;

        for (ncyc, angle, phase_shift) in self.combinations() {
            let phase2 = DM1_PHASE_DEG + phase_shift;
            let first = SinSpecification::new(angle, ncyc, SINE_PEAK_TO_VALLEY, DM1_PHASE_DEG);
            let second = SinSpecification::new(angle, ncyc, SINE_PEAK_TO_VALLEY, phase2);

            let suffix = format!(
                "ripple_test_cycl_{ncyc}_ang_{angle}_phase1_{DM1_PHASE_DEG}_phase2_{phase2}"
            );
            let saveto = create_data_path(base, &suffix)?;

            let (dm1_command, dm1_name) = sin_command(&first, n, 1, false, true, None);
            let (dm2_command, _) = sin_command(&second, n, 2, false, true, None);
            dm.apply_shape(&dm1_command).await?;
            dm.apply_shape(&dm2_command).await?;

            info!(ncycles = ncyc, angle, phase_shift, "Imaging sine pair");
            run_imaging(testbed, &self.request(saveto, &dm1_name)).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Experiment for SimpleSineTest {
    fn name(&self) -> &str {
        "Sine wave DM alignment tests"
    }

    fn suffix(&self) -> String {
        "simple_sine_test".to_string()
    }

    fn output_path(&self) -> Option<PathBuf> {
        self.params.path.clone()
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::to_value(&self.params).unwrap_or_default()
    }

    async fn experiment(&mut self, ctx: &ExperimentContext<'_>) -> Result<()> {
        let testbed = ctx.testbed;
        let base = ctx
            .output_path()
            .join(Self::translation_subdirectory(testbed));
        let base = base.as_path();
        let this = &*self;

        let laser = testbed.laser();
        let dm = testbed.dm();
        let iris = testbed.segmented_dm();
        let channel = testbed.laser_channel();
        let current = testbed.laser_current_for(FpmPosition::Coron);

        scoped(laser, move || async move {
            laser.set_current(channel, current).await?;
            scoped(dm, move || async move {
                scoped(iris, move || async move { this.run_sequence(testbed, base).await }).await
            })
            .await
        })
        .await?;

        record_calibration_measurement(
            testbed.data_root(),
            "Sine wave DM alignment data",
            -1.0,
            "TBD",
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combinations_follow_parameter_order() {
        let test = SimpleSineTest::new(SimpleSineTestParams {
            cycles: vec![10.0, 12.0],
            orientation_angles: vec![0.0, 45.0],
            phase_shifts: vec![0.0],
            ..Default::default()
        });
        assert_eq!(
            test.combinations(),
            vec![
                (10.0, 0.0, 0.0),
                (10.0, 45.0, 0.0),
                (12.0, 0.0, 0.0),
                (12.0, 45.0, 0.0)
            ]
        );
    }

    #[test]
    fn exposure_time_none_enables_auto_exposure() {
        let test = SimpleSineTest::new(SimpleSineTestParams::default());
        let request = test.request(PathBuf::from("/tmp/x"), "dms_flat");
        assert!(request.auto_expose);
        assert_eq!(request.raw_skip, 21);
        assert_eq!(request.centering, ImageCentering::CustomApodizerSpots);
    }
}
