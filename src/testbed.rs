//! The testbed: every instrument the experiments drive, built from configuration.
//!
//! Instruments are stored as capability trait objects so experiments run the same
//! code against the simulated bench and real hardware. Nothing is opened here;
//! callers wrap each use in [`scoped`].

use crate::config::{Backend, TestbedConfig, BEAM_DUMP_STAGE, FPM_STAGE, LYOT_STOP_STAGE};
use crate::error::{AppResult, DaqError};
use crate::hardware::capabilities::{
    Camera, DeformableMirror, LaserSource, MotionStage, SegmentedMirror,
};
use crate::hardware::scoped;
use crate::hardware::sim::{SimulatedCamera, SimulatedDm, SimulatedLaser, SimulatedSegmentedDm};
use crate::hardware::standa::{SimulatedXimc, StandaStage};
use crate::storage::{frame_writer, FrameWriter};
use crate::types::{FpmPosition, LyotStopPosition};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Concrete handles of the simulated bench, for inspection in tests.
#[derive(Clone)]
pub struct SimulatedBench {
    /// Laser source
    pub laser: Arc<SimulatedLaser>,
    /// DM1 and DM2
    pub dm: Arc<SimulatedDm>,
    /// Segmented DM
    pub segmented_dm: Arc<SimulatedSegmentedDm>,
    /// Science camera
    pub camera: Arc<SimulatedCamera>,
    /// Controller behind all stages
    pub ximc: Arc<SimulatedXimc>,
}

/// Instruments and configuration of one bench.
pub struct Testbed {
    config: TestbedConfig,
    laser: Arc<dyn LaserSource>,
    dm: Arc<dyn DeformableMirror>,
    segmented_dm: Arc<dyn SegmentedMirror>,
    camera: Arc<dyn Camera>,
    stages: HashMap<String, Arc<dyn MotionStage>>,
    frame_writer: Arc<dyn FrameWriter>,
    simulation: Option<SimulatedBench>,
}

impl Testbed {
    /// Build the backend selected by `application.backend`.
    pub fn from_config(config: TestbedConfig) -> Result<Self> {
        match config.application.backend {
            Backend::Simulated => Self::simulated(config),
            Backend::Hardware => Self::hardware(config),
        }
    }

    /// Simulated bench: one XIMC controller with an axis per configured stage,
    /// and a camera rendering the state of the laser, DMs and stages.
    pub fn simulated(config: TestbedConfig) -> Result<Self> {
        let ximc = Arc::new(SimulatedXimc::new(
            config.stages.iter().map(|s| s.device_name.clone()),
            config.simulator.move_polls,
        ));
        let laser = Arc::new(SimulatedLaser::new(config.laser.clone()));
        let dm = Arc::new(SimulatedDm::new(config.dm.clone())?);
        let segmented_dm = Arc::new(SimulatedSegmentedDm::new(config.segmented_dm.clone()));
        let camera = Arc::new(SimulatedCamera::new(
            &config,
            laser.clone(),
            dm.clone(),
            segmented_dm.clone(),
            ximc.clone(),
        )?);

        let stages = config
            .stages
            .iter()
            .map(|definition| {
                let stage: Arc<dyn MotionStage> =
                    Arc::new(StandaStage::new(ximc.clone(), definition.clone()));
                (definition.id.clone(), stage)
            })
            .collect();

        info!(testbed = %config.application.name, "Built simulated testbed");
        Ok(Self {
            frame_writer: frame_writer(config.application.frame_format)?,
            laser: laser.clone(),
            dm: dm.clone(),
            segmented_dm: segmented_dm.clone(),
            camera: camera.clone(),
            stages,
            simulation: Some(SimulatedBench {
                laser,
                dm,
                segmented_dm,
                camera,
                ximc,
            }),
            config,
        })
    }

    /// Hardware bench. Stages and the laser source have drivers (see
    /// [`stage_from_config`] and [`laser_from_config`]); the DM controllers and
    /// the science camera have no vendor binding yet.
    pub fn hardware(_config: TestbedConfig) -> Result<Self> {
        Err(DaqError::FeatureIncomplete(
            "hardware".to_string(),
            "Boston DM and science camera drivers are not available; use backend = \"simulated\""
                .to_string(),
        )
        .into())
    }

    /// Configuration the bench was built from.
    pub fn config(&self) -> &TestbedConfig {
        &self.config
    }

    /// Directory new runs are created under.
    pub fn data_root(&self) -> &Path {
        &self.config.application.data_root
    }

    /// Laser source.
    pub fn laser(&self) -> &dyn LaserSource {
        self.laser.as_ref()
    }

    /// DM1 and DM2.
    pub fn dm(&self) -> &dyn DeformableMirror {
        self.dm.as_ref()
    }

    /// Segmented DM.
    pub fn segmented_dm(&self) -> &dyn SegmentedMirror {
        self.segmented_dm.as_ref()
    }

    /// Science camera.
    pub fn camera(&self) -> &dyn Camera {
        self.camera.as_ref()
    }

    /// Writer for the configured frame format.
    pub fn frame_writer(&self) -> &dyn FrameWriter {
        self.frame_writer.as_ref()
    }

    /// Simulated instrument handles; `None` on hardware.
    pub fn simulation(&self) -> Option<&SimulatedBench> {
        self.simulation.as_ref()
    }

    /// Stage `id`.
    pub fn stage(&self, id: &str) -> AppResult<&dyn MotionStage> {
        self.stages
            .get(id)
            .map(|stage| stage.as_ref())
            .ok_or_else(|| DaqError::Configuration(format!("Missing stage definition '{id}'")))
    }

    /// Whether a beam dump stage is configured.
    pub fn has_beam_dump(&self) -> bool {
        self.stages.contains_key(BEAM_DUMP_STAGE)
    }

    /// Laser channel the bench is illuminated through.
    pub fn laser_channel(&self) -> u8 {
        self.config.laser.channel
    }

    /// Laser current for images taken at `fpm_position`.
    pub fn laser_current_for(&self, fpm_position: FpmPosition) -> f64 {
        match fpm_position {
            FpmPosition::Coron => self.config.laser.coron_current,
            FpmPosition::Direct => self.config.laser.direct_current,
        }
    }

    /// Move stage `id` to its named position and wait for it to stop.
    pub async fn move_stage_to(&self, id: &str, position_name: &str) -> Result<()> {
        let definition = self.config.stage(id)?;
        let position = definition.position(position_name)?;
        let units = definition.units;
        let stage = self.stage(id)?;
        scoped(stage, move || async move {
            stage.absolute_move(position, units, true).await
        })
        .await
        .with_context(|| format!("Failed to move stage '{id}' to '{position_name}'"))
    }

    /// Move the FPM stage to `position`.
    pub async fn move_fpm(&self, position: FpmPosition) -> Result<()> {
        self.move_stage_to(FPM_STAGE, position.exposure_set_name()).await
    }

    /// Move the Lyot stop stage to `position`.
    pub async fn move_lyot_stop(&self, position: LyotStopPosition) -> Result<()> {
        self.move_stage_to(LYOT_STOP_STAGE, &position.to_string()).await
    }

    /// Put the beam dump in (`true`) or take it out of the beam.
    pub async fn move_beam_dump(&self, inserted: bool) -> Result<()> {
        self.move_stage_to(BEAM_DUMP_STAGE, if inserted { "in" } else { "out" })
            .await
    }
}

/// Laser source driver for the configured backend.
pub fn laser_from_config(config: &TestbedConfig) -> Result<Arc<dyn LaserSource>> {
    match config.application.backend {
        Backend::Simulated => Ok(Arc::new(SimulatedLaser::new(config.laser.clone()))),
        Backend::Hardware => hardware_laser(config),
    }
}

#[cfg(feature = "instrument_thorlabs")]
fn hardware_laser(config: &TestbedConfig) -> Result<Arc<dyn LaserSource>> {
    use crate::hardware::mcls1::{Mcls1Laser, BAUD_RATE, PROMPT};
    use crate::hardware::serial::SerialTransport;

    let transport = SerialTransport::open(
        &config.laser.serial_port,
        BAUD_RATE,
        config.laser.timeout,
        PROMPT,
    )?;
    Ok(Arc::new(Mcls1Laser::new(
        "thorlabs_source_mcls1",
        transport,
        config.laser.clone(),
    )))
}

#[cfg(not(feature = "instrument_thorlabs"))]
fn hardware_laser(_config: &TestbedConfig) -> Result<Arc<dyn LaserSource>> {
    Err(DaqError::FeatureNotEnabled("instrument_thorlabs".to_string()).into())
}

/// Driver for stage `id` on the configured backend. On the simulated backend
/// the stage gets a controller of its own.
pub fn stage_from_config(config: &TestbedConfig, id: &str) -> Result<Arc<dyn MotionStage>> {
    let definition = config.stage(id)?.clone();
    match config.application.backend {
        Backend::Simulated => {
            let ximc = Arc::new(SimulatedXimc::new(
                [definition.device_name.clone()],
                config.simulator.move_polls,
            ));
            Ok(Arc::new(StandaStage::new(ximc, definition)))
        }
        Backend::Hardware => hardware_stage(definition),
    }
}

#[cfg(feature = "instrument_standa")]
fn hardware_stage(definition: crate::config::StageDefinition) -> Result<Arc<dyn MotionStage>> {
    use crate::hardware::standa::LibXimc;
    Ok(Arc::new(StandaStage::new(Arc::new(LibXimc::new()), definition)))
}

#[cfg(not(feature = "instrument_standa"))]
fn hardware_stage(_definition: crate::config::StageDefinition) -> Result<Arc<dyn MotionStage>> {
    Err(DaqError::FeatureNotEnabled("instrument_standa".to_string()).into())
}
