//! Simulated testbed instruments
//!
//! Stand-ins for the laser source, the two continuous DMs, the segmented DM and
//! the science camera. They share physical state the way the real bench does:
//! the camera reads the laser output, the DM surfaces and the stage positions
//! (through the simulated XIMC controller) every time it exposes, and renders the
//! focal plane with [`optics::OpticalModel`].
//!
//! All waits use `tokio::time`, never `std::thread::sleep`.

pub mod optics;

use crate::config::{
    DmConfig, LaserConfig, SegmentedDmConfig, SimulatorConfig, StageDefinition, TestbedConfig,
    BEAM_DUMP_STAGE, FPM_STAGE, LYOT_STOP_STAGE,
};
use crate::error::DaqError;
use crate::hardware::capabilities::{
    Connection, DeformableMirror, ExposureControl, FrameGrabber, LaserSource, SegmentedMirror,
};
use crate::hardware::dm::{DmCalibration, DmCommand};
use crate::hardware::frame::Frame;
use crate::hardware::segmented::{segment_count, SegmentedDmCommand};
use crate::hardware::standa::SimulatedXimc;
use anyhow::Result;
use async_trait::async_trait;
use ndarray::Array2;
use optics::OpticalModel;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

fn ensure_open(open: &AtomicBool, id: &str) -> Result<(), DaqError> {
    if open.load(Ordering::SeqCst) {
        Ok(())
    } else {
        Err(DaqError::Instrument(format!("{id} is not open")))
    }
}

// =============================================================================
// SimulatedLaser
// =============================================================================

/// Laser source with per-channel current and an output enable.
pub struct SimulatedLaser {
    config: LaserConfig,
    currents: RwLock<HashMap<u8, f64>>,
    enabled: AtomicBool,
}

impl SimulatedLaser {
    /// Closed source; opening sets the default current.
    pub fn new(config: LaserConfig) -> Self {
        Self {
            config,
            currents: RwLock::new(HashMap::new()),
            enabled: AtomicBool::new(false),
        }
    }

    /// Current reaching the bench: the configured channel's current while enabled.
    pub async fn output_current(&self) -> f64 {
        if !self.enabled.load(Ordering::SeqCst) {
            return 0.0;
        }
        self.currents
            .read()
            .await
            .get(&self.config.channel)
            .copied()
            .unwrap_or(0.0)
    }
}

#[async_trait]
impl Connection for SimulatedLaser {
    fn id(&self) -> &str {
        "laser_source"
    }

    async fn open(&self) -> Result<()> {
        self.currents
            .write()
            .await
            .insert(self.config.channel, self.config.default_current);
        self.enabled.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.currents.write().await.insert(self.config.channel, 0.0);
        self.enabled.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl LaserSource for SimulatedLaser {
    async fn set_current(&self, channel: u8, milliamps: f64) -> Result<()> {
        if !(0.0..=self.config.max_current).contains(&milliamps) {
            return Err(DaqError::Instrument(format!(
                "Laser current {milliamps} mA out of range (0-{} mA)",
                self.config.max_current
            ))
            .into());
        }
        self.currents.write().await.insert(channel, milliamps);
        debug!(channel, current_ma = milliamps, "Simulated laser current set");
        Ok(())
    }

    async fn get_current(&self, channel: u8) -> Result<f64> {
        Ok(self.currents.read().await.get(&channel).copied().unwrap_or(0.0))
    }
}

// =============================================================================
// SimulatedDm
// =============================================================================

/// DM1 and DM2 behind one controller.
pub struct SimulatedDm {
    config: DmConfig,
    calibrations: [DmCalibration; 2],
    commands: RwLock<[Option<DmCommand>; 2]>,
    applied: AtomicU64,
    open: AtomicBool,
}

impl SimulatedDm {
    /// Both DMs flat.
    pub fn new(config: DmConfig) -> Result<Self, DaqError> {
        let calibrations = [
            DmCalibration::from_config(&config, 1)?,
            DmCalibration::from_config(&config, 2)?,
        ];
        Ok(Self {
            config,
            calibrations,
            commands: RwLock::new([None, None]),
            applied: AtomicU64::new(0),
            open: AtomicBool::new(false),
        })
    }

    /// Number of shapes applied since creation.
    pub fn shapes_applied(&self) -> u64 {
        self.applied.load(Ordering::SeqCst)
    }

    /// Last command applied to `dm_num`, if the DM is not flat.
    pub async fn current_command(&self, dm_num: u8) -> Option<DmCommand> {
        let index = usize::from(dm_num.checked_sub(1)?);
        self.commands.read().await.get(index).cloned().flatten()
    }

    /// Surfaces in nm as seen in the pupil; DM2 is shifted by its misalignment.
    pub async fn surfaces_nm(&self) -> (Array2<f64>, Array2<f64>) {
        let n = self.config.actuators_across;
        let commands = self.commands.read().await;
        let surface = |index: usize| {
            commands[index]
                .as_ref()
                .map(|c| c.surface_nm(&self.calibrations[index]))
                .unwrap_or_else(|| Array2::zeros((n, n)))
        };
        let shift_x = (self.config.dm2_translation_x / self.config.actuator_pitch).round() as isize;
        let shift_y = (self.config.dm2_translation_y / self.config.actuator_pitch).round() as isize;
        (surface(0), shift(&surface(1), shift_y, shift_x))
    }
}

fn shift(data: &Array2<f64>, rows: isize, cols: isize) -> Array2<f64> {
    let (n_rows, n_cols) = data.dim();
    Array2::from_shape_fn((n_rows, n_cols), |(r, c)| {
        let src_r = r as isize - rows;
        let src_c = c as isize - cols;
        if (0..n_rows as isize).contains(&src_r) && (0..n_cols as isize).contains(&src_c) {
            data[[src_r as usize, src_c as usize]]
        } else {
            0.0
        }
    })
}

#[async_trait]
impl Connection for SimulatedDm {
    fn id(&self) -> &str {
        "boston_dm"
    }

    async fn open(&self) -> Result<()> {
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        *self.commands.write().await = [None, None];
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl DeformableMirror for SimulatedDm {
    async fn apply_shape(&self, command: &DmCommand) -> Result<()> {
        ensure_open(&self.open, self.id())?;
        let index = match command.dm_num {
            1 => 0,
            2 => 1,
            other => anyhow::bail!("Invalid DM number {other}. Must be 1 or 2"),
        };
        let n = self.config.actuators_across;
        if command.data.dim() != (n, n) {
            anyhow::bail!(
                "DM {} command has shape {:?}, expected ({n}, {n})",
                command.dm_num,
                command.data.dim()
            );
        }
        // Validates flat map shape and clips like the driver would.
        command.to_volts(&self.calibrations[index])?;
        self.commands.write().await[index] = Some(command.clone());
        self.applied.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// SimulatedSegmentedDm
// =============================================================================

/// Segmented DM holding the last applied command.
pub struct SimulatedSegmentedDm {
    config: SegmentedDmConfig,
    command: RwLock<SegmentedDmCommand>,
    open: AtomicBool,
}

impl SimulatedSegmentedDm {
    /// Flat segmented DM.
    pub fn new(config: SegmentedDmConfig) -> Self {
        let flat = SegmentedDmCommand::flat(segment_count(config.rings));
        Self {
            config,
            command: RwLock::new(flat),
            open: AtomicBool::new(false),
        }
    }

    /// Last command applied.
    pub async fn current_command(&self) -> SegmentedDmCommand {
        self.command.read().await.clone()
    }
}

#[async_trait]
impl Connection for SimulatedSegmentedDm {
    fn id(&self) -> &str {
        "iris_ao"
    }

    async fn open(&self) -> Result<()> {
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        *self.command.write().await = SegmentedDmCommand::flat(segment_count(self.config.rings));
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl SegmentedMirror for SimulatedSegmentedDm {
    async fn apply_shape(&self, command: &SegmentedDmCommand) -> Result<()> {
        ensure_open(&self.open, self.id())?;
        command.validate(
            segment_count(self.config.rings),
            self.config.max_piston_um,
            self.config.max_tilt_mrad,
        )?;
        *self.command.write().await = command.clone();
        Ok(())
    }
}

// =============================================================================
// SimulatedCamera
// =============================================================================

/// Stage lookup for the camera: device name, conversion factor and the two
/// named positions that decide the optical state.
struct StageProbe {
    device_name: String,
    conversion_factor: f64,
    active: f64,
    inactive: f64,
}

impl StageProbe {
    fn new(stage: &StageDefinition, active: &str, inactive: &str) -> Result<Self, DaqError> {
        let to_real = |value: f64| match stage.units {
            crate::types::MotionUnit::Real => value,
            crate::types::MotionUnit::Steps => value * stage.conversion_factor,
        };
        Ok(Self {
            device_name: stage.device_name.clone(),
            conversion_factor: stage.conversion_factor,
            active: to_real(stage.position(active)?),
            inactive: to_real(stage.position(inactive)?),
        })
    }

    /// Whether the stage is closer to its active position than its inactive one.
    fn is_active(&self, ximc: &SimulatedXimc) -> bool {
        let position = ximc.axis_steps(&self.device_name).unwrap_or(0.0) * self.conversion_factor;
        (position - self.active).abs() <= (position - self.inactive).abs()
    }
}

/// Science camera rendering the bench state.
pub struct SimulatedCamera {
    optics: OpticalModel,
    simulator: SimulatorConfig,
    saturation: f64,
    laser: Arc<SimulatedLaser>,
    dm: Arc<SimulatedDm>,
    segmented_dm: Arc<SimulatedSegmentedDm>,
    ximc: Arc<SimulatedXimc>,
    fpm: StageProbe,
    lyot_stop: StageProbe,
    beam_dump: Option<StageProbe>,
    exposure: RwLock<Duration>,
    rng: Mutex<StdRng>,
    frame_count: AtomicU64,
    open: AtomicBool,
}

impl SimulatedCamera {
    /// Camera rendering the given instruments.
    pub fn new(
        config: &TestbedConfig,
        laser: Arc<SimulatedLaser>,
        dm: Arc<SimulatedDm>,
        segmented_dm: Arc<SimulatedSegmentedDm>,
        ximc: Arc<SimulatedXimc>,
    ) -> Result<Self, DaqError> {
        let oversampling = config.camera.pixels_per_lambda_over_d.round().max(1.0) as usize;
        let optics = OpticalModel::new(
            config.dm.actuators_across,
            oversampling,
            config.segmented_dm.rings,
            config.camera.wavelength_nm,
        );
        let beam_dump = match config.stage(BEAM_DUMP_STAGE) {
            Ok(stage) => Some(StageProbe::new(stage, "in", "out")?),
            Err(_) => None,
        };
        Ok(Self {
            optics,
            simulator: config.simulator.clone(),
            saturation: config.camera.saturation_counts,
            laser,
            dm,
            segmented_dm,
            ximc,
            fpm: StageProbe::new(config.stage(FPM_STAGE)?, "coron", "direct")?,
            lyot_stop: StageProbe::new(config.stage(LYOT_STOP_STAGE)?, "in_beam", "out_of_beam")?,
            beam_dump,
            exposure: RwLock::new(Duration::from_millis(1)),
            rng: Mutex::new(StdRng::seed_from_u64(config.simulator.seed)),
            frame_count: AtomicU64::new(0),
            open: AtomicBool::new(false),
        })
    }

    /// Frames acquired so far.
    pub fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::SeqCst)
    }

    fn gaussian(&self, sigma: f64) -> f64 {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // Box-Muller
        let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
        let u2: f64 = rng.gen();
        sigma * (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
    }
}

#[async_trait]
impl Connection for SimulatedCamera {
    fn id(&self) -> &str {
        "science_camera"
    }

    async fn open(&self) -> Result<()> {
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl ExposureControl for SimulatedCamera {
    async fn set_exposure(&self, exposure: Duration) -> Result<()> {
        if exposure.is_zero() {
            anyhow::bail!("Exposure time must be positive");
        }
        *self.exposure.write().await = exposure;
        Ok(())
    }

    async fn get_exposure(&self) -> Result<Duration> {
        Ok(*self.exposure.read().await)
    }
}

#[async_trait]
impl FrameGrabber for SimulatedCamera {
    async fn acquire(&self) -> Result<Frame> {
        ensure_open(&self.open, self.id())?;
        let exposure = *self.exposure.read().await;

        let beam_blocked = self
            .beam_dump
            .as_ref()
            .map(|dump| dump.is_active(&self.ximc))
            .unwrap_or(false);
        let current = self.laser.output_current().await;
        let flux_per_ms = if beam_blocked {
            0.0
        } else {
            self.simulator.peak_counts_per_ms * current / self.simulator.reference_current
        };

        let coronagraph = self.fpm.is_active(&self.ximc) && self.lyot_stop.is_active(&self.ximc);
        let (dm1, dm2) = self.dm.surfaces_nm().await;
        let segments = self.segmented_dm.current_command().await;
        let intensity = self.optics.intensity(&dm1, &dm2, &segments, coronagraph);

        let scale = flux_per_ms * exposure.as_secs_f64() * 1e3;
        let mut data = intensity * scale + self.simulator.dark_counts;
        if self.simulator.read_noise > 0.0 {
            let sigma = self.simulator.read_noise;
            data.mapv_inplace(|v| v + self.gaussian(sigma));
        }
        let saturation = self.saturation;
        data.mapv_inplace(|v| v.clamp(0.0, saturation));

        let count = self.frame_count.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(frame = count, coronagraph, beam_blocked, ?exposure, "Simulated frame");
        Ok(Frame::new(data, exposure))
    }
}
