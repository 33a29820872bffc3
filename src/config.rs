//! Testbed configuration using Figment
//!
//! Configuration is loaded from:
//! 1. `config/testbed.toml` (base configuration)
//! 2. Environment variables prefixed with `HCIT_`, nested keys separated by `__`
//!    (e.g. `HCIT_APPLICATION__LOG_LEVEL=debug`)
//!
//! # Example
//! ```no_run
//! use hcit_daq::config::TestbedConfig;
//!
//! let config = TestbedConfig::load()?;
//! println!("Testbed: {}", config.application.name);
//! # Ok::<(), hcit_daq::error::DaqError>(())
//! ```

use crate::error::{AppResult, DaqError};
use crate::storage::FrameFormat;
use crate::types::MotionUnit;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration snapshot written into every run directory.
pub const SNAPSHOT_FILE: &str = "testbed_config.toml";

/// Stage ids every testbed must define.
pub const FPM_STAGE: &str = "fpm";
/// Lyot stop stage id.
pub const LYOT_STOP_STAGE: &str = "lyot_stop";
/// Optional beam dump stage id.
pub const BEAM_DUMP_STAGE: &str = "beam_dump";

/// Top-level testbed configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestbedConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Thorlabs MCLS1 laser source
    pub laser: LaserConfig,
    /// Continuous deformable mirrors (DM1 and DM2)
    pub dm: DmConfig,
    /// Segmented deformable mirror
    #[serde(default)]
    pub segmented_dm: SegmentedDmConfig,
    /// Science camera
    pub camera: CameraConfig,
    /// Dark zone geometry
    #[serde(default)]
    pub dark_zone: DarkZoneConfig,
    /// Motorized stages
    pub stages: Vec<StageDefinition>,
    /// Simulated optical bench parameters
    #[serde(default)]
    pub simulator: SimulatorConfig,
    /// COFFEE data set inputs
    #[serde(default)]
    pub coffee: CoffeeConfig,
}

/// Which instrument implementations to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// In-process simulated bench
    #[default]
    Simulated,
    /// Vendor drivers
    Hardware,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Simulated => write!(f, "simulated"),
            Backend::Hardware => write!(f, "hardware"),
        }
    }
}

/// Console log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Multi-line human readable output
    #[default]
    Pretty,
    /// Single-line output
    Compact,
    /// JSON lines
    Json,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Testbed name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Console log format
    #[serde(default)]
    pub log_format: LogFormat,
    /// Root directory experiment output is created under
    pub data_root: PathBuf,
    /// Instrument backend
    #[serde(default)]
    pub backend: Backend,
    /// File format of saved frames
    #[serde(default)]
    pub frame_format: FrameFormat,
}

/// Laser source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaserConfig {
    /// Serial device of the laser source
    pub serial_port: String,
    /// Laser channel used for the bench
    #[serde(default = "default_laser_channel")]
    pub channel: u8,
    /// Current set when the source is opened (mA)
    pub default_current: f64,
    /// Current used for coronagraphic imaging (mA)
    pub coron_current: f64,
    /// Current used for direct imaging (mA)
    pub direct_current: f64,
    /// Upper limit accepted by `set_current` (mA)
    #[serde(default = "default_max_current")]
    pub max_current: f64,
    /// Serial read timeout
    #[serde(default = "default_serial_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

/// Continuous DM configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DmConfig {
    /// Actuators across one side of the square actuator grid
    #[serde(default = "default_actuators_across")]
    pub actuators_across: usize,
    /// Actuator pitch in meters
    #[serde(default = "default_actuator_pitch")]
    pub actuator_pitch: f64,
    /// DM1 translation in meters
    #[serde(default)]
    pub dm1_translation_x: f64,
    /// DM1 translation in meters
    #[serde(default)]
    pub dm1_translation_y: f64,
    /// DM2 misalignment relative to DM1 in meters
    #[serde(default)]
    pub dm2_translation_x: f64,
    /// DM2 misalignment relative to DM1 in meters
    #[serde(default)]
    pub dm2_translation_y: f64,
    /// Voltage added when a command asks for bias
    #[serde(default)]
    pub bias_volts: f64,
    /// Voltage ceiling; commands are clipped to it
    #[serde(default = "default_max_volts")]
    pub max_volts: f64,
    /// Surface gain used to convert nm commands to volts
    #[serde(default = "default_nm_per_volt")]
    pub nm_per_volt: f64,
    /// Flat map files (volts); zero when unset
    #[serde(default)]
    pub flat_map_dm1: Option<PathBuf>,
    /// DM2 flat map file (volts)
    #[serde(default)]
    pub flat_map_dm2: Option<PathBuf>,
}

/// Segmented DM configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentedDmConfig {
    /// Number of hexagonal rings around the central segment
    pub rings: usize,
    /// Largest accepted piston in µm
    pub max_piston_um: f64,
    /// Largest accepted tip or tilt in mrad
    pub max_tilt_mrad: f64,
}

impl Default for SegmentedDmConfig {
    fn default() -> Self {
        Self {
            rings: 3,
            max_piston_um: 5.0,
            max_tilt_mrad: 5.0,
        }
    }
}

/// Auto-exposure thresholds as fractions of the saturation level
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoExposureConfig {
    /// Halve the exposure when the peak reaches this fraction
    pub high_fraction: f64,
    /// Double the exposure while the peak is below this fraction
    pub low_fraction: f64,
    /// Exposure changes tried before giving up
    pub max_attempts: u32,
}

impl Default for AutoExposureConfig {
    fn default() -> Self {
        Self {
            high_fraction: 0.8,
            low_fraction: 0.3,
            max_attempts: 12,
        }
    }
}

/// Camera configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Full-scale counts; pixels are clipped to it
    #[serde(default = "default_saturation")]
    pub saturation_counts: f64,
    /// Focal plane sampling
    pub pixels_per_lambda_over_d: f64,
    /// Central wavelength
    pub wavelength_nm: f64,
    /// Auto exposure thresholds
    #[serde(default)]
    pub auto_exposure: AutoExposureConfig,
    /// Shortest exposure the camera accepts
    #[serde(default = "default_min_exposure", with = "humantime_serde")]
    pub min_exposure: Duration,
    /// Longest exposure the camera accepts
    #[serde(default = "default_max_exposure", with = "humantime_serde")]
    pub max_exposure: Duration,
}

/// Region of the dark zone relative to the image center.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DarkZoneSide {
    /// Full annulus
    #[default]
    Full,
    /// Half annulus left of the star
    Left,
    /// Half annulus right of the star
    Right,
    /// Half annulus above the star
    Top,
    /// Half annulus below the star
    Bottom,
}

/// Dark zone geometry in lambda/D
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DarkZoneConfig {
    /// Inner radius
    pub inner_lambda_over_d: f64,
    /// Outer radius
    pub outer_lambda_over_d: f64,
    /// Part of the annulus kept
    #[serde(default)]
    pub side: DarkZoneSide,
}

impl Default for DarkZoneConfig {
    fn default() -> Self {
        Self {
            inner_lambda_over_d: 4.0,
            outer_lambda_over_d: 14.0,
            side: DarkZoneSide::Full,
        }
    }
}

/// Stage definition in configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDefinition {
    /// Unique stage identifier (`fpm`, `lyot_stop`, `beam_dump`)
    pub id: String,
    /// Vendor device name, matched against enumerated devices
    pub device_name: String,
    /// (min, max) in real units
    pub soft_stops: (f64, f64),
    /// Home offset in steps
    #[serde(default)]
    pub home_offset: f64,
    /// Real units per step
    pub conversion_factor: f64,
    /// Units of `positions`
    #[serde(default)]
    pub units: MotionUnit,
    /// Named positions in `units`
    #[serde(default)]
    pub positions: BTreeMap<String, f64>,
    /// Longest wait for a move to finish
    #[serde(default = "default_move_timeout", with = "humantime_serde")]
    pub move_timeout: Duration,
    /// Status polling interval while waiting
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
}

impl StageDefinition {
    /// Look up a named position.
    pub fn position(&self, name: &str) -> AppResult<f64> {
        self.positions.get(name).copied().ok_or_else(|| {
            DaqError::Configuration(format!(
                "Stage '{}' has no position named '{}'",
                self.id, name
            ))
        })
    }
}

/// Simulated bench configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatorConfig {
    /// Unocculted PSF peak counts per millisecond at `reference_current`
    pub peak_counts_per_ms: f64,
    /// Laser current (mA) `peak_counts_per_ms` was measured at
    pub reference_current: f64,
    /// Constant offset added to every pixel
    pub dark_counts: f64,
    /// Gaussian read noise sigma in counts; zero disables noise
    pub read_noise: f64,
    /// Noise generator seed
    pub seed: u64,
    /// Status polls a simulated stage reports as moving after a move command
    pub move_polls: u32,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            peak_counts_per_ms: 50_000.0,
            reference_current: 30.0,
            dark_counts: 0.0,
            read_noise: 0.0,
            seed: 7,
            move_polls: 1,
        }
    }
}

/// COFFEE configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoffeeConfig {
    /// Directory holding `*p2v/` folders of DM2 focus commands
    #[serde(default)]
    pub focus_commands_dir: Option<PathBuf>,
}

// Default value functions
fn default_laser_channel() -> u8 {
    1
}

fn default_max_current() -> f64 {
    100.0
}

fn default_serial_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_actuators_across() -> usize {
    34
}

fn default_actuator_pitch() -> f64 {
    300e-6
}

fn default_max_volts() -> f64 {
    200.0
}

fn default_nm_per_volt() -> f64 {
    5.0
}

fn default_saturation() -> f64 {
    65_535.0
}

fn default_min_exposure() -> Duration {
    Duration::from_micros(10)
}

fn default_max_exposure() -> Duration {
    Duration::from_secs(10)
}

fn default_move_timeout() -> Duration {
    Duration::from_secs(600)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

impl TestbedConfig {
    /// Load configuration from `config/testbed.toml` and environment variables
    pub fn load() -> AppResult<Self> {
        Self::load_from("config/testbed.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(DaqError::Configuration(format!(
                "Configuration file '{}' not found",
                path.display()
            )));
        }
        Self::extract(Figment::new().merge(Toml::file(path)))
    }

    /// Parse configuration from a TOML string, still honouring environment overrides
    pub fn from_toml_str(toml: &str) -> AppResult<Self> {
        Self::extract(Figment::new().merge(Toml::string(toml)))
    }

    fn extract(figment: Figment) -> AppResult<Self> {
        let config: Self = figment
            .merge(Env::prefixed("HCIT_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let invalid = |msg: String| Err(DaqError::Configuration(msg));

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return invalid(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        let laser = &self.laser;
        for (name, value) in [
            ("default_current", laser.default_current),
            ("coron_current", laser.coron_current),
            ("direct_current", laser.direct_current),
        ] {
            if !(0.0..=laser.max_current).contains(&value) {
                return invalid(format!(
                    "Invalid laser {name} {value} mA. Must be within 0-{} mA",
                    laser.max_current
                ));
            }
        }

        if self.dm.actuators_across < 2 {
            return invalid(format!(
                "Invalid dm.actuators_across {}. Must be at least 2",
                self.dm.actuators_across
            ));
        }
        if self.dm.nm_per_volt <= 0.0 {
            return invalid("dm.nm_per_volt must be positive".to_string());
        }

        if self.camera.pixels_per_lambda_over_d < 2.0 {
            return invalid(format!(
                "Invalid camera.pixels_per_lambda_over_d {}. Must be at least 2 (Nyquist)",
                self.camera.pixels_per_lambda_over_d
            ));
        }
        if self.camera.min_exposure >= self.camera.max_exposure {
            return invalid("camera.min_exposure must be below camera.max_exposure".to_string());
        }
        let auto = &self.camera.auto_exposure;
        if !(0.0 < auto.low_fraction && auto.low_fraction < auto.high_fraction && auto.high_fraction <= 1.0)
        {
            return invalid(format!(
                "Invalid auto_exposure fractions low={} high={}",
                auto.low_fraction, auto.high_fraction
            ));
        }

        if self.dark_zone.inner_lambda_over_d >= self.dark_zone.outer_lambda_over_d {
            return invalid(format!(
                "Dark zone inner radius {} must be smaller than outer radius {}",
                self.dark_zone.inner_lambda_over_d, self.dark_zone.outer_lambda_over_d
            ));
        }

        // Validate stage IDs are unique
        let mut ids = HashSet::new();
        for stage in &self.stages {
            if !ids.insert(stage.id.as_str()) {
                return invalid(format!("Duplicate stage ID: {}", stage.id));
            }
            if stage.conversion_factor == 0.0 {
                return invalid(format!("Stage '{}' has a zero conversion_factor", stage.id));
            }
            if stage.soft_stops.0 >= stage.soft_stops.1 {
                return invalid(format!(
                    "Stage '{}' soft stops {:?} are not ordered",
                    stage.id, stage.soft_stops
                ));
            }
        }

        for (id, required) in [
            (FPM_STAGE, ["coron", "direct"]),
            (LYOT_STOP_STAGE, ["in_beam", "out_of_beam"]),
        ] {
            let stage = self.stage(id)?;
            for name in required {
                stage.position(name)?;
            }
        }
        if let Ok(stage) = self.stage(BEAM_DUMP_STAGE) {
            stage.position("in")?;
            stage.position("out")?;
        }

        Ok(())
    }

    /// Write the configuration as `testbed_config.toml` in `dir`, so a run's
    /// output records the bench settings it was taken with.
    pub fn save_snapshot(&self, dir: &Path) -> AppResult<PathBuf> {
        let text = toml::to_string_pretty(self)
            .map_err(|e| DaqError::Configuration(format!("Failed to serialize configuration: {e}")))?;
        let path = dir.join(SNAPSHOT_FILE);
        std::fs::write(&path, text)?;
        Ok(path)
    }

    /// Find a stage definition by id
    pub fn stage(&self, id: &str) -> AppResult<&StageDefinition> {
        self.stages
            .iter()
            .find(|stage| stage.id == id)
            .ok_or_else(|| DaqError::Configuration(format!("Missing stage definition '{id}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [application]
        name = "Test bench"
        log_level = "info"
        data_root = "data"

        [laser]
        serial_port = "/dev/null"
        default_current = 30.0
        coron_current = 50.0
        direct_current = 10.0

        [dm]

        [camera]
        pixels_per_lambda_over_d = 4.0
        wavelength_nm = 640.0

        [[stages]]
        id = "fpm"
        device_name = "xi-emu:///fpm"
        soft_stops = [0.0, 25.0]
        conversion_factor = 0.0025
        positions = { coron = 12.5, direct = 2.0 }

        [[stages]]
        id = "lyot_stop"
        device_name = "xi-emu:///lyot"
        soft_stops = [0.0, 25.0]
        conversion_factor = 0.0025
        positions = { in_beam = 10.0, out_of_beam = 20.0 }
    "#;

    fn minimal() -> TestbedConfig {
        TestbedConfig::from_toml_str(MINIMAL).unwrap()
    }

    #[test]
    fn test_minimal_config_loads_with_defaults() {
        let config = minimal();
        assert_eq!(config.application.backend, Backend::Simulated);
        assert_eq!(config.dm.actuators_across, 34);
        assert_eq!(config.laser.channel, 1);
        assert_eq!(config.segmented_dm.rings, 3);
        assert_eq!(config.stage(FPM_STAGE).unwrap().move_timeout, Duration::from_secs(600));
        assert_eq!(config.stage(FPM_STAGE).unwrap().units, MotionUnit::Real);
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = minimal();
        config.application.log_level = "invalid".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Invalid log_level"));
    }

    #[test]
    fn test_laser_current_above_limit() {
        let mut config = minimal();
        config.laser.coron_current = 250.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_stage_ids() {
        let mut config = minimal();
        let duplicate = config.stages[0].clone();
        config.stages.push(duplicate);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Duplicate stage ID"));
    }

    #[test]
    fn test_missing_named_position() {
        let mut config = minimal();
        config.stages[0].positions.remove("direct");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_dark_zone_radii_ordered() {
        let mut config = minimal();
        config.dark_zone.inner_lambda_over_d = 20.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_snapshot_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let config = minimal();
        let path = config.save_snapshot(dir.path()).unwrap();
        assert!(path.ends_with(SNAPSHOT_FILE));

        let reloaded = TestbedConfig::load_from(&path).unwrap();
        assert_eq!(reloaded.application.name, config.application.name);
        assert_eq!(reloaded.stages.len(), config.stages.len());
        assert_eq!(
            reloaded.stage(FPM_STAGE).unwrap().position("coron").unwrap(),
            12.5
        );
    }
}
