//! Continuous deformable mirror commands.
//!
//! A `DmCommand` holds the requested shape of one DM on its square actuator grid,
//! either as surface height in nanometers or directly in volts. Bias and flat map
//! are not baked into the data; they are added when the command is converted to
//! volts, so commands can be summed freely (e.g. a speckle correction on top of
//! the running command).

use crate::config::DmConfig;
use crate::error::{AppResult, DaqError};
use crate::storage::txt;
use crate::types::SinSpecification;
use ndarray::Array2;
use std::f64::consts::PI;
use std::path::Path;

/// Shape request for DM 1 or DM 2.
#[derive(Debug, Clone, PartialEq)]
pub struct DmCommand {
    /// `(actuators_across, actuators_across)`; nm of surface, or volts when `as_volts`
    pub data: Array2<f64>,
    /// 1 or 2
    pub dm_num: u8,
    /// Add the bias voltage on conversion
    pub bias: bool,
    /// Add the DM flat map on conversion
    pub flat_map: bool,
    /// `data` is already in volts
    pub as_volts: bool,
}

/// Conversion constants for one DM.
#[derive(Debug, Clone)]
pub struct DmCalibration {
    /// Bias voltage
    pub bias_volts: f64,
    /// Voltage ceiling
    pub max_volts: f64,
    /// Surface nm per volt
    pub nm_per_volt: f64,
    /// Voltages that flatten the mirror; zero when absent
    pub flat_map: Option<Array2<f64>>,
}

impl DmCalibration {
    /// Calibration for `dm_num`, loading its flat map file when configured.
    pub fn from_config(config: &DmConfig, dm_num: u8) -> AppResult<Self> {
        let flat_path = match dm_num {
            1 => config.flat_map_dm1.as_deref(),
            2 => config.flat_map_dm2.as_deref(),
            other => return Err(invalid_dm(other)),
        };
        let flat_map = flat_path.map(load_matrix_file).transpose()?;
        if let Some(flat) = &flat_map {
            let n = config.actuators_across;
            if flat.dim() != (n, n) {
                return Err(DaqError::Configuration(format!(
                    "Flat map for DM {} has shape {:?}, expected ({n}, {n})",
                    dm_num,
                    flat.dim()
                )));
            }
        }
        Ok(Self {
            bias_volts: config.bias_volts,
            max_volts: config.max_volts,
            nm_per_volt: config.nm_per_volt,
            flat_map,
        })
    }
}

fn invalid_dm(dm_num: u8) -> DaqError {
    DaqError::Instrument(format!("Invalid DM number {dm_num}. Must be 1 or 2"))
}

impl DmCommand {
    /// Command from raw data.
    pub fn new(data: Array2<f64>, dm_num: u8, bias: bool, flat_map: bool, as_volts: bool) -> Self {
        Self {
            data,
            dm_num,
            bias,
            flat_map,
            as_volts,
        }
    }

    /// All-zero surface command.
    pub fn zeros(actuators_across: usize, dm_num: u8) -> Self {
        Self::new(
            Array2::zeros((actuators_across, actuators_across)),
            dm_num,
            false,
            false,
            false,
        )
    }

    /// Load a command from a matrix file (`.fits` needs the `storage_fits` feature;
    /// anything else is read as a text matrix).
    pub fn load(
        path: &Path,
        dm_num: u8,
        bias: bool,
        flat_map: bool,
        as_volts: bool,
    ) -> AppResult<Self> {
        if !(1..=2).contains(&dm_num) {
            return Err(invalid_dm(dm_num));
        }
        let data = load_matrix_file(path)?;
        if data.nrows() != data.ncols() {
            return Err(DaqError::Storage(format!(
                "DM command '{}' is {:?}, expected a square actuator grid",
                path.display(),
                data.dim()
            )));
        }
        Ok(Self::new(data, dm_num, bias, flat_map, as_volts))
    }

    /// Surface height in nanometers (bias and flat map excluded).
    pub fn surface_nm(&self, calibration: &DmCalibration) -> Array2<f64> {
        if self.as_volts {
            &self.data * calibration.nm_per_volt
        } else {
            self.data.clone()
        }
    }

    /// Voltages to send to the driver, clipped to `[0, max_volts]`.
    pub fn to_volts(&self, calibration: &DmCalibration) -> AppResult<Array2<f64>> {
        let mut volts = if self.as_volts {
            self.data.clone()
        } else {
            &self.data / calibration.nm_per_volt
        };
        if self.bias {
            volts += calibration.bias_volts;
        }
        if self.flat_map {
            if let Some(flat) = &calibration.flat_map {
                if flat.dim() != volts.dim() {
                    return Err(DaqError::Instrument(format!(
                        "Flat map shape {:?} does not match command shape {:?}",
                        flat.dim(),
                        volts.dim()
                    )));
                }
                volts += flat;
            }
        }
        volts.mapv_inplace(|v| v.clamp(0.0, calibration.max_volts));
        Ok(volts)
    }

    /// This command with `other`'s data added; flags are kept from `self`.
    pub fn plus(&self, other: &Array2<f64>) -> Self {
        Self {
            data: &self.data + other,
            ..self.clone()
        }
    }
}

fn load_matrix_file(path: &Path) -> AppResult<Array2<f64>> {
    let is_fits = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("fits"))
        .unwrap_or(false);
    if is_fits {
        #[cfg(feature = "storage_fits")]
        {
            use crate::storage::{FitsFrameWriter, FrameWriter};
            return Ok(FitsFrameWriter::new().read(path)?.0.data);
        }
        #[cfg(not(feature = "storage_fits"))]
        return Err(DaqError::FeatureNotEnabled("storage_fits".to_string()));
    }
    txt::load_matrix(path)
}

/// Flat command and its short name (`flat_map`, `bias` or `flat`).
pub fn flat_command(
    actuators_across: usize,
    dm_num: u8,
    bias: bool,
    flat_map: bool,
) -> (DmCommand, String) {
    let name = if flat_map {
        "flat_map"
    } else if bias {
        "bias"
    } else {
        "flat"
    };
    let mut command = DmCommand::zeros(actuators_across, dm_num);
    command.bias = bias;
    command.flat_map = flat_map;
    (command, name.to_string())
}

/// Sine surface in nm on an `n × n` grid.
///
/// `h(x, y) = ptv/2 · sin(2π·ncycles·(x·cosθ + y·sinθ)/n + φ)` with `x` the
/// column and `y` the row offset from actuator `(n/2, n/2)`, the same origin
/// the camera uses for the star.
pub fn sine_surface(spec: &SinSpecification, actuators_across: usize) -> Array2<f64> {
    let n = actuators_across as f64;
    let center = (actuators_across / 2) as f64;
    let theta = spec.angle_deg.to_radians();
    let phase = spec.phase_deg.to_radians();
    let amplitude = spec.peak_to_valley.value() / 2.0;
    let (sin_t, cos_t) = theta.sin_cos();
    Array2::from_shape_fn((actuators_across, actuators_across), |(row, col)| {
        let x = col as f64 - center;
        let y = row as f64 - center;
        amplitude * (2.0 * PI * spec.ncycles * (x * cos_t + y * sin_t) / n + phase).sin()
    })
}

/// Sine command, optionally on top of `initial_data`, and its short name.
pub fn sin_command(
    spec: &SinSpecification,
    actuators_across: usize,
    dm_num: u8,
    bias: bool,
    flat_map: bool,
    initial_data: Option<&Array2<f64>>,
) -> (DmCommand, String) {
    let mut data = sine_surface(spec, actuators_across);
    if let Some(initial) = initial_data {
        data += initial;
    }
    let name = format!(
        "sin_ang{}_ncyc{}_ptv{}nm_ph{}",
        spec.angle_deg,
        spec.ncycles,
        spec.peak_to_valley.value(),
        spec.phase_deg
    );
    (DmCommand::new(data, dm_num, bias, flat_map, false), name)
}
