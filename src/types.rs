//! Shared value types for testbed configuration and experiments.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Focal plane mask stage position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FpmPosition {
    /// Mask in the beam, coronagraphic imaging.
    Coron,
    /// Mask out of the beam, direct (non-coronagraphic) imaging.
    Direct,
}

impl FpmPosition {
    /// Name of the exposure set images taken at this position are stored under.
    pub fn exposure_set_name(&self) -> &'static str {
        match self {
            FpmPosition::Coron => "coron",
            FpmPosition::Direct => "direct",
        }
    }
}

impl fmt::Display for FpmPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.exposure_set_name())
    }
}

/// Lyot stop stage position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LyotStopPosition {
    /// Lyot stop in the beam
    InBeam,
    /// Lyot stop out of the beam
    OutOfBeam,
}

impl fmt::Display for LyotStopPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LyotStopPosition::InBeam => f.write_str("in_beam"),
            LyotStopPosition::OutOfBeam => f.write_str("out_of_beam"),
        }
    }
}

/// How processed images are recentered before saving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageCentering {
    /// Pick a method from the FPM position: PSF peak for direct, none for coron.
    Auto,
    /// Center on the PSF peak.
    Psf,
    /// Center on the centroid of the apodizer satellite spots.
    CustomApodizerSpots,
    /// Leave the frame as read out.
    Off,
}

impl fmt::Display for ImageCentering {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ImageCentering::Auto => "auto",
            ImageCentering::Psf => "psf",
            ImageCentering::CustomApodizerSpots => "custom_apodizer_spots",
            ImageCentering::Off => "off",
        };
        f.write_str(name)
    }
}

/// Units a stage position or distance is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionUnit {
    /// Motor steps; fractional parts are sent as 1/256 microsteps.
    Steps,
    /// Physical units (mm, degrees), converted with the stage conversion factor.
    #[default]
    Real,
}

/// A length in nanometers.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Nanometers(pub f64);

impl Nanometers {
    /// Value in nm.
    pub fn value(self) -> f64 {
        self.0
    }

    /// From a length in meters.
    pub fn from_meters(meters: f64) -> Self {
        Nanometers(meters * 1e9)
    }

    /// Value in µm.
    pub fn to_micrometers(self) -> f64 {
        self.0 * 1e-3
    }
}

impl fmt::Display for Nanometers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} nm", self.0)
    }
}

/// Sine wave applied across a continuous DM.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SinSpecification {
    /// Orientation of the wave vector, degrees from the DM x axis.
    pub angle_deg: f64,
    /// Number of cycles across the DM aperture.
    pub ncycles: f64,
    /// Surface peak-to-valley.
    pub peak_to_valley: Nanometers,
    /// Phase offset in degrees.
    pub phase_deg: f64,
}

impl SinSpecification {
    /// Sine of `peak_to_valley` at `angle_deg` with `ncycles` across the DM.
    pub fn new(angle_deg: f64, ncycles: f64, peak_to_valley: Nanometers, phase_deg: f64) -> Self {
        Self {
            angle_deg,
            ncycles,
            peak_to_valley,
            phase_deg,
        }
    }
}
