//! Instrument capabilities
//!
//! Small async traits that testbed instruments implement. Experiments are written
//! against these traits so the same sequencing code drives real hardware and the
//! simulated bench:
//!
//! - the laser source implements `Connection + LaserSource`
//! - a Standa stage implements `Connection + MotionStage`
//! - the DM controller implements `Connection + DeformableMirror`
//! - a camera implements `Connection + ExposureControl + FrameGrabber`
//!
//! Each trait:
//! - is async (`#[async_trait]`)
//! - takes `&self`; drivers keep state behind tokio locks
//! - is `Send + Sync`
//! - returns `anyhow::Result`, carrying a `DaqError` where the failure is typed
//!
//! Connections are never held open across experiments. Use
//! [`crate::hardware::session::scoped`] to open, use and close an instrument.

use crate::hardware::dm::DmCommand;
use crate::hardware::frame::Frame;
use crate::hardware::segmented::SegmentedDmCommand;
use crate::types::MotionUnit;
use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Capability: connection lifecycle
#[async_trait]
pub trait Connection: Send + Sync {
    /// Identifier used in log messages
    fn id(&self) -> &str;

    /// Open the connection and bring the instrument to its default state
    async fn open(&self) -> Result<()>;

    /// Return the instrument to a safe state and release the connection
    async fn close(&self) -> Result<()>;
}

/// Capability: laser source with per-channel drive current
#[async_trait]
pub trait LaserSource: Connection {
    /// Set the drive current of `channel` in milliamps
    async fn set_current(&self, channel: u8, milliamps: f64) -> Result<()>;

    /// Read back the drive current of `channel` in milliamps
    async fn get_current(&self, channel: u8) -> Result<f64>;
}

/// Capability: motorized stage
///
/// # Contract
/// - Positions returned by `get_position` are in real units
/// - `absolute_move`/`relative_move` with `wait = false` return once the move is issued
/// - `await_stop` polls until the stage is idle or the timeout elapses
#[async_trait]
pub trait MotionStage: Connection {
    /// Run the homing sequence and zero the position
    async fn home(&self) -> Result<()>;

    /// Move to `position`, optionally waiting for the move to finish
    async fn absolute_move(&self, position: f64, units: MotionUnit, wait: bool) -> Result<()>;

    /// Move by `distance`, optionally waiting for the move to finish
    async fn relative_move(&self, distance: f64, units: MotionUnit, wait: bool) -> Result<()>;

    /// Current position in real units
    async fn get_position(&self) -> Result<f64>;

    /// Whether a move is in progress
    async fn is_moving(&self) -> Result<bool>;

    /// Soft stop
    async fn stop(&self) -> Result<()>;

    /// Poll until the stage stops, failing after `timeout`
    async fn await_stop(&self, timeout: Duration, poll_interval: Duration) -> Result<()>;

    /// Set speed in steps per second; fractional steps become microsteps
    async fn set_speed(&self, steps_per_second: f64) -> Result<()>;

    /// `(speed, microstep speed)`
    async fn get_speed(&self) -> Result<(u32, u32)>;
}

/// Capability: continuous deformable mirrors
#[async_trait]
pub trait DeformableMirror: Connection {
    /// Apply `command` to the DM selected by `command.dm_num`
    async fn apply_shape(&self, command: &DmCommand) -> Result<()>;

    /// Apply a command to each DM
    async fn apply_shape_to_both(&self, dm1: &DmCommand, dm2: &DmCommand) -> Result<()> {
        if dm1.dm_num != 1 || dm2.dm_num != 2 {
            anyhow::bail!(
                "apply_shape_to_both expects DM 1 and DM 2 commands, got DM {} and DM {}",
                dm1.dm_num,
                dm2.dm_num
            );
        }
        self.apply_shape(dm1).await?;
        self.apply_shape(dm2).await
    }
}

/// Capability: segmented deformable mirror
#[async_trait]
pub trait SegmentedMirror: Connection {
    /// Apply `command` to every segment
    async fn apply_shape(&self, command: &SegmentedDmCommand) -> Result<()>;
}

/// Capability: exposure time control
#[async_trait]
pub trait ExposureControl: Send + Sync {
    /// Exposure time of following frames
    async fn set_exposure(&self, exposure: Duration) -> Result<()>;

    /// Current exposure time
    async fn get_exposure(&self) -> Result<Duration>;
}

/// Capability: single-frame acquisition
#[async_trait]
pub trait FrameGrabber: Send + Sync {
    /// Expose and read out one frame
    async fn acquire(&self) -> Result<Frame>;
}

/// Science camera: everything the imaging pipeline needs
pub trait Camera: Connection + ExposureControl + FrameGrabber {}

impl<T: Connection + ExposureControl + FrameGrabber> Camera for T {}
