//! XIMC controller API surface used by the stage driver.
//!
//! Mirrors the subset of libximc calls the driver needs. Calls are synchronous
//! and fast (the library talks to the controller over USB); only motion is slow,
//! and that is handled by polling `get_status`.

use std::fmt;

/// Device handle returned by `open_device`.
pub type DeviceHandle = i32;

/// Running flag in `MvCmdSts`.
pub const MVCMD_RUNNING: u32 = 0x80;
/// Move command code in the low bits of `MvCmdSts`.
pub const MVCMD_MOVE: u32 = 0x01;

/// libximc `result_t` codes other than success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    /// `result_error`
    Error,
    /// `result_not_implemented`
    NotImplemented,
    /// `result_value_error`
    ValueError,
    /// `result_nodevice`
    NoDevice,
    /// Any other code
    Unknown(i32),
}

impl ResultCode {
    /// Map a raw `result_t`; `None` for `result_ok`.
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => None,
            -1 => Some(ResultCode::Error),
            -2 => Some(ResultCode::NotImplemented),
            -3 => Some(ResultCode::ValueError),
            -4 => Some(ResultCode::NoDevice),
            other => Some(ResultCode::Unknown(other)),
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultCode::Error => f.write_str("result_error"),
            ResultCode::NotImplemented => f.write_str("result_not_implemented"),
            ResultCode::ValueError => f.write_str("result_value_error"),
            ResultCode::NoDevice => f.write_str("result_nodevice"),
            ResultCode::Unknown(code) => write!(f, "result {code}"),
        }
    }
}

/// Result of a vendor library call.
pub type XimcResult<T> = Result<T, ResultCode>;

/// `status_t` fields the driver reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Status {
    /// Move command status bits
    pub mv_cmd_sts: u32,
    /// Position in steps
    pub cur_position: i32,
    /// Microsteps
    pub u_cur_position: i32,
    /// Encoder position
    pub enc_position: i64,
    /// Current speed in steps per second
    pub cur_speed: i32,
}

/// `get_position_t`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    /// Position in steps
    pub position: i32,
    /// Microsteps
    pub u_position: i32,
    /// Encoder position
    pub enc_position: i64,
}

/// `move_settings_t`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MoveSettings {
    /// Steps per second
    pub speed: u32,
    /// Microsteps per second
    pub u_speed: u32,
    /// Acceleration
    pub accel: u32,
    /// Deceleration
    pub decel: u32,
    /// Backlash compensation speed
    pub antiplay_speed: u32,
    /// Backlash compensation microstep speed
    pub u_antiplay_speed: u32,
    /// Move flags
    pub move_flags: u32,
}

/// `home_settings_t`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HomeSettings {
    /// Homing speed towards the limit switch
    pub fast_home: u32,
    /// Microstep part of `fast_home`
    pub u_fast_home: u32,
    /// Homing speed away from the limit switch
    pub slow_home: u32,
    /// Microstep part of `slow_home`
    pub u_slow_home: u32,
    /// Offset from the limit switch in steps
    pub home_delta: i32,
    /// Microstep part of the offset
    pub u_home_delta: i32,
    /// Homing flags
    pub home_flags: u32,
}

/// Controller library contract.
pub trait XimcApi: Send + Sync {
    /// Names (URIs) of the devices currently attached.
    fn enumerate_devices(&self) -> Vec<String>;

    /// Open `name`, returning its handle.
    fn open_device(&self, name: &str) -> XimcResult<DeviceHandle>;

    /// Release `handle`.
    fn close_device(&self, handle: DeviceHandle) -> XimcResult<()>;

    /// Absolute move to `position` steps plus `u_position` microsteps.
    fn command_move(&self, handle: DeviceHandle, position: i32, u_position: i32) -> XimcResult<()>;

    /// Homing followed by zeroing; returns once the controller has finished.
    fn command_homezero(&self, handle: DeviceHandle) -> XimcResult<()>;

    /// Soft stop
    fn command_sstp(&self, handle: DeviceHandle) -> XimcResult<()>;

    /// Controller status.
    fn get_status(&self, handle: DeviceHandle) -> XimcResult<Status>;

    /// Step and encoder position.
    fn get_position(&self, handle: DeviceHandle) -> XimcResult<Position>;

    /// Speed and acceleration settings.
    fn get_move_settings(&self, handle: DeviceHandle) -> XimcResult<MoveSettings>;

    /// Write speed and acceleration settings.
    fn set_move_settings(&self, handle: DeviceHandle, settings: &MoveSettings) -> XimcResult<()>;

    /// Homing settings.
    fn get_home_settings(&self, handle: DeviceHandle) -> XimcResult<HomeSettings>;

    /// Write homing settings.
    fn set_home_settings(&self, handle: DeviceHandle, settings: &HomeSettings) -> XimcResult<()>;
}

/// Split a step count into whole steps and 1/256 microsteps.
///
/// The fractional part keeps the sign of the input, so `-1.5` becomes `(-1, -128)`.
pub fn split_steps(steps: f64) -> (i32, i32) {
    let whole = steps.trunc();
    let micro = ((steps - whole) * 256.0).trunc();
    (whole as i32, micro as i32)
}

/// Inverse of [`split_steps`].
pub fn join_steps(whole: i32, micro: i32) -> f64 {
    whole as f64 + micro as f64 / 256.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_and_join_steps() {
        assert_eq!(split_steps(1500.5), (1500, 128));
        assert_eq!(split_steps(-1.5), (-1, -128));
        assert_eq!(split_steps(42.0), (42, 0));
        assert_eq!(join_steps(1500, 128), 1500.5);
    }

    #[test]
    fn result_codes() {
        assert_eq!(ResultCode::from_raw(0), None);
        assert_eq!(ResultCode::from_raw(-4), Some(ResultCode::NoDevice));
        assert_eq!(ResultCode::from_raw(-9), Some(ResultCode::Unknown(-9)));
        assert_eq!(ResultCode::Error.to_string(), "result_error");
    }
}
