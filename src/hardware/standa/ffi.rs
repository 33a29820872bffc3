//! libximc binding (feature `instrument_standa`).
//!
//! Links against the vendor `ximc` shared library. Struct layouts follow
//! `ximc.h`; only the calls listed in [`XimcApi`] are bound.

#![allow(unsafe_code)]

use super::api::{
    DeviceHandle, HomeSettings, MoveSettings, Position, ResultCode, Status, XimcApi, XimcResult,
};
use std::ffi::{c_char, c_int, c_uint, c_void, CStr, CString};

const ENUMERATE_PROBE: c_int = 0x01;

#[repr(C)]
#[derive(Default)]
struct StatusT {
    move_sts: c_uint,
    mv_cmd_sts: c_uint,
    pwr_sts: c_uint,
    enc_sts: c_uint,
    wind_sts: c_uint,
    cur_position: c_int,
    u_cur_position: c_int,
    enc_position: i64,
    cur_speed: c_int,
    u_cur_speed: c_int,
    ipwr: c_int,
    upwr: c_int,
    iusb: c_int,
    uusb: c_int,
    cur_t: c_int,
    flags: c_uint,
    gpio_flags: c_uint,
    cmd_buf_free_space: c_uint,
}

#[repr(C)]
#[derive(Default)]
struct GetPositionT {
    position: c_int,
    u_position: c_int,
    enc_position: i64,
}

#[repr(C)]
#[derive(Default)]
struct MoveSettingsT {
    speed: c_uint,
    u_speed: c_uint,
    accel: c_uint,
    decel: c_uint,
    antiplay_speed: c_uint,
    u_antiplay_speed: c_uint,
    move_flags: c_uint,
}

#[repr(C)]
#[derive(Default)]
struct HomeSettingsT {
    fast_home: c_uint,
    u_fast_home: c_uint,
    slow_home: c_uint,
    u_slow_home: c_uint,
    home_delta: c_int,
    u_home_delta: c_int,
    home_flags: c_uint,
}

#[repr(C)]
#[derive(Default)]
#[allow(dead_code)]
struct ControllerNameT {
    controller_name: [c_char; 17],
    ctrl_flags: c_uint,
}

#[link(name = "ximc")]
extern "C" {
    fn enumerate_devices(flags: c_int, hints: *const c_char) -> *mut c_void;
    fn get_device_count(enumeration: *mut c_void) -> c_int;
    fn get_device_name(enumeration: *mut c_void, index: c_int) -> *const c_char;
    fn get_enumerate_device_controller_name(
        enumeration: *mut c_void,
        index: c_int,
        controller_name: *mut ControllerNameT,
    ) -> c_int;
    fn free_enumerate_devices(enumeration: *mut c_void) -> c_int;
    fn open_device(uri: *const c_char) -> c_int;
    fn close_device(id: *mut c_int) -> c_int;
    fn command_move(id: c_int, position: c_int, u_position: c_int) -> c_int;
    fn command_homezero(id: c_int) -> c_int;
    fn command_sstp(id: c_int) -> c_int;
    fn get_status(id: c_int, status: *mut StatusT) -> c_int;
    fn get_position(id: c_int, position: *mut GetPositionT) -> c_int;
    fn get_move_settings(id: c_int, settings: *mut MoveSettingsT) -> c_int;
    fn set_move_settings(id: c_int, settings: *const MoveSettingsT) -> c_int;
    fn get_home_settings(id: c_int, settings: *mut HomeSettingsT) -> c_int;
    fn set_home_settings(id: c_int, settings: *const HomeSettingsT) -> c_int;
}

const DEVICE_UNDEFINED: c_int = -1;

fn check(raw: c_int) -> XimcResult<()> {
    match ResultCode::from_raw(raw) {
        None => Ok(()),
        Some(code) => Err(code),
    }
}

/// The vendor library.
#[derive(Debug, Default)]
pub struct LibXimc;

impl LibXimc {
    /// Handle to the loaded library.
    pub fn new() -> Self {
        Self
    }
}

impl XimcApi for LibXimc {
    fn enumerate_devices(&self) -> Vec<String> {
        // SAFETY: the enumeration handle is only used between creation and free,
        // and names are copied out before the free.
        unsafe {
            let enumeration = enumerate_devices(ENUMERATE_PROBE, std::ptr::null());
            if enumeration.is_null() {
                return Vec::new();
            }
            let count = get_device_count(enumeration).max(0);
            let names = (0..count)
                .filter_map(|index| {
                    // Devices the controller cannot name are not usable.
                    let mut controller = ControllerNameT::default();
                    check(get_enumerate_device_controller_name(enumeration, index, &mut controller))
                        .ok()?;
                    let name = get_device_name(enumeration, index);
                    (!name.is_null()).then(|| CStr::from_ptr(name).to_string_lossy().into_owned())
                })
                .collect();
            free_enumerate_devices(enumeration);
            names
        }
    }

    fn open_device(&self, name: &str) -> XimcResult<DeviceHandle> {
        let uri = CString::new(name).map_err(|_| ResultCode::ValueError)?;
        // SAFETY: `uri` is a valid NUL-terminated string for the duration of the call.
        let handle = unsafe { open_device(uri.as_ptr()) };
        if handle == DEVICE_UNDEFINED {
            Err(ResultCode::NoDevice)
        } else {
            Ok(handle)
        }
    }

    fn close_device(&self, handle: DeviceHandle) -> XimcResult<()> {
        let mut id = handle;
        // SAFETY: `id` outlives the call; the library writes `device_undefined` into it.
        check(unsafe { close_device(&mut id) })
    }

    fn command_move(&self, handle: DeviceHandle, position: i32, u_position: i32) -> XimcResult<()> {
        // SAFETY: plain value arguments.
        check(unsafe { command_move(handle, position, u_position) })
    }

    fn command_homezero(&self, handle: DeviceHandle) -> XimcResult<()> {
        // SAFETY: plain value argument.
        check(unsafe { command_homezero(handle) })
    }

    fn command_sstp(&self, handle: DeviceHandle) -> XimcResult<()> {
        // SAFETY: plain value argument.
        check(unsafe { command_sstp(handle) })
    }

    fn get_status(&self, handle: DeviceHandle) -> XimcResult<Status> {
        let mut raw = StatusT::default();
        // SAFETY: `raw` is a properly laid out, writable `status_t`.
        check(unsafe { get_status(handle, &mut raw) })?;
        Ok(Status {
            mv_cmd_sts: raw.mv_cmd_sts,
            cur_position: raw.cur_position,
            u_cur_position: raw.u_cur_position,
            enc_position: raw.enc_position,
            cur_speed: raw.cur_speed,
        })
    }

    fn get_position(&self, handle: DeviceHandle) -> XimcResult<Position> {
        let mut raw = GetPositionT::default();
        // SAFETY: `raw` is a properly laid out, writable `get_position_t`.
        check(unsafe { get_position(handle, &mut raw) })?;
        Ok(Position {
            position: raw.position,
            u_position: raw.u_position,
            enc_position: raw.enc_position,
        })
    }

    fn get_move_settings(&self, handle: DeviceHandle) -> XimcResult<MoveSettings> {
        let mut raw = MoveSettingsT::default();
        // SAFETY: `raw` is a properly laid out, writable `move_settings_t`.
        check(unsafe { get_move_settings(handle, &mut raw) })?;
        Ok(MoveSettings {
            speed: raw.speed,
            u_speed: raw.u_speed,
            accel: raw.accel,
            decel: raw.decel,
            antiplay_speed: raw.antiplay_speed,
            u_antiplay_speed: raw.u_antiplay_speed,
            move_flags: raw.move_flags,
        })
    }

    fn set_move_settings(&self, handle: DeviceHandle, settings: &MoveSettings) -> XimcResult<()> {
        let raw = MoveSettingsT {
            speed: settings.speed,
            u_speed: settings.u_speed,
            accel: settings.accel,
            decel: settings.decel,
            antiplay_speed: settings.antiplay_speed,
            u_antiplay_speed: settings.u_antiplay_speed,
            move_flags: settings.move_flags,
        };
        // SAFETY: `raw` is a properly laid out `move_settings_t`.
        check(unsafe { set_move_settings(handle, &raw) })
    }

    fn get_home_settings(&self, handle: DeviceHandle) -> XimcResult<HomeSettings> {
        let mut raw = HomeSettingsT::default();
        // SAFETY: `raw` is a properly laid out, writable `home_settings_t`.
        check(unsafe { get_home_settings(handle, &mut raw) })?;
        Ok(HomeSettings {
            fast_home: raw.fast_home,
            u_fast_home: raw.u_fast_home,
            slow_home: raw.slow_home,
            u_slow_home: raw.u_slow_home,
            home_delta: raw.home_delta,
            u_home_delta: raw.u_home_delta,
            home_flags: raw.home_flags,
        })
    }

    fn set_home_settings(&self, handle: DeviceHandle, settings: &HomeSettings) -> XimcResult<()> {
        let raw = HomeSettingsT {
            fast_home: settings.fast_home,
            u_fast_home: settings.u_fast_home,
            slow_home: settings.slow_home,
            u_slow_home: settings.u_slow_home,
            home_delta: settings.home_delta,
            u_home_delta: settings.u_home_delta,
            home_flags: settings.home_flags,
        };
        // SAFETY: `raw` is a properly laid out `home_settings_t`.
        check(unsafe { set_home_settings(handle, &raw) })
    }
}
