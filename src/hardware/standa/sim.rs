//! Simulated XIMC controller.
//!
//! Holds one virtual axis per device name. A move is reported as running for a
//! configurable number of `get_status` polls, then the axis lands on its target.
//! Individual calls can be made to fail to exercise driver error paths.

use super::api::{
    join_steps, DeviceHandle, HomeSettings, MoveSettings, Position, ResultCode, Status, XimcApi,
    XimcResult, MVCMD_MOVE, MVCMD_RUNNING,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Axis {
    name: String,
    position: (i32, i32),
    target: (i32, i32),
    polls_remaining: u32,
    move_settings: MoveSettings,
    home_settings: HomeSettings,
    open: bool,
}

#[derive(Debug, Default)]
struct State {
    axes: Vec<Axis>,
    failing: HashSet<&'static str>,
    calls: HashMap<&'static str, usize>,
}

/// In-process stand-in for libximc.
#[derive(Debug)]
pub struct SimulatedXimc {
    move_polls: u32,
    state: Mutex<State>,
}

impl SimulatedXimc {
    /// Controller with one axis per device name.
    pub fn new<I, S>(device_names: I, move_polls: u32) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let axes = device_names
            .into_iter()
            .map(|name| Axis {
                name: name.into(),
                move_settings: MoveSettings {
                    speed: 1000,
                    accel: 1000,
                    decel: 1000,
                    ..Default::default()
                },
                ..Default::default()
            })
            .collect();
        Self {
            move_polls,
            state: Mutex::new(State {
                axes,
                ..Default::default()
            }),
        }
    }

    /// Make every later call named `call` fail with `result_error`.
    pub fn fail_call(&self, call: &'static str) {
        self.lock().failing.insert(call);
    }

    /// How many times `call` has been made.
    pub fn call_count(&self, call: &'static str) -> usize {
        self.lock().calls.get(call).copied().unwrap_or(0)
    }

    /// Keep reporting motion on every axis until `release_motion` is called.
    pub fn hold_motion(&self) {
        for axis in &mut self.lock().axes {
            axis.polls_remaining = u32::MAX;
        }
    }

    /// Let held moves finish.
    pub fn release_motion(&self) {
        for axis in &mut self.lock().axes {
            axis.polls_remaining = 0;
            axis.position = axis.target;
        }
    }

    /// Current home settings of `name`, for inspection.
    pub fn home_settings(&self, name: &str) -> Option<HomeSettings> {
        self.lock()
            .axes
            .iter()
            .find(|axis| axis.name == name)
            .map(|axis| axis.home_settings)
    }

    /// Position of `name` in steps, readable whether or not the device is open.
    pub fn axis_steps(&self, name: &str) -> Option<f64> {
        self.lock()
            .axes
            .iter()
            .find(|axis| axis.name == name)
            .map(|axis| join_steps(axis.position.0, axis.position.1))
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn with_axis<T>(
        &self,
        call: &'static str,
        handle: DeviceHandle,
        f: impl FnOnce(&mut Axis) -> T,
    ) -> XimcResult<T> {
        let mut state = self.lock();
        *state.calls.entry(call).or_default() += 1;
        if state.failing.contains(call) {
            return Err(ResultCode::Error);
        }
        let axis = usize::try_from(handle)
            .ok()
            .and_then(|index| state.axes.get_mut(index))
            .filter(|axis| axis.open)
            .ok_or(ResultCode::NoDevice)?;
        Ok(f(axis))
    }
}

impl XimcApi for SimulatedXimc {
    fn enumerate_devices(&self) -> Vec<String> {
        self.lock().axes.iter().map(|axis| axis.name.clone()).collect()
    }

    fn open_device(&self, name: &str) -> XimcResult<DeviceHandle> {
        let mut state = self.lock();
        *state.calls.entry("open_device").or_default() += 1;
        if state.failing.contains("open_device") {
            return Err(ResultCode::Error);
        }
        let index = state
            .axes
            .iter()
            .position(|axis| axis.name == name)
            .ok_or(ResultCode::NoDevice)?;
        state.axes[index].open = true;
        DeviceHandle::try_from(index).map_err(|_| ResultCode::Error)
    }

    fn close_device(&self, handle: DeviceHandle) -> XimcResult<()> {
        self.with_axis("close_device", handle, |axis| axis.open = false)
    }

    fn command_move(&self, handle: DeviceHandle, position: i32, u_position: i32) -> XimcResult<()> {
        let polls = self.move_polls;
        self.with_axis("command_move", handle, |axis| {
            axis.target = (position, u_position);
            if polls == 0 {
                axis.position = axis.target;
            }
            axis.polls_remaining = polls;
        })
    }

    fn command_homezero(&self, handle: DeviceHandle) -> XimcResult<()> {
        self.with_axis("command_homezero", handle, |axis| {
            axis.position = (0, 0);
            axis.target = (0, 0);
            axis.polls_remaining = 0;
        })
    }

    fn command_sstp(&self, handle: DeviceHandle) -> XimcResult<()> {
        self.with_axis("command_sstp", handle, |axis| {
            axis.target = axis.position;
            axis.polls_remaining = 0;
        })
    }

    fn get_status(&self, handle: DeviceHandle) -> XimcResult<Status> {
        self.with_axis("get_status", handle, |axis| {
            let running = axis.polls_remaining > 0;
            if running {
                axis.polls_remaining -= 1;
            } else {
                axis.position = axis.target;
            }
            Status {
                mv_cmd_sts: if running { MVCMD_MOVE | MVCMD_RUNNING } else { MVCMD_MOVE },
                cur_position: axis.position.0,
                u_cur_position: axis.position.1,
                enc_position: join_steps(axis.position.0, axis.position.1).round() as i64,
                cur_speed: if running { axis.move_settings.speed as i32 } else { 0 },
            }
        })
    }

    fn get_position(&self, handle: DeviceHandle) -> XimcResult<Position> {
        self.with_axis("get_position", handle, |axis| {
            if axis.polls_remaining == 0 {
                axis.position = axis.target;
            }
            Position {
                position: axis.position.0,
                u_position: axis.position.1,
                enc_position: join_steps(axis.position.0, axis.position.1).round() as i64,
            }
        })
    }

    fn get_move_settings(&self, handle: DeviceHandle) -> XimcResult<MoveSettings> {
        self.with_axis("get_move_settings", handle, |axis| axis.move_settings)
    }

    fn set_move_settings(&self, handle: DeviceHandle, settings: &MoveSettings) -> XimcResult<()> {
        self.with_axis("set_move_settings", handle, |axis| axis.move_settings = *settings)
    }

    fn get_home_settings(&self, handle: DeviceHandle) -> XimcResult<HomeSettings> {
        self.with_axis("get_home_settings", handle, |axis| axis.home_settings)
    }

    fn set_home_settings(&self, handle: DeviceHandle, settings: &HomeSettings) -> XimcResult<()> {
        self.with_axis("set_home_settings", handle, |axis| axis.home_settings = *settings)
    }
}
