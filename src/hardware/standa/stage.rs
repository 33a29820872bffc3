//! Standa stage driver.
//!
//! Drives one axis through an [`XimcApi`] implementation. Positions are handled
//! in steps internally; real units (mm, degrees) are converted with the
//! configured `conversion_factor` (real units per step). Moves are checked
//! against the configured soft stops before anything is sent to the controller.

use super::api::{join_steps, split_steps, DeviceHandle, ResultCode, XimcApi, XimcResult, MVCMD_RUNNING};
use crate::config::StageDefinition;
use crate::error::DaqError;
use crate::hardware::capabilities::{Connection, MotionStage};
use crate::types::MotionUnit;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// One Standa axis.
pub struct StandaStage<A: XimcApi> {
    api: Arc<A>,
    definition: StageDefinition,
    handle: RwLock<Option<DeviceHandle>>,
}

fn vendor<T>(call: &str, result: XimcResult<T>) -> Result<T, DaqError> {
    result.map_err(|code: ResultCode| {
        debug!(call, %code, "XIMC call failed");
        DaqError::vendor_call(call)
    })
}

impl<A: XimcApi + 'static> StandaStage<A> {
    /// Stage for `definition`; the device is resolved on open.
    pub fn new(api: Arc<A>, definition: StageDefinition) -> Self {
        Self {
            api,
            definition,
            handle: RwLock::new(None),
        }
    }

    /// Configuration of this stage.
    pub fn definition(&self) -> &StageDefinition {
        &self.definition
    }

    /// Devices currently attached to the host.
    pub fn scan_for_devices(&self) -> Vec<String> {
        self.api.enumerate_devices()
    }

    /// Resolve the configured device name against the attached devices.
    ///
    /// The configured name may be any part of the device URI, e.g. just the
    /// port (`ttyACM0`). The first enumerated URI containing it is returned.
    pub fn get_device_id(&self) -> Result<String, DaqError> {
        let devices = self.scan_for_devices();
        if devices.is_empty() {
            return Err(DaqError::DeviceNotFound("No devices found.".to_string()));
        }
        let wanted = &self.definition.device_name;
        devices
            .iter()
            .find(|device| device.contains(wanted.as_str()))
            .cloned()
            .ok_or_else(|| {
                DaqError::DeviceNotFound(format!(
                    "'{wanted}' not present in device list: '{}'.",
                    devices.join(", ")
                ))
            })
    }

    async fn handle(&self) -> Result<DeviceHandle, DaqError> {
        (*self.handle.read().await).ok_or_else(|| {
            DaqError::Instrument(format!("Stage '{}' is not open", self.definition.id))
        })
    }

    fn check_soft_stops(&self, target_steps: f64) -> Result<(), DaqError> {
        let target = target_steps * self.definition.conversion_factor;
        let (min, max) = self.definition.soft_stops;
        if target < min || target > max {
            return Err(DaqError::Instrument(format!(
                "Stage '{}' target {target:.4} is outside soft stops [{min}, {max}]",
                self.definition.id
            )));
        }
        Ok(())
    }

    fn to_steps(&self, value: f64, units: MotionUnit) -> f64 {
        match units {
            MotionUnit::Steps => value,
            MotionUnit::Real => value / self.definition.conversion_factor,
        }
    }

    /// Home the axis, applying the configured home offset.
    pub async fn home(&self) -> Result<()> {
        let handle = self.handle().await?;
        let mut settings = vendor("get_home_settings", self.api.get_home_settings(handle))?;
        let (delta, u_delta) = split_steps(self.definition.home_offset);
        settings.home_delta = delta;
        settings.u_home_delta = u_delta;
        vendor("set_home_settings", self.api.set_home_settings(handle, &settings))?;
        vendor("command_homezero", self.api.command_homezero(handle))?;
        info!(stage = %self.definition.id, home_offset = self.definition.home_offset, "Homed");
        Ok(())
    }

    /// Move to an absolute step position.
    pub async fn goto_steps(&self, position: f64, wait: bool) -> Result<()> {
        self.check_soft_stops(position)?;
        let handle = self.handle().await?;
        let (whole, micro) = split_steps(position);
        debug!(stage = %self.definition.id, whole, micro, "command_move");
        vendor("command_move", self.api.command_move(handle, whole, micro))?;
        if wait {
            self.await_stop(self.definition.move_timeout, self.definition.poll_interval)
                .await?;
        }
        Ok(())
    }

    /// Move by `distance` steps from the encoder position.
    pub async fn offset_steps(&self, distance: f64, wait: bool) -> Result<()> {
        let current = self.get_enc_position().await?;
        self.goto_steps(current + distance, wait).await
    }

    /// Move to `position` in real units.
    pub async fn goto_real(&self, position: f64, wait: bool) -> Result<()> {
        self.goto_steps(self.to_steps(position, MotionUnit::Real), wait)
            .await
    }

    /// Move by `distance` in real units.
    pub async fn offset_real(&self, distance: f64, wait: bool) -> Result<()> {
        self.offset_steps(self.to_steps(distance, MotionUnit::Real), wait)
            .await
    }

    /// Step position including microsteps.
    pub async fn get_step_position(&self) -> Result<f64> {
        let handle = self.handle().await?;
        let position = vendor("get_position", self.api.get_position(handle))?;
        Ok(join_steps(position.position, position.u_position))
    }

    /// Encoder position in steps.
    pub async fn get_enc_position(&self) -> Result<f64> {
        let handle = self.handle().await?;
        let position = vendor("get_position", self.api.get_position(handle))?;
        Ok(position.enc_position as f64)
    }
}

#[async_trait]
impl<A: XimcApi + 'static> Connection for StandaStage<A> {
    fn id(&self) -> &str {
        &self.definition.id
    }

    async fn open(&self) -> Result<()> {
        let device_id = self.get_device_id()?;
        let handle = vendor("open_device", self.api.open_device(&device_id))?;
        *self.handle.write().await = Some(handle);
        debug!(stage = %self.definition.id, device = %device_id, handle, "Opened XIMC device");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if let Some(handle) = self.handle.write().await.take() {
            vendor("close_device", self.api.close_device(handle))?;
        }
        Ok(())
    }
}

#[async_trait]
impl<A: XimcApi + 'static> MotionStage for StandaStage<A> {
    async fn home(&self) -> Result<()> {
        StandaStage::home(self).await
    }

    async fn absolute_move(&self, position: f64, units: MotionUnit, wait: bool) -> Result<()> {
        info!(stage = %self.definition.id, position, ?units, "Absolute move");
        self.goto_steps(self.to_steps(position, units), wait).await
    }

    async fn relative_move(&self, distance: f64, units: MotionUnit, wait: bool) -> Result<()> {
        info!(stage = %self.definition.id, distance, ?units, "Relative move");
        self.offset_steps(self.to_steps(distance, units), wait).await
    }

    async fn get_position(&self) -> Result<f64> {
        Ok(self.definition.conversion_factor * self.get_enc_position().await?)
    }

    async fn is_moving(&self) -> Result<bool> {
        let handle = self.handle().await?;
        let status = vendor("get_status", self.api.get_status(handle))?;
        Ok(status.mv_cmd_sts & MVCMD_RUNNING != 0)
    }

    async fn stop(&self) -> Result<()> {
        let handle = self.handle().await?;
        self.api.command_sstp(handle).map_err(|code| {
            warn!(stage = %self.definition.id, %code, "Soft stop rejected");
            DaqError::VendorCall("Soft stop failed".to_string())
        })?;
        Ok(())
    }

    async fn await_stop(&self, timeout: Duration, poll_interval: Duration) -> Result<()> {
        let started = Instant::now();
        loop {
            if !self.is_moving().await? {
                return Ok(());
            }
            if started.elapsed() >= timeout {
                return Err(DaqError::Timeout(
                    timeout,
                    format!("stage '{}' to stop", self.definition.id),
                )
                .into());
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    async fn set_speed(&self, steps_per_second: f64) -> Result<()> {
        if steps_per_second <= 0.0 {
            anyhow::bail!("Speed must be positive, got {steps_per_second}");
        }
        let handle = self.handle().await?;
        let mut settings = vendor("get_move_settings", self.api.get_move_settings(handle))?;
        let (speed, u_speed) = split_steps(steps_per_second);
        settings.speed = speed as u32;
        settings.u_speed = u_speed as u32;
        vendor("set_move_settings", self.api.set_move_settings(handle, &settings))?;
        Ok(())
    }

    async fn get_speed(&self) -> Result<(u32, u32)> {
        let handle = self.handle().await?;
        let settings = vendor("get_move_settings", self.api.get_move_settings(handle))?;
        Ok((settings.speed, settings.u_speed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::standa::SimulatedXimc;
    use std::collections::BTreeMap;

    const DEVICE: &str = "xi-emu:///test";

    fn definition() -> StageDefinition {
        StageDefinition {
            id: "fpm".to_string(),
            device_name: DEVICE.to_string(),
            soft_stops: (0.0, 25.0),
            home_offset: 10.5,
            conversion_factor: 0.0025,
            units: MotionUnit::Real,
            positions: BTreeMap::new(),
            move_timeout: Duration::from_millis(50),
            poll_interval: Duration::from_millis(1),
        }
    }

    async fn open_stage(move_polls: u32) -> (Arc<SimulatedXimc>, StandaStage<SimulatedXimc>) {
        let ximc = Arc::new(SimulatedXimc::new([DEVICE], move_polls));
        let stage = StandaStage::new(ximc.clone(), definition());
        stage.open().await.unwrap();
        (ximc, stage)
    }

    #[tokio::test]
    async fn missing_device_is_reported() {
        let ximc = Arc::new(SimulatedXimc::new(["xi-emu:///other"], 0));
        let stage = StandaStage::new(ximc, definition());
        let err = stage.open().await.unwrap_err();
        assert!(err.to_string().contains("not present in device list"));

        let empty = StandaStage::new(Arc::new(SimulatedXimc::new(Vec::<String>::new(), 0)), definition());
        let err = empty.get_device_id().unwrap_err();
        assert!(matches!(err, DaqError::DeviceNotFound(ref msg) if msg == "No devices found."));
    }

    #[tokio::test]
    async fn device_name_matches_part_of_the_uri() {
        let ximc = Arc::new(SimulatedXimc::new(
            ["xi-com:///dev/ttyACM1", "xi-com:///dev/ttyACM0"],
            0,
        ));
        let stage = StandaStage::new(
            ximc.clone(),
            StageDefinition {
                device_name: "ttyACM0".to_string(),
                ..definition()
            },
        );
        assert_eq!(stage.get_device_id().unwrap(), "xi-com:///dev/ttyACM0");

        stage.open().await.unwrap();
        stage.goto_steps(40.0, true).await.unwrap();
        assert_eq!(ximc.axis_steps("xi-com:///dev/ttyACM0"), Some(40.0));
        assert_eq!(ximc.axis_steps("xi-com:///dev/ttyACM1"), Some(0.0));
    }

    #[tokio::test]
    async fn home_writes_offset_with_microsteps() {
        let (ximc, stage) = open_stage(0).await;
        stage.goto_steps(400.0, true).await.unwrap();
        MotionStage::home(&stage).await.unwrap();

        let settings = ximc.home_settings(DEVICE).unwrap();
        assert_eq!((settings.home_delta, settings.u_home_delta), (10, 128));
        assert_eq!(stage.get_step_position().await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn moves_in_steps_and_real_units() {
        let (ximc, stage) = open_stage(3).await;
        stage.absolute_move(1000.25, MotionUnit::Steps, true).await.unwrap();
        assert_eq!(ximc.axis_steps(DEVICE), Some(1000.25));
        assert_eq!(stage.get_step_position().await.unwrap(), 1000.25);

        stage.absolute_move(5.0, MotionUnit::Real, true).await.unwrap();
        assert!((stage.get_position().await.unwrap() - 5.0).abs() < 1e-9);

        stage.relative_move(1.0, MotionUnit::Real, true).await.unwrap();
        assert!((stage.get_position().await.unwrap() - 6.0).abs() < 1e-9);
        assert_eq!(stage.get_enc_position().await.unwrap(), 2400.0);
    }

    #[tokio::test]
    async fn soft_stops_reject_out_of_range_targets() {
        let (ximc, stage) = open_stage(0).await;
        assert!(stage.absolute_move(25.5, MotionUnit::Real, true).await.is_err());
        assert!(stage.absolute_move(-4.0, MotionUnit::Steps, true).await.is_err());
        assert_eq!(ximc.call_count("command_move"), 0);
    }

    #[tokio::test]
    async fn await_stop_times_out_while_moving() {
        let (ximc, stage) = open_stage(0).await;
        stage.goto_steps(100.0, false).await.unwrap();
        ximc.hold_motion();
        assert!(stage.is_moving().await.unwrap());

        let err = stage
            .await_stop(Duration::from_millis(20), Duration::from_millis(2))
            .await
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<DaqError>(), Some(DaqError::Timeout(..))));

        stage.stop().await.unwrap();
        assert!(!stage.is_moving().await.unwrap());
    }

    #[tokio::test]
    async fn speed_is_split_into_microsteps() {
        let (_ximc, stage) = open_stage(0).await;
        stage.set_speed(250.5).await.unwrap();
        assert_eq!(stage.get_speed().await.unwrap(), (250, 128));
        assert!(stage.set_speed(0.0).await.is_err());
    }

    #[tokio::test]
    async fn vendor_failures_name_the_call() {
        let (ximc, stage) = open_stage(0).await;
        ximc.fail_call("command_move");
        let err = stage.goto_steps(10.0, true).await.unwrap_err();
        assert_eq!(err.to_string(), "command_move() failed");

        ximc.fail_call("command_sstp");
        let err = stage.stop().await.unwrap_err();
        assert_eq!(err.to_string(), "Soft stop failed");
    }

    #[tokio::test]
    async fn closed_stage_refuses_commands() {
        let (_ximc, stage) = open_stage(0).await;
        stage.close().await.unwrap();
        assert!(stage.get_position().await.is_err());
    }
}
