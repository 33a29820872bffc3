//! Shared fixtures for integration tests: a small simulated bench whose data
//! root is a temporary directory.

#![allow(dead_code)]

use hcit_daq::config::TestbedConfig;
use hcit_daq::hardware::scoped;
use hcit_daq::testbed::Testbed;
use hcit_daq::types::FpmPosition;
use std::path::Path;

/// 16 actuators at 4 pixels per lambda/D: 64×64 frames covering ±8 lambda/D.
pub const TEST_CONFIG: &str = r#"
    [application]
    name = "Test bench"
    log_level = "debug"
    data_root = "data"
    backend = "simulated"

    [laser]
    serial_port = "/dev/null"
    default_current = 30.0
    coron_current = 60.0
    direct_current = 30.0

    [dm]
    actuators_across = 16

    [camera]
    pixels_per_lambda_over_d = 4.0
    wavelength_nm = 640.0
    min_exposure = "10us"
    max_exposure = "10s"

    [dark_zone]
    inner_lambda_over_d = 2.0
    outer_lambda_over_d = 7.0

    [[stages]]
    id = "fpm"
    device_name = "xi-emu:///fpm"
    soft_stops = [0.0, 25.0]
    conversion_factor = 0.0025
    positions = { coron = 12.5, direct = 2.0 }
    poll_interval = "1ms"
    move_timeout = "5s"

    [[stages]]
    id = "lyot_stop"
    device_name = "xi-emu:///lyot"
    soft_stops = [0.0, 25.0]
    conversion_factor = 0.0025
    positions = { in_beam = 10.0, out_of_beam = 20.0 }
    poll_interval = "1ms"
    move_timeout = "5s"

    [[stages]]
    id = "beam_dump"
    device_name = "xi-emu:///dump"
    soft_stops = [0.0, 50.0]
    conversion_factor = 0.0025
    positions = { in = 40.0, out = 0.0 }
    poll_interval = "1ms"
    move_timeout = "5s"

    [simulator]
    peak_counts_per_ms = 50000.0
    reference_current = 30.0
    dark_counts = 0.0
    read_noise = 0.0
    seed = 3
    move_polls = 2
"#;

pub fn test_config(data_root: &Path) -> TestbedConfig {
    let mut config = TestbedConfig::from_toml_str(TEST_CONFIG).unwrap();
    config.application.data_root = data_root.to_path_buf();
    config
}

pub fn simulated_testbed(data_root: &Path) -> Testbed {
    Testbed::simulated(test_config(data_root)).unwrap()
}

/// Open the laser at the current for `fpm` and run `body`.
pub async fn with_laser<F, Fut, T>(testbed: &Testbed, fpm: FpmPosition, body: F) -> T
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<T>>,
{
    let laser = testbed.laser();
    let channel = testbed.laser_channel();
    let current = testbed.laser_current_for(fpm);
    scoped(laser, move || async move {
        laser.set_current(channel, current).await?;
        body().await
    })
    .await
    .unwrap()
}
