//! Loading the shipped configuration and rejecting bad ones.

mod common;

use common::TEST_CONFIG;
use hcit_daq::config::{Backend, TestbedConfig, BEAM_DUMP_STAGE, FPM_STAGE};
use hcit_daq::storage::FrameFormat;
use std::time::Duration;

#[test]
fn shipped_config_loads() {
    let config = TestbedConfig::load_from("config/testbed.toml").unwrap();
    assert_eq!(config.application.backend, Backend::Simulated);
    assert_eq!(config.application.frame_format, FrameFormat::Csv);
    assert_eq!(config.dm.actuators_across, 32);
    assert_eq!(config.laser.timeout, Duration::from_secs(2));

    let fpm = config.stage(FPM_STAGE).unwrap();
    assert_eq!(fpm.position("coron").unwrap(), 12.5);
    assert_eq!(fpm.move_timeout, Duration::from_secs(600));
    assert_eq!(
        config.stage(BEAM_DUMP_STAGE).unwrap().position("in").unwrap(),
        40.0
    );
    assert!(config.coffee.focus_commands_dir.is_none());
}

#[test]
fn missing_file_is_a_configuration_error() {
    let err = TestbedConfig::load_from("config/does_not_exist.toml").unwrap_err();
    assert!(err.to_string().contains("not found"));
}

#[test]
fn missing_required_stage_is_rejected() {
    let without_lyot = TEST_CONFIG.replace("id = \"lyot_stop\"", "id = \"pupil_wheel\"");
    let err = TestbedConfig::from_toml_str(&without_lyot).unwrap_err();
    assert!(err.to_string().contains("lyot_stop"));
}

#[test]
fn beam_dump_needs_in_and_out_positions() {
    let bad = TEST_CONFIG.replace("positions = { in = 40.0, out = 0.0 }", "positions = { in = 40.0 }");
    assert!(TestbedConfig::from_toml_str(&bad).is_err());
}

#[test]
fn unknown_backend_fails_to_parse() {
    let bad = TEST_CONFIG.replace("backend = \"simulated\"", "backend = \"emulated\"");
    assert!(TestbedConfig::from_toml_str(&bad).is_err());
}

#[test]
fn sub_nyquist_sampling_is_rejected() {
    let bad = TEST_CONFIG.replace(
        "pixels_per_lambda_over_d = 4.0",
        "pixels_per_lambda_over_d = 1.5",
    );
    let err = TestbedConfig::from_toml_str(&bad).unwrap_err();
    assert!(err.to_string().contains("Nyquist"));
}
