//! Experiments run end to end on the simulated testbed.

mod common;

use common::{simulated_testbed, test_config};
use hcit_daq::config::SNAPSHOT_FILE;
use hcit_daq::experiment::general::{
    flat_with_map, take_exposures_both_dm_commands, CommandList, ExposurePair,
};
use hcit_daq::experiment::metadata::METADATA_FILE;
use hcit_daq::experiment::pastis::mode_requirements_file;
use hcit_daq::experiment::speckle_nulling::LOG_FILE;
use hcit_daq::experiment::{
    CoffeeStrokeMin, CoffeeStrokeMinParams, ExperimentRunner, ExperimentState,
    PastisModeAmplitudes, PastisModeAmplitudesParams, RunMetadata, SimpleSineTest,
    SimpleSineTestParams, SpeckleNulling, SpeckleNullingParams,
};
use hcit_daq::storage::calibration::read_calibration_records;
use hcit_daq::storage::txt::{load_vector, save_matrix, save_vector};
use hcit_daq::testbed::Testbed;
use hcit_daq::types::{ImageCentering, Nanometers, SinSpecification};
use ndarray::Array2;
use std::path::Path;
use std::time::Duration;
use tokio_test::assert_ok;

fn subdirectories(path: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(path)
        .unwrap()
        .map(|entry| entry.unwrap())
        .filter(|entry| entry.path().is_dir())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

fn speckle_params(path: &Path) -> SpeckleNullingParams {
    SpeckleNullingParams {
        num_iterations: 2,
        exposure_time: Duration::from_millis(1),
        num_exposures: 1,
        initial_speckles: Some(SinSpecification::new(0.0, 5.0, Nanometers(20.0), 90.0)),
        path: Some(path.to_path_buf()),
        ..SpeckleNullingParams::default()
    }
}

#[tokio::test]
async fn speckle_nulling_digs_the_dark_zone() {
    let dir = tempfile::tempdir().unwrap();
    let testbed = simulated_testbed(dir.path());
    let run = dir.path().join("nulling");
    let mut experiment = SpeckleNulling::new(speckle_params(&run));

    let mut runner = ExperimentRunner::new(&testbed);
    let summary = runner.run(&mut experiment).await.unwrap();
    assert_eq!(summary.state, ExperimentState::Complete);
    assert_eq!(summary.output_path, run);
    assert_eq!(runner.state(), ExperimentState::Complete);

    let report = experiment.report().expect("report after a complete run");
    assert!(!report.iterations.is_empty() && report.iterations.len() <= 2);
    assert!(report.direct_peak > 0.0);

    let first = &report.iterations[0];
    assert!((first.ncycles - 5.0).abs() < 0.25, "ncycles = {}", first.ncycles);
    assert!(first.angle_deg.abs() < 1.0 || (first.angle_deg.abs() - 180.0).abs() < 1.0);
    assert!(
        (10.0..30.0).contains(&first.peak_to_valley_nm),
        "ptv = {}",
        first.peak_to_valley_nm
    );

    let initial = report.initial_mean_contrast().unwrap();
    assert!(
        report.final_mean_contrast < 0.5 * initial,
        "final {} vs initial {}",
        report.final_mean_contrast,
        initial
    );

    assert!(run.join("direct_reference").join("direct").join("direct_reference.csv").is_file());
    assert!(run.join("iteration0").join("coron").is_dir());
    assert!(run.join("iteration0").join("phase0").join("coron").is_dir());
    assert!(run.join("iteration0").join("phase330").join("coron").is_dir());
    assert!(run.join("iteration0").join("amplitude1.0").join("coron").is_dir());
    assert!(run.join("final").join("final_dark_zone.csv").is_file());
    assert!(run.join(SNAPSHOT_FILE).is_file());

    let log = std::fs::read_to_string(run.join(LOG_FILE)).unwrap();
    let lines: Vec<&str> = log.lines().collect();
    assert!(lines[0].starts_with("iteration,"));
    assert_eq!(lines.len(), report.iterations.len() + 2);
    assert!(lines.last().unwrap().starts_with("final,"));

    let metadata = RunMetadata::load(&run).unwrap();
    assert_eq!(metadata.state, ExperimentState::Complete);
    assert_eq!(metadata.experiment_name, "Speckle Nulling");
    assert_eq!(metadata.backend, "simulated");
    assert!(metadata.finished.is_some());
    assert_eq!(metadata.parameters["num_iterations"], 2);
}

#[tokio::test]
async fn failed_run_is_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let testbed = simulated_testbed(dir.path());
    let run = dir.path().join("broken");
    let mut experiment = SpeckleNulling::new(SpeckleNullingParams {
        dm_command_path: Some(dir.path().join("missing.txt")),
        ..speckle_params(&run)
    });

    let mut runner = ExperimentRunner::new(&testbed);
    let err = runner.run(&mut experiment).await.unwrap_err();
    assert!(format!("{err:#}").contains("Experiment 'Speckle Nulling' failed"));
    assert_eq!(runner.state(), ExperimentState::Error);
    assert!(experiment.report().is_none());

    let metadata = RunMetadata::load(&run).unwrap();
    assert_eq!(metadata.state, ExperimentState::Error);
    assert!(metadata.error.unwrap().contains("missing.txt"));

    // The same runner can start over once the failure is recorded.
    let mut again = SpeckleNulling::new(SpeckleNullingParams {
        num_iterations: 0,
        ..speckle_params(&dir.path().join("again"))
    });
    let summary = runner.run(&mut again).await.unwrap();
    assert_eq!(summary.state, ExperimentState::Complete);
    assert_eq!(runner.state(), ExperimentState::Complete);
}

#[tokio::test]
async fn timestamped_output_path_under_data_root() {
    let dir = tempfile::tempdir().unwrap();
    let testbed = simulated_testbed(dir.path());
    let mut experiment = SpeckleNulling::new(SpeckleNullingParams {
        path: None,
        suffix: Some("dark_hole".to_string()),
        num_iterations: 0,
        ..speckle_params(dir.path())
    });

    let summary = ExperimentRunner::new(&testbed)
        .run(&mut experiment)
        .await
        .unwrap();
    assert_eq!(summary.output_path.parent(), Some(dir.path()));
    let name = summary.output_path.file_name().unwrap().to_string_lossy();
    assert!(name.ends_with("_speckle_nulling_dark_hole"), "{name}");
    assert!(summary.output_path.join(METADATA_FILE).is_file());
}

#[tokio::test]
async fn sine_test_images_every_combination() {
    let dir = tempfile::tempdir().unwrap();
    let testbed = simulated_testbed(dir.path());
    let run = dir.path().join("sine");
    let mut experiment = SimpleSineTest::new(SimpleSineTestParams {
        cycles: vec![4.0],
        orientation_angles: vec![0.0, 90.0],
        phase_shifts: vec![0.0],
        exposure_time: None,
        num_exposures: 2,
        path: Some(run.clone()),
    });

    assert_ok!(ExperimentRunner::new(&testbed).run(&mut experiment).await);

    let base = run.join("x=0_y=0");
    let dirs = subdirectories(&base);
    assert_eq!(dirs.len(), 3, "{dirs:?}");
    assert!(dirs.iter().any(|d| d.ends_with("_both_dms_flat")));
    assert!(dirs
        .iter()
        .any(|d| d.ends_with("_ripple_test_cycl_4_ang_0_phase1_90_phase2_90")));
    assert!(dirs
        .iter()
        .any(|d| d.ends_with("_ripple_test_cycl_4_ang_90_phase1_90_phase2_90")));

    let flat = dirs.iter().find(|d| d.ends_with("_both_dms_flat")).unwrap();
    assert!(base.join(flat).join("coron").join("dms_flat.csv").is_file());

    let records = read_calibration_records(dir.path()).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].description, "Sine wave DM alignment data");
    assert_eq!(records[0].value, -1.0);
    assert_eq!(records[0].unit, "TBD");
}

#[tokio::test]
async fn coffee_takes_a_pair_per_focus_command() {
    let dir = tempfile::tempdir().unwrap();
    let focus = dir.path().join("focus");
    let n = 16;
    for (name, volts) in [("focus_1nm_p2v", 0.0), ("focus_2nm_p2v", 0.2)] {
        let command = Array2::from_elem((n, n), volts);
        save_matrix(&focus.join(name).join("dm2_command.txt"), &command).unwrap();
    }
    // Not a p2v directory.
    save_matrix(&focus.join("notes").join("other.txt"), &Array2::zeros((n, n))).unwrap();

    let mut config = test_config(dir.path());
    config.coffee.focus_commands_dir = Some(focus);
    let testbed = Testbed::simulated(config).unwrap();

    let run = dir.path().join("coffee");
    let mut experiment = CoffeeStrokeMin::new(CoffeeStrokeMinParams {
        path: Some(run.clone()),
        num_exposures: 1,
        coron_exp_time: Duration::from_millis(1),
        direct_exp_time: Duration::from_micros(100),
        centering: ImageCentering::Off,
        ..CoffeeStrokeMinParams::default()
    });
    assert_ok!(ExperimentRunner::new(&testbed).run(&mut experiment).await);

    let data_set = run.join("stroke_min");
    assert_eq!(
        subdirectories(&data_set),
        vec!["focus_1nm_p2v", "focus_2nm_p2v"]
    );
    for name in ["focus_1nm_p2v", "focus_2nm_p2v"] {
        for set in ["direct", "coron"] {
            let image = data_set.join(name).join(set).join(format!("{name}.csv"));
            assert!(image.is_file(), "missing {}", image.display());
        }
    }
}

#[tokio::test]
async fn coffee_without_focus_commands_fails() {
    let dir = tempfile::tempdir().unwrap();
    let testbed = simulated_testbed(dir.path());
    let mut experiment = CoffeeStrokeMin::new(CoffeeStrokeMinParams {
        path: Some(dir.path().join("coffee")),
        ..CoffeeStrokeMinParams::default()
    });
    let err = ExperimentRunner::new(&testbed)
        .run(&mut experiment)
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("focus_commands_dir"));
}

const SEGMENTS: usize = 37;

fn write_pastis_results(dir: &Path, c_target: f64) {
    let modes = Array2::from_shape_fn((SEGMENTS, SEGMENTS), |(r, c)| if r == c { 1.0 } else { 0.0 });
    save_matrix(&dir.join("pastis_modes.txt"), &modes).unwrap();
    save_vector(&dir.join("eigenvalues.txt"), &vec![1.0; SEGMENTS]).unwrap();
    save_vector(&dir.join(mode_requirements_file(c_target)), &vec![1.0; SEGMENTS]).unwrap();
}

fn pastis_params(results: &Path, run: &Path, c_target: f64) -> PastisModeAmplitudesParams {
    PastisModeAmplitudesParams {
        pastis_results_path: results.to_path_buf(),
        mode_number: 0,
        c_target,
        wfe_amplitudes: vec![1.0, 5.0, 20.0],
        num_exposures: 1,
        exposure_time_coron: Duration::from_millis(10),
        exposure_time_direct: Duration::from_micros(100),
        auto_expose: true,
        file_mode: true,
        raw_skip: 0,
        path: Some(run.to_path_buf()),
        suffix: None,
    }
}

#[tokio::test]
async fn pastis_contrast_grows_with_mode_amplitude() {
    let dir = tempfile::tempdir().unwrap();
    let results = dir.path().join("pastis");
    write_pastis_results(&results, 1e-10);
    let testbed = simulated_testbed(dir.path());
    let run = dir.path().join("scan");

    let mut experiment =
        PastisModeAmplitudes::new(pastis_params(&results, &run, 1e-10)).unwrap();
    assert_ok!(ExperimentRunner::new(&testbed).run(&mut experiment).await);

    assert_eq!(experiment.coronagraph_floor(), Some(0.0));
    let contrast = experiment.measured_contrast();
    assert_eq!(contrast.len(), 3);
    assert!(contrast[0] > 0.0);
    assert!(contrast[0] < contrast[1] && contrast[1] < contrast[2], "{contrast:?}");

    let readme = std::fs::read_to_string(run.join("_README.txt")).unwrap();
    assert!(readme.starts_with("pastis_results_path\t"), "{readme}");
    assert!(readme.contains("MODE_NUMBER\t"));
    assert!(run.join("scaled_mode_1e-10.svg").is_file());
    assert!(run.join("wfe_5.0nm").join("coron").join("coron.csv").is_file());
    let saved = load_vector(&run.join("scaled_mode_contrasts_1e-10.txt")).unwrap();
    assert_eq!(saved.len(), 3);
    let amplitudes = load_vector(&run.join("wfe_amplitudes_1e-10.txt")).unwrap();
    assert_eq!(amplitudes, vec![1.0, 5.0, 20.0]);
}

#[tokio::test]
async fn pastis_target_below_floor_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let results = dir.path().join("pastis");
    write_pastis_results(&results, -1.0);
    let testbed = simulated_testbed(dir.path());
    let run = dir.path().join("scan");

    let mut experiment =
        PastisModeAmplitudes::new(pastis_params(&results, &run, -1.0)).unwrap();
    let err = ExperimentRunner::new(&testbed)
        .run(&mut experiment)
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("Coronagraph floor"));
    assert!(!run.join("scaled_mode_-1.0.svg").exists());
    assert_eq!(
        RunMetadata::load(&run).unwrap().state,
        ExperimentState::Error
    );
}

#[tokio::test]
async fn every_dm1_dm2_combination_gets_an_image_pair() {
    let dir = tempfile::tempdir().unwrap();
    let testbed = simulated_testbed(dir.path());
    let n = 16;
    let commands = dir.path().join("commands");
    let file = |name: &str, volts: f64| {
        let path = commands.join(name);
        save_matrix(&path, &Array2::from_elem((n, n), volts)).unwrap();
        path
    };
    let dm1 = CommandList::Files {
        paths: vec![file("dm1_corr.v2.txt", 0.0), file("dm1_tilt.txt", 0.1)],
        flat_map: false,
    };
    let dm2 = CommandList::Files {
        paths: vec![file("focus_a.txt", 0.0), file("focus_b.final.txt", 0.2)],
        flat_map: false,
    };
    let settings = ExposurePair {
        coron_exposure_time: Duration::from_millis(1),
        direct_exposure_time: Duration::from_micros(100),
        num_exposures: 1,
        coron_centering: ImageCentering::Off,
    };

    let run = dir.path().join("both_dms");
    let results =
        take_exposures_both_dm_commands(&testbed, &dm2, &dm1, &run, "sweep", &settings)
            .await
            .unwrap();
    assert_eq!(results.len(), 4);

    let expected = vec![
        "dm1_dm1_corr_dm2_focus_a",
        "dm1_dm1_corr_dm2_focus_b",
        "dm1_dm1_tilt_dm2_focus_a",
        "dm1_dm1_tilt_dm2_focus_b",
    ];
    assert_eq!(subdirectories(&run.join("sweep")), expected);
    for name in expected {
        for set in ["direct", "coron"] {
            let image = run.join("sweep").join(name).join(set).join(format!("{name}.csv"));
            assert!(image.is_file(), "missing {}", image.display());
        }
    }
    for (direct, coron) in &results {
        assert!(direct.image.max() > coron.image.max());
    }
}

#[tokio::test]
async fn in_memory_commands_use_flat_names() {
    let dir = tempfile::tempdir().unwrap();
    let testbed = simulated_testbed(dir.path());
    let settings = ExposurePair {
        coron_exposure_time: Duration::from_millis(1),
        direct_exposure_time: Duration::from_micros(100),
        num_exposures: 1,
        coron_centering: ImageCentering::Off,
    };
    let run = dir.path().join("flats");
    let results = take_exposures_both_dm_commands(
        &testbed,
        &CommandList::Commands(vec![flat_with_map(&testbed, 2)]),
        &CommandList::Commands(vec![flat_with_map(&testbed, 1)]),
        &run,
        "baseline",
        &settings,
    )
    .await
    .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(subdirectories(&run.join("baseline")), vec!["dm1_flats_dm2_flat"]);
}
