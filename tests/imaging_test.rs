//! Processed image acquisition against the simulated testbed.

mod common;

use common::{simulated_testbed, with_laser};
use hcit_daq::imaging::{run_imaging, ImagingRequest};
use hcit_daq::storage::EXPTIME;
use hcit_daq::types::{FpmPosition, ImageCentering};
use std::time::Duration;
use tokio_test::assert_err;

fn direct_request(path: &std::path::Path) -> ImagingRequest {
    ImagingRequest::new(Duration::from_micros(500), 3, FpmPosition::Direct, path)
        .filename("psf")
        .auto_expose(false)
}

#[tokio::test]
async fn direct_image_is_written_and_centered() {
    let dir = tempfile::tempdir().unwrap();
    let testbed = simulated_testbed(dir.path());
    let request = direct_request(&dir.path().join("run"));

    let result = with_laser(&testbed, FpmPosition::Direct, || async {
        run_imaging(&testbed, &request).await
    })
    .await;

    let ((row, col), peak) = result.image.argmax();
    assert_eq!((row, col), (32, 32));
    assert!((peak - 25000.0).abs() < 1.0, "peak = {peak}");
    assert_eq!(result.exposure_time, Duration::from_micros(500));

    let saved = result.saved_path.expect("processed image path");
    assert!(saved.ends_with("run/direct/psf.csv"));
    let (frame, header) = testbed.frame_writer().read(&saved).unwrap();
    assert_eq!(frame.shape(), (64, 64));
    assert_eq!(header.get("FPM"), Some("direct"));
    assert_eq!(header.get("NEXPS"), Some("3"));
    assert_eq!(header.get("BKGSUB"), Some("false"));
    assert_eq!(header.get(EXPTIME), Some("0.0005"));
}

#[tokio::test]
async fn raw_frames_are_thinned_by_raw_skip() {
    let dir = tempfile::tempdir().unwrap();
    let testbed = simulated_testbed(dir.path());
    let request = ImagingRequest::new(
        Duration::from_micros(500),
        5,
        FpmPosition::Direct,
        dir.path().join("run"),
    )
    .auto_expose(false)
    .raw_skip(2);

    with_laser(&testbed, FpmPosition::Direct, || async {
        run_imaging(&testbed, &request).await
    })
    .await;

    let raw_dir = dir.path().join("run").join("direct").join("raw");
    let mut raw: Vec<String> = std::fs::read_dir(&raw_dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    raw.sort();
    assert_eq!(raw, vec!["image_frame0000.csv", "image_frame0003.csv"]);
}

#[tokio::test]
async fn file_mode_off_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let testbed = simulated_testbed(dir.path());
    let request = direct_request(&dir.path().join("run")).file_mode(false);

    let result = with_laser(&testbed, FpmPosition::Direct, || async {
        run_imaging(&testbed, &request).await
    })
    .await;

    assert!(result.saved_path.is_none());
    assert!(!dir.path().join("run").exists());
}

#[tokio::test]
async fn resume_reuses_existing_image() {
    let dir = tempfile::tempdir().unwrap();
    let testbed = simulated_testbed(dir.path());
    let camera = testbed.simulation().unwrap().camera.clone();
    let request = direct_request(&dir.path().join("run"));

    let first = with_laser(&testbed, FpmPosition::Direct, || async {
        run_imaging(&testbed, &request).await
    })
    .await;
    let frames_taken = camera.frame_count();

    let resumed = run_imaging(&testbed, &request.clone().resume(true))
        .await
        .unwrap();
    assert_eq!(camera.frame_count(), frames_taken);
    assert_eq!(resumed.saved_path, first.saved_path);
    assert_eq!(resumed.image.max(), first.image.max());
}

#[tokio::test]
async fn background_is_taken_with_beam_dump_in() {
    let dir = tempfile::tempdir().unwrap();
    let testbed = simulated_testbed(dir.path());
    let request = direct_request(&dir.path().join("run")).take_background(true);

    let result = with_laser(&testbed, FpmPosition::Direct, || async {
        run_imaging(&testbed, &request).await
    })
    .await;

    // The background is dark, so the PSF survives the subtraction.
    assert!((result.image.max() - 25000.0).abs() < 1.0);
    let (_, header) = testbed
        .frame_writer()
        .read(result.saved_path.as_ref().unwrap())
        .unwrap();
    assert_eq!(header.get("BKGSUB"), Some("true"));

    let ximc = &testbed.simulation().unwrap().ximc;
    assert_eq!(ximc.axis_steps("xi-emu:///dump"), Some(0.0));
}

#[tokio::test]
async fn auto_exposure_backs_off_from_saturation() {
    let dir = tempfile::tempdir().unwrap();
    let testbed = simulated_testbed(dir.path());
    let request = ImagingRequest::new(
        Duration::from_millis(10),
        1,
        FpmPosition::Direct,
        dir.path().join("run"),
    )
    .centering(ImageCentering::Psf)
    .file_mode(false);

    let result = with_laser(&testbed, FpmPosition::Direct, || async {
        run_imaging(&testbed, &request).await
    })
    .await;

    // 50000 counts/ms halved from 10 ms until the peak is below 80 % of full scale.
    assert_eq!(result.exposure_time, Duration::from_micros(625));
    let saturation = testbed.config().camera.saturation_counts;
    assert!(result.image.max() < 0.8 * saturation);
    assert!(result.image.max() > 0.3 * saturation);
}

#[tokio::test]
async fn zero_exposures_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let testbed = simulated_testbed(dir.path());
    let request = ImagingRequest::new(
        Duration::from_millis(1),
        0,
        FpmPosition::Direct,
        dir.path().join("run"),
    );
    assert_err!(run_imaging(&testbed, &request).await);
}
