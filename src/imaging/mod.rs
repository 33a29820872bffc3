//! Image acquisition pipeline.
//!
//! [`run_imaging`] takes one processed image: it moves the FPM and Lyot stop,
//! optionally searches for an exposure time, averages a set of frames, subtracts
//! a background taken with the beam dump in, recenters and writes the result
//! (plus a subset of the raw frames) under
//! `<path>/<exposure_set_name>/<filename>`.

pub mod auto_exposure;
pub mod centering;
pub mod dark_zone;

pub use auto_exposure::AutoExposure;
pub use dark_zone::DarkZone;

use crate::error::DaqError;
use crate::hardware::frame::Frame;
use crate::hardware::scoped;
use crate::storage::{strip_frame_extension, FrameHeader, EXPTIME};
use crate::testbed::Testbed;
use crate::types::{FpmPosition, ImageCentering, LyotStopPosition};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Parameters of one imaging run.
#[derive(Debug, Clone)]
pub struct ImagingRequest {
    /// Starting exposure time
    pub exposure_time: Duration,
    /// Frames averaged
    pub num_exposures: usize,
    /// FPM position for the exposures
    pub fpm_position: FpmPosition,
    /// Lyot stop position for the exposures
    pub lyot_stop_position: LyotStopPosition,
    /// Output directory
    pub path: PathBuf,
    /// Sub-directory under `path`, e.g. `coron`
    pub exposure_set_name: String,
    /// Processed image file name without extension
    pub filename: String,
    /// Search for an exposure time starting at `exposure_time`
    pub auto_expose: bool,
    /// Radius in lambda/D the auto exposure peak search is restricted to
    pub auto_exposure_mask_size: Option<f64>,
    /// Image centering
    pub centering: ImageCentering,
    /// Write the processed and raw frames to disk
    pub file_mode: bool,
    /// Raw frames skipped after each one written
    pub raw_skip: usize,
    /// Subtract frames taken with the beam dump in
    pub take_background: bool,
    /// Reuse an existing processed image instead of acquiring
    pub resume: bool,
    /// Extra header cards for the processed image
    pub header: FrameHeader,
}

impl ImagingRequest {
    /// Request with auto exposure on and everything else off.
    pub fn new(
        exposure_time: Duration,
        num_exposures: usize,
        fpm_position: FpmPosition,
        path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            exposure_time,
            num_exposures,
            fpm_position,
            lyot_stop_position: LyotStopPosition::InBeam,
            path: path.into(),
            exposure_set_name: fpm_position.exposure_set_name().to_string(),
            filename: "image".to_string(),
            auto_expose: true,
            auto_exposure_mask_size: None,
            centering: ImageCentering::Auto,
            file_mode: true,
            raw_skip: 0,
            take_background: false,
            resume: false,
            header: FrameHeader::new(),
        }
    }

    /// Lyot stop position.
    pub fn lyot_stop(mut self, position: LyotStopPosition) -> Self {
        self.lyot_stop_position = position;
        self
    }

    /// Exposure set sub-directory.
    pub fn exposure_set(mut self, name: impl Into<String>) -> Self {
        self.exposure_set_name = name.into();
        self
    }

    /// Processed image file name.
    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = filename.into();
        self
    }

    /// Run the exposure search first.
    pub fn auto_expose(mut self, enabled: bool) -> Self {
        self.auto_expose = enabled;
        self
    }

    /// Restrict the auto exposure peak search to a circle.
    pub fn auto_exposure_mask_size(mut self, radius_lambda_over_d: f64) -> Self {
        self.auto_exposure_mask_size = Some(radius_lambda_over_d);
        self
    }

    /// Image centering.
    pub fn centering(mut self, centering: ImageCentering) -> Self {
        self.centering = centering;
        self
    }

    /// Save raw and processed frames.
    pub fn file_mode(mut self, enabled: bool) -> Self {
        self.file_mode = enabled;
        self
    }

    /// Save one raw frame, then skip `raw_skip`.
    pub fn raw_skip(mut self, raw_skip: usize) -> Self {
        self.raw_skip = raw_skip;
        self
    }

    /// Subtract frames taken with the beam dump in.
    pub fn take_background(mut self, enabled: bool) -> Self {
        self.take_background = enabled;
        self
    }

    /// Reuse an existing processed image.
    pub fn resume(mut self, enabled: bool) -> Self {
        self.resume = enabled;
        self
    }

    /// Extra card for the processed image header.
    pub fn header_card(mut self, key: &str, value: impl ToString) -> Self {
        self.header.push(key, value);
        self
    }

    /// Processed image path without extension.
    pub fn output_stem(&self) -> PathBuf {
        self.path
            .join(&self.exposure_set_name)
            .join(strip_frame_extension(&self.filename))
    }

    fn raw_stem(&self, index: usize) -> PathBuf {
        self.path
            .join(&self.exposure_set_name)
            .join("raw")
            .join(format!("{}_frame{index:04}", strip_frame_extension(&self.filename)))
    }

    /// Whether raw frame `index` is written.
    pub fn keeps_raw_frame(&self, index: usize) -> bool {
        index % (self.raw_skip.saturating_add(1)) == 0
    }
}

/// Output of [`run_imaging`].
#[derive(Debug, Clone)]
pub struct ImagingResult {
    /// Averaged, background subtracted and recentered image
    pub image: Frame,
    /// Exposure time the frames were taken at
    pub exposure_time: Duration,
    /// Processed image file, when written
    pub saved_path: Option<PathBuf>,
}

/// Take one processed image.
pub async fn run_imaging(testbed: &Testbed, request: &ImagingRequest) -> Result<ImagingResult> {
    if request.num_exposures == 0 {
        return Err(DaqError::Instrument("num_exposures must be at least 1".to_string()).into());
    }
    let writer = testbed.frame_writer();
    let stem = request.output_stem();
    let output = writer.output_path(&stem);

    if request.resume && output.exists() {
        let (image, _) = writer.read(&output)?;
        info!(path = %output.display(), "Resuming from existing image");
        return Ok(ImagingResult {
            exposure_time: image.exposure,
            image,
            saved_path: Some(output),
        });
    }

    testbed.move_fpm(request.fpm_position).await?;
    testbed.move_lyot_stop(request.lyot_stop_position).await?;

    let camera = testbed.camera();
    let (frames, background, exposure_time) = scoped(camera, move || async move {
        let exposure_time = if request.auto_expose {
            let settings = AutoExposure::from_config(&testbed.config().camera);
            let ppld = testbed.config().camera.pixels_per_lambda_over_d;
            let mask_size = request.auto_exposure_mask_size;
            let peak = move |frame: &Frame| match mask_size {
                Some(radius) => DarkZone::circle(frame.shape(), radius, ppld).max(&frame.data),
                None => frame.max(),
            };
            settings
                .tune(camera, request.exposure_time, peak)
                .await
                .context("Auto exposure failed")?
        } else {
            request.exposure_time
        };
        camera.set_exposure(exposure_time).await?;

        let frames = acquire_frames(testbed, request, exposure_time).await?;
        let background = if request.take_background {
            take_background(testbed, request.num_exposures).await?
        } else {
            None
        };
        Ok((frames, background, exposure_time))
    })
    .await?;

    let mut image = Frame::average(&frames).ok_or_else(|| {
        DaqError::Processing("Frames of one exposure set differ in shape".to_string())
    })?;
    if let Some(background) = &background {
        if background.shape() == image.shape() {
            image.data -= &background.data;
        } else {
            warn!("Background shape differs from image shape; not subtracted");
        }
    }
    let (data, shift) = centering::recenter(image.data, request.centering, request.fpm_position);
    image.data = data;

    let saved_path = if request.file_mode {
        let mut header = FrameHeader::for_frame(&image)
            .with("NEXPS", request.num_exposures)
            .with("FPM", request.fpm_position)
            .with("LYOTSTOP", request.lyot_stop_position)
            .with("CENTERNG", request.centering)
            .with("SHIFTROW", shift.0)
            .with("SHIFTCOL", shift.1)
            .with("BKGSUB", background.is_some());
        for (key, value) in request.header.cards() {
            header.push(key, value);
        }
        create_parent(&stem)?;
        Some(writer.write(&stem, &image, &header)?)
    } else {
        None
    };

    info!(
        exposure_set = %request.exposure_set_name,
        filename = %request.filename,
        ?exposure_time,
        frames = frames.len(),
        "Imaging complete"
    );
    Ok(ImagingResult {
        image,
        exposure_time,
        saved_path,
    })
}

async fn acquire_frames(
    testbed: &Testbed,
    request: &ImagingRequest,
    exposure_time: Duration,
) -> Result<Vec<Frame>> {
    let camera = testbed.camera();
    let writer = testbed.frame_writer();
    let mut frames = Vec::with_capacity(request.num_exposures);
    for index in 0..request.num_exposures {
        let frame = camera.acquire().await?;
        if request.file_mode && request.keeps_raw_frame(index) {
            let stem = request.raw_stem(index);
            create_parent(&stem)?;
            let header = FrameHeader::for_frame(&frame)
                .with("FRAMENUM", index)
                .with(EXPTIME, exposure_time.as_secs_f64());
            writer.write(&stem, &frame, &header)?;
        }
        frames.push(frame);
    }
    Ok(frames)
}

/// Average of `count` frames with the beam dump in; `None` without a beam dump.
async fn take_background(testbed: &Testbed, count: usize) -> Result<Option<Frame>> {
    if !testbed.has_beam_dump() {
        warn!("No beam dump stage configured; skipping background");
        return Ok(None);
    }
    testbed.move_beam_dump(true).await?;
    let mut frames = Vec::with_capacity(count);
    let mut outcome = Ok(());
    for _ in 0..count {
        match testbed.camera().acquire().await {
            Ok(frame) => frames.push(frame),
            Err(err) => {
                outcome = Err(err);
                break;
            }
        }
    }
    testbed.move_beam_dump(false).await?;
    outcome?;
    Ok(Frame::average(&frames))
}

fn create_parent(stem: &Path) -> Result<()> {
    if let Some(parent) = stem.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create '{}'", parent.display()))?;
    }
    Ok(())
}
