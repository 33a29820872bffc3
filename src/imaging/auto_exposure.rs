//! Automatic exposure time search.
//!
//! Starting from a guess, the exposure is halved while the brightest pixel of
//! the evaluated region is above the high threshold and doubled while it is below
//! the low threshold, within the camera's exposure limits.

use crate::config::CameraConfig;
use crate::hardware::capabilities::Camera;
use crate::hardware::frame::Frame;
use anyhow::Result;
use std::time::Duration;
use tracing::{debug, warn};

/// Thresholds and limits of the search.
#[derive(Debug, Clone, PartialEq)]
pub struct AutoExposure {
    /// Counts the high and low fractions refer to
    pub full_scale: f64,
    /// Halve at or above this fraction of full scale
    pub high_fraction: f64,
    /// Double below this fraction of full scale
    pub low_fraction: f64,
    /// Exposure changes tried before giving up
    pub max_attempts: u32,
    /// Shortest exposure tried
    pub min_exposure: Duration,
    /// Longest exposure tried
    pub max_exposure: Duration,
}

impl AutoExposure {
    /// Settings from the camera configuration.
    pub fn from_config(camera: &CameraConfig) -> Self {
        Self {
            full_scale: camera.saturation_counts,
            high_fraction: camera.auto_exposure.high_fraction,
            low_fraction: camera.auto_exposure.low_fraction,
            max_attempts: camera.auto_exposure.max_attempts,
            min_exposure: camera.min_exposure,
            max_exposure: camera.max_exposure,
        }
    }

    /// Keep the peak `headroom` times below the usual thresholds.
    pub fn with_headroom(mut self, headroom: f64) -> Self {
        if headroom > 0.0 {
            self.full_scale /= headroom;
        }
        self
    }

    fn clamp(&self, exposure: Duration) -> Duration {
        exposure.clamp(self.min_exposure, self.max_exposure)
    }

    /// Search for an exposure time on an open camera. `peak` measures the
    /// brightness of a frame, e.g. [`Frame::max`] or the maximum over a
    /// [`DarkZone`](crate::imaging::DarkZone).
    ///
    /// The camera is left at the returned exposure time.
    pub async fn tune<F>(&self, camera: &dyn Camera, start: Duration, peak: F) -> Result<Duration>
    where
        F: Fn(&Frame) -> f64,
    {
        let high = self.high_fraction * self.full_scale;
        let low = self.low_fraction * self.full_scale;
        let mut exposure = self.clamp(start);

        for attempt in 1..=self.max_attempts {
            camera.set_exposure(exposure).await?;
            let frame = camera.acquire().await?;
            let peak = peak(&frame);
            debug!(attempt, ?exposure, peak, "Auto exposure");

            let next = if peak >= high {
                self.clamp(exposure / 2)
            } else if peak < low {
                self.clamp(exposure * 2)
            } else {
                return Ok(exposure);
            };
            if next == exposure {
                debug!(?exposure, peak, "Auto exposure hit the exposure limit");
                return Ok(exposure);
            }
            exposure = next;
        }

        warn!(
            ?exposure,
            attempts = self.max_attempts,
            "Auto exposure did not converge; using last exposure time"
        );
        camera.set_exposure(exposure).await?;
        Ok(exposure)
    }
}
