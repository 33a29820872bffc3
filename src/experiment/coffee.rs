//! COFFEE data set on top of a stroke-minimization DM1 correction.

use super::general::{flat_with_map, take_coffee_data_set, ExposurePair};
use super::{Experiment, ExperimentContext};
use crate::error::DaqError;
use crate::hardware::dm::DmCommand;
use crate::types::ImageCentering;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Data set name under the output directory.
const DATA_SET_NAME: &str = "stroke_min";

/// Parameters of [`CoffeeStrokeMin`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoffeeStrokeMinParams {
    /// Output directory; timestamped under the data root when unset
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// DM1 correction (nm, flat map applied); flat DM1 when unset
    #[serde(default)]
    pub path_dm1_corr: Option<PathBuf>,
    /// Exposures averaged per image
    pub num_exposures: usize,
    /// Coronagraphic exposure time
    #[serde(with = "humantime_serde")]
    pub coron_exp_time: Duration,
    /// Direct exposure time
    #[serde(with = "humantime_serde")]
    pub direct_exp_time: Duration,
    /// Centering of coronagraphic images
    pub centering: ImageCentering,
}

impl Default for CoffeeStrokeMinParams {
    fn default() -> Self {
        Self {
            path: None,
            path_dm1_corr: None,
            num_exposures: 10,
            coron_exp_time: Duration::from_millis(100),
            direct_exp_time: Duration::from_millis(1),
            centering: ImageCentering::CustomApodizerSpots,
        }
    }
}

/// Applies a DM1 correction and takes a direct/coronagraphic image pair for
/// every DM2 focus command found under `coffee.focus_commands_dir/*p2v/`.
pub struct CoffeeStrokeMin {
    params: CoffeeStrokeMinParams,
}

impl CoffeeStrokeMin {
    /// Experiment with the given parameters.
    pub fn new(params: CoffeeStrokeMinParams) -> Self {
        Self { params }
    }
}

/// Command files (`.fits` or text matrices) in every `*p2v` directory below
/// `root`, sorted.
pub fn focus_command_paths(root: &Path) -> Result<Vec<PathBuf>> {
    let read_dir = |dir: &Path| {
        std::fs::read_dir(dir).with_context(|| format!("Failed to list '{}'", dir.display()))
    };

    let mut commands = Vec::new();
    for entry in read_dir(root)? {
        let dir = entry?.path();
        let is_p2v = dir
            .file_name()
            .map(|name| name.to_string_lossy().ends_with("p2v"))
            .unwrap_or(false);
        if !dir.is_dir() || !is_p2v {
            continue;
        }
        for file in read_dir(&dir)? {
            let file = file?.path();
            let is_command = file
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case("fits") || ext.eq_ignore_ascii_case("txt"))
                .unwrap_or(false);
            if file.is_file() && is_command {
                commands.push(file);
            }
        }
    }
    commands.sort();
    Ok(commands)
}

#[async_trait]
impl Experiment for CoffeeStrokeMin {
    fn name(&self) -> &str {
        "Coffee Stroke Min"
    }

    fn suffix(&self) -> String {
        "coffee_strokemin".to_string()
    }

    fn output_path(&self) -> Option<PathBuf> {
        self.params.path.clone()
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::to_value(&self.params).unwrap_or_default()
    }

    async fn experiment(&mut self, ctx: &ExperimentContext<'_>) -> Result<()> {
        let testbed = ctx.testbed;
        let focus_dir = testbed
            .config()
            .coffee
            .focus_commands_dir
            .as_deref()
            .ok_or_else(|| {
                DaqError::Configuration("coffee.focus_commands_dir is not set".to_string())
            })?;
        let commands = focus_command_paths(focus_dir)?;
        if commands.is_empty() {
            return Err(DaqError::Configuration(format!(
                "No focus commands found under '{}'",
                focus_dir.display()
            ))
            .into());
        }

        let dm1 = match &self.params.path_dm1_corr {
            Some(path) => DmCommand::load(path, 1, false, true, false)
                .with_context(|| format!("Failed to load DM1 correction '{}'", path.display()))?,
            None => flat_with_map(testbed, 1),
        };

        let settings = ExposurePair {
            coron_exposure_time: self.params.coron_exp_time,
            direct_exposure_time: self.params.direct_exp_time,
            num_exposures: self.params.num_exposures,
            coron_centering: self.params.centering,
        };
        info!(commands = commands.len(), "Taking COFFEE data set");
        take_coffee_data_set(
            testbed,
            &commands,
            ctx.output_path(),
            DATA_SET_NAME,
            &dm1,
            &settings,
        )
        .await?;
        Ok(())
    }
}
