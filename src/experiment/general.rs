//! Exposure helpers shared by experiments.
//!
//! These take care of laser current and DM shapes around [`run_imaging`]: the
//! laser is set to the current matching the FPM position and both DMs hold
//! their commands for the duration of the imaging run.

use super::with_suffix;
use crate::hardware::dm::{flat_command, DmCommand};
use crate::hardware::scoped;
use crate::imaging::{run_imaging, ImagingRequest, ImagingResult};
use crate::storage::create_data_path;
use crate::testbed::Testbed;
use crate::types::{FpmPosition, ImageCentering};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Default directory for [`take_exposures`] when the caller has none:
/// `<data_root>/<timestamp>_take_exposures_data[_suffix]`.
pub fn take_exposures_path(testbed: &Testbed, suffix: Option<&str>) -> Result<PathBuf> {
    Ok(create_data_path(
        testbed.data_root(),
        &with_suffix("take_exposures_data", suffix),
    )?)
}

/// Apply `dm1` and `dm2`, set the laser for the request's FPM position and run
/// one imaging request.
pub async fn take_exposures(
    testbed: &Testbed,
    dm1: &DmCommand,
    dm2: &DmCommand,
    request: &ImagingRequest,
) -> Result<ImagingResult> {
    let laser = testbed.laser();
    let dm = testbed.dm();
    let channel = testbed.laser_channel();
    let current = testbed.laser_current_for(request.fpm_position);

    scoped(laser, move || async move {
        laser.set_current(channel, current).await?;
        scoped(dm, move || async move {
            dm.apply_shape_to_both(dm1, dm2).await?;
            run_imaging(testbed, request).await
        })
        .await
    })
    .await
}

/// Exposure settings of a direct/coronagraphic image pair.
#[derive(Debug, Clone)]
pub struct ExposurePair {
    /// Starting coronagraphic exposure time
    pub coron_exposure_time: Duration,
    /// Starting direct exposure time
    pub direct_exposure_time: Duration,
    /// Exposures averaged per image
    pub num_exposures: usize,
    /// Centering of the coronagraphic images; direct images center on the PSF
    pub coron_centering: ImageCentering,
}

/// Direct then coronagraphic image under `<experiment_path>/{direct,coron}`.
async fn take_pair(
    testbed: &Testbed,
    dm1: &DmCommand,
    dm2: &DmCommand,
    experiment_path: &Path,
    filename: &str,
    settings: &ExposurePair,
) -> Result<(ImagingResult, ImagingResult)> {
    let direct = ImagingRequest::new(
        settings.direct_exposure_time,
        settings.num_exposures,
        FpmPosition::Direct,
        experiment_path,
    )
    .filename(filename)
    .exposure_set(FpmPosition::Direct.exposure_set_name())
    .centering(ImageCentering::Psf);
    let direct = take_exposures(testbed, dm1, dm2, &direct).await?;

    let coron = ImagingRequest::new(
        settings.coron_exposure_time,
        settings.num_exposures,
        FpmPosition::Coron,
        experiment_path,
    )
    .filename(filename)
    .exposure_set(FpmPosition::Coron.exposure_set_name())
    .centering(settings.coron_centering);
    let coron = take_exposures(testbed, dm1, dm2, &coron).await?;

    Ok((direct, coron))
}

/// Name of a COFFEE DM2 command: its parent directory (`.../focus_2nm_p2v/cmd.fits`
/// gives `focus_2nm_p2v`).
fn coffee_command_name(command: &Path) -> String {
    command
        .parent()
        .and_then(|dir| dir.file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "command".to_string())
}

/// COFFEE data set: for every DM2 command file, a direct and a coronagraphic
/// image with `dm1` applied, under `<path>/<exp_set_name>/<command dir name>`.
///
/// DM2 commands are loaded as volts without bias or flat map.
pub async fn take_coffee_data_set(
    testbed: &Testbed,
    dm2_commands: &[PathBuf],
    path: &Path,
    exp_set_name: &str,
    dm1: &DmCommand,
    settings: &ExposurePair,
) -> Result<Vec<(ImagingResult, ImagingResult)>> {
    let mut results = Vec::with_capacity(dm2_commands.len());
    for command in dm2_commands {
        let dm2 = DmCommand::load(command, 2, false, false, true)
            .with_context(|| format!("Failed to load DM2 command '{}'", command.display()))?;
        let filename = coffee_command_name(command);
        let experiment_path = path.join(exp_set_name).join(&filename);
        info!(command = %filename, "Taking COFFEE image pair");
        results.push(take_pair(testbed, dm1, &dm2, &experiment_path, &filename, settings).await?);
    }
    Ok(results)
}

/// DM commands to iterate over in [`take_exposures_both_dm_commands`].
#[derive(Debug, Clone)]
pub enum CommandList {
    /// Command files, loaded as volts without bias
    Files {
        /// Command files in iteration order
        paths: Vec<PathBuf>,
        /// Add the DM flat map
        flat_map: bool,
    },
    /// Commands already in memory
    Commands(Vec<DmCommand>),
}

impl CommandList {
    /// Commands paired with the name used in output paths. In-memory commands
    /// are all named `unnamed`.
    fn resolve(&self, dm_num: u8, unnamed: &str) -> Result<Vec<(DmCommand, String)>> {
        match self {
            CommandList::Files { paths, flat_map } => paths
                .iter()
                .map(|path| {
                    let command = DmCommand::load(path, dm_num, false, *flat_map, true)
                        .with_context(|| {
                            format!("Failed to load DM{} command '{}'", dm_num, path.display())
                        })?;
                    Ok((command, file_stem(path)))
                })
                .collect(),
            CommandList::Commands(commands) => Ok(commands
                .iter()
                .cloned()
                .map(|command| (command, unnamed.to_string()))
                .collect()),
        }
    }
}

/// File name up to the first dot.
fn file_stem(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy())
        .and_then(|name| name.split('.').next().map(str::to_string))
        .unwrap_or_default()
}

/// Image pairs for every combination of a DM1 and a DM2 command, under
/// `<path>/<exp_set_name>/dm1_<name1>_dm2_<name2>`.
pub async fn take_exposures_both_dm_commands(
    testbed: &Testbed,
    dm2_commands: &CommandList,
    dm1_commands: &CommandList,
    path: &Path,
    exp_set_name: &str,
    settings: &ExposurePair,
) -> Result<Vec<(ImagingResult, ImagingResult)>> {
    let dm1_commands = dm1_commands.resolve(1, "flats")?;
    let dm2_commands = dm2_commands.resolve(2, "flat")?;

    let mut results = Vec::with_capacity(dm1_commands.len() * dm2_commands.len());
    for (dm1, name1) in &dm1_commands {
        for (dm2, name2) in &dm2_commands {
            let name = format!("dm1_{name1}_dm2_{name2}");
            let experiment_path = path.join(exp_set_name).join(&name);
            results.push(take_pair(testbed, dm1, dm2, &experiment_path, &name, settings).await?);
        }
    }
    Ok(results)
}

/// Flat DM command with the flat map applied.
pub fn flat_with_map(testbed: &Testbed, dm_num: u8) -> DmCommand {
    flat_command(testbed.config().dm.actuators_across, dm_num, false, true).0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coffee_commands_are_named_after_their_directory() {
        let path = Path::new("/data/focus/focus_5nm_p2v/dm2_command.fits");
        assert_eq!(coffee_command_name(path), "focus_5nm_p2v");
    }

    #[test]
    fn file_stem_stops_at_first_dot() {
        assert_eq!(file_stem(Path::new("/a/b/dm1_corr.v2.txt")), "dm1_corr");
        assert_eq!(file_stem(Path::new("command.fits")), "command");
    }
}
