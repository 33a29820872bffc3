//! CLI Entry Point for hcit-daq
//!
//! Runs testbed experiments and drives single instruments:
//!
//! ```bash
//! hcit-daq speckle-nulling --iterations 5
//! hcit-daq sine-test --cycles 10,12 --angles 0,45 --phase-shifts 0,90
//! hcit-daq stage move fpm coron
//! hcit-daq laser set-current 40
//! ```

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use hcit_daq::config::TestbedConfig;
use hcit_daq::experiment::{
    CoffeeStrokeMin, CoffeeStrokeMinParams, Experiment, ExperimentRunner, PastisModeAmplitudes,
    PastisModeAmplitudesParams, SimpleSineTest, SimpleSineTestParams, SpeckleNulling,
    SpeckleNullingParams,
};
use hcit_daq::hardware::scoped;
use hcit_daq::logging;
use hcit_daq::testbed::{laser_from_config, stage_from_config, Testbed};
use hcit_daq::types::{FpmPosition, ImageCentering};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "hcit-daq")]
#[command(about = "High-contrast imaging testbed control", long_about = None)]
struct Cli {
    /// Testbed configuration file (default: config/testbed.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the configured log level
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Iterative speckle nulling on DM1
    SpeckleNulling {
        #[arg(long, default_value_t = 10)]
        iterations: usize,
        /// Starting exposure time, e.g. 100ms
        #[arg(long, default_value = "100ms", value_parser = parse_duration)]
        exposure_time: Duration,
        #[arg(long, default_value_t = 3)]
        num_exposures: usize,
        /// Initial DM1 command file
        #[arg(long)]
        dm_command: Option<PathBuf>,
        /// Start from a flat DM1 instead of the default injected speckles
        #[arg(long)]
        no_initial_speckles: bool,
        /// Image with the FPM at `coron` or `direct`
        #[arg(long, default_value = "coron", value_parser = parse_fpm)]
        fpm: FpmPosition,
        #[arg(long)]
        suffix: Option<String>,
        #[arg(long)]
        path: Option<PathBuf>,
        #[arg(long, default_value_t = 0)]
        raw_skip: usize,
    },

    /// Same sine wave on both DMs to check their alignment
    SineTest {
        #[arg(long, value_delimiter = ',', required = true)]
        cycles: Vec<f64>,
        #[arg(long, value_delimiter = ',', required = true)]
        angles: Vec<f64>,
        #[arg(long, value_delimiter = ',', required = true)]
        phase_shifts: Vec<f64>,
        /// Fixed exposure time; auto exposure when omitted
        #[arg(long, value_parser = parse_duration)]
        exposure_time: Option<Duration>,
        #[arg(long, default_value_t = 20)]
        num_exposures: usize,
    },

    /// COFFEE data set with a DM1 correction applied
    CoffeeStrokeMin {
        #[arg(long)]
        path: Option<PathBuf>,
        #[arg(long)]
        dm1_correction: Option<PathBuf>,
        #[arg(long, default_value_t = 10)]
        num_exposures: usize,
        #[arg(long, default_value = "100ms", value_parser = parse_duration)]
        coron_exp_time: Duration,
        #[arg(long, default_value = "1ms", value_parser = parse_duration)]
        direct_exp_time: Duration,
    },

    /// Scale one PASTIS mode and measure the dark zone contrast
    PastisModeAmplitudes {
        #[arg(long)]
        results_path: PathBuf,
        #[arg(long)]
        mode_number: usize,
        #[arg(long)]
        c_target: f64,
        /// WFE rms amplitudes in nm
        #[arg(long, value_delimiter = ',', required = true)]
        wfe_amplitudes: Vec<f64>,
        #[arg(long, default_value_t = 5)]
        num_exposures: usize,
        #[arg(long, default_value = "100ms", value_parser = parse_duration)]
        coron_exp_time: Duration,
        #[arg(long, default_value = "1ms", value_parser = parse_duration)]
        direct_exp_time: Duration,
        #[arg(long)]
        no_auto_expose: bool,
        #[arg(long, default_value_t = 0)]
        raw_skip: usize,
    },

    /// Single stage control
    Stage {
        #[command(subcommand)]
        action: StageAction,
    },

    /// Laser source control
    Laser {
        #[command(subcommand)]
        action: LaserAction,
    },
}

#[derive(Subcommand)]
enum StageAction {
    /// Home the stage
    Home { id: String },
    /// Move to a named position or a value in the stage's units
    Move { id: String, position: String },
    /// Print the current position
    Position { id: String },
}

#[derive(Subcommand)]
enum LaserAction {
    /// Set the source current in mA
    SetCurrent {
        milliamps: f64,
        #[arg(long)]
        channel: Option<u8>,
    },
}

fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime_serde::re::humantime::parse_duration(value).map_err(|e| e.to_string())
}

fn parse_fpm(value: &str) -> Result<FpmPosition, String> {
    match value {
        "coron" => Ok(FpmPosition::Coron),
        "direct" => Ok(FpmPosition::Direct),
        other => Err(format!("unknown FPM position '{other}' (coron or direct)")),
    }
}

fn load_config(cli: &Cli) -> Result<TestbedConfig> {
    let mut config = match &cli.config {
        Some(path) => TestbedConfig::load_from(path)?,
        None => TestbedConfig::load()?,
    };
    if let Some(level) = &cli.log_level {
        config.application.log_level = level.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli).context("Failed to load testbed configuration")?;
    logging::init_from_config(&config).map_err(|e| anyhow!(e))?;
    info!(testbed = %config.application.name, backend = %config.application.backend, "hcit-daq starting");

    match cli.command {
        Commands::Stage { action } => run_stage(&config, action).await,
        Commands::Laser { action } => run_laser(&config, action).await,
        command => {
            let mut experiment = build_experiment(command)?;
            let testbed = Testbed::from_config(config)?;
            let summary = ExperimentRunner::new(&testbed)
                .run(experiment.as_mut())
                .await?;
            println!(
                "{} finished: {}",
                summary.experiment_name,
                summary.output_path.display()
            );
            Ok(())
        }
    }
}

fn build_experiment(command: Commands) -> Result<Box<dyn Experiment>> {
    let experiment: Box<dyn Experiment> = match command {
        Commands::SpeckleNulling {
            iterations,
            exposure_time,
            num_exposures,
            dm_command,
            no_initial_speckles,
            fpm,
            suffix,
            path,
            raw_skip,
        } => {
            let defaults = SpeckleNullingParams::default();
            Box::new(SpeckleNulling::new(SpeckleNullingParams {
                num_iterations: iterations,
                exposure_time,
                num_exposures,
                dm_command_path: dm_command,
                initial_speckles: if no_initial_speckles {
                    None
                } else {
                    defaults.initial_speckles
                },
                fpm_position: fpm,
                suffix,
                path,
                raw_skip,
                ..defaults
            }))
        }
        Commands::SineTest {
            cycles,
            angles,
            phase_shifts,
            exposure_time,
            num_exposures,
        } => Box::new(SimpleSineTest::new(SimpleSineTestParams {
            cycles,
            orientation_angles: angles,
            phase_shifts,
            exposure_time,
            num_exposures,
            path: None,
        })),
        Commands::CoffeeStrokeMin {
            path,
            dm1_correction,
            num_exposures,
            coron_exp_time,
            direct_exp_time,
        } => Box::new(CoffeeStrokeMin::new(CoffeeStrokeMinParams {
            path,
            path_dm1_corr: dm1_correction,
            num_exposures,
            coron_exp_time,
            direct_exp_time,
            centering: ImageCentering::CustomApodizerSpots,
        })),
        Commands::PastisModeAmplitudes {
            results_path,
            mode_number,
            c_target,
            wfe_amplitudes,
            num_exposures,
            coron_exp_time,
            direct_exp_time,
            no_auto_expose,
            raw_skip,
        } => Box::new(PastisModeAmplitudes::new(PastisModeAmplitudesParams {
            pastis_results_path: results_path,
            mode_number,
            c_target,
            wfe_amplitudes,
            num_exposures,
            exposure_time_coron: coron_exp_time,
            exposure_time_direct: direct_exp_time,
            auto_expose: !no_auto_expose,
            file_mode: true,
            raw_skip,
            path: None,
            suffix: None,
        })?),
        Commands::Stage { .. } | Commands::Laser { .. } => {
            return Err(anyhow!("not an experiment command"))
        }
    };
    Ok(experiment)
}

async fn run_stage(config: &TestbedConfig, action: StageAction) -> Result<()> {
    let id = match &action {
        StageAction::Home { id } | StageAction::Move { id, .. } | StageAction::Position { id } => {
            id.clone()
        }
    };
    let definition = config.stage(&id)?.clone();
    let stage = stage_from_config(config, &id)?;
    let stage = stage.as_ref();

    scoped(stage, move || async move {
        match action {
            StageAction::Home { .. } => {
                stage.home().await?;
                println!("{id}: homed");
            }
            StageAction::Move { position, .. } => {
                let target = match definition.positions.get(&position) {
                    Some(value) => *value,
                    None => position.parse::<f64>().with_context(|| {
                        format!("'{position}' is neither a named position of '{id}' nor a number")
                    })?,
                };
                stage.absolute_move(target, definition.units, true).await?;
                println!("{id}: moved to {target}");
            }
            StageAction::Position { .. } => {
                let position = stage.get_position().await?;
                println!("{id}: {position}");
            }
        }
        Ok(())
    })
    .await
}

async fn run_laser(config: &TestbedConfig, action: LaserAction) -> Result<()> {
    let laser = laser_from_config(config)?;
    let laser = laser.as_ref();
    match action {
        LaserAction::SetCurrent { milliamps, channel } => {
            let channel = channel.unwrap_or(config.laser.channel);
            scoped(laser, move || async move {
                laser.set_current(channel, milliamps).await?;
                let current = laser.get_current(channel).await?;
                println!("channel {channel}: {current} mA");
                Ok(())
            })
            .await
        }
    }
}
