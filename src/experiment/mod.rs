//! Experiments and the runner that sequences them.
//!
//! An [`Experiment`] describes one data-acquisition procedure. The
//! [`ExperimentRunner`] gives it an output directory, records run metadata
//! and tracks its [`ExperimentState`]:
//!
//! ```text
//! create output path ─> metadata.json (running) ─> experiment() ─> post_experiment()
//!                                                       │                 │
//!                                                       └──── error ──────┴─> metadata.json (error)
//! ```
//!
//! Experiments run strictly sequentially: every instrument is opened in a
//! [`scoped`](crate::hardware::scoped) block for the duration of its use and
//! no two hardware operations are in flight at once.

pub mod coffee;
pub mod general;
pub mod metadata;
pub mod pastis;
pub mod simple_sine_test;
pub mod speckle_nulling;
pub mod state;

pub use coffee::{CoffeeStrokeMin, CoffeeStrokeMinParams};
pub use metadata::{MetadataBuilder, RunMetadata};
pub use pastis::{PastisModeAmplitudes, PastisModeAmplitudesParams};
pub use simple_sine_test::{SimpleSineTest, SimpleSineTestParams};
pub use speckle_nulling::{SpeckleNulling, SpeckleNullingParams, SpeckleNullingReport};
pub use state::ExperimentState;

use crate::error::DaqError;
use crate::storage::create_data_path;
use crate::testbed::Testbed;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// What an experiment sees while it runs.
pub struct ExperimentContext<'a> {
    /// Instruments and configuration
    pub testbed: &'a Testbed,
    /// Directory all output of this run goes under
    pub output_path: PathBuf,
}

impl ExperimentContext<'_> {
    /// Directory all output of the run goes under.
    pub fn output_path(&self) -> &Path {
        &self.output_path
    }
}

/// A data-acquisition procedure run by [`ExperimentRunner`].
#[async_trait]
pub trait Experiment: Send {
    /// Human readable name, e.g. `"Speckle Nulling"`.
    fn name(&self) -> &str;

    /// Suffix of the timestamped output directory.
    fn suffix(&self) -> String;

    /// Explicit output directory; overrides the timestamped one.
    fn output_path(&self) -> Option<PathBuf> {
        None
    }

    /// Parameters recorded in `metadata.json`.
    fn parameters(&self) -> serde_json::Value {
        serde_json::Value::Null
    }

    /// Acquire the data.
    async fn experiment(&mut self, ctx: &ExperimentContext<'_>) -> Result<()>;

    /// Runs after a successful [`Experiment::experiment`], e.g. to plot results.
    async fn post_experiment(&mut self, _ctx: &ExperimentContext<'_>) -> Result<()> {
        Ok(())
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Run identifier from `metadata.json`
    pub run_id: String,
    /// Experiment name
    pub experiment_name: String,
    /// Run directory
    pub output_path: PathBuf,
    /// Final state
    pub state: ExperimentState,
    /// Start time
    pub started: DateTime<Utc>,
    /// End time
    pub finished: Option<DateTime<Utc>>,
}

/// Runs experiments against one testbed.
pub struct ExperimentRunner<'a> {
    testbed: &'a Testbed,
    state: ExperimentState,
}

impl<'a> ExperimentRunner<'a> {
    /// Idle runner for `testbed`.
    pub fn new(testbed: &'a Testbed) -> Self {
        Self {
            testbed,
            state: ExperimentState::Idle,
        }
    }

    /// State of the last run.
    pub fn state(&self) -> ExperimentState {
        self.state
    }

    /// Run `experiment` and its post step.
    ///
    /// On failure the state becomes [`ExperimentState::Error`], the error is
    /// recorded in `metadata.json` and returned. Instruments are already closed
    /// by then.
    pub async fn run(&mut self, experiment: &mut dyn Experiment) -> Result<RunSummary> {
        if !self.state.can_begin() {
            return Err(DaqError::Instrument(format!(
                "Cannot start '{}' while the runner is {}",
                experiment.name(),
                self.state
            ))
            .into());
        }

        let output_path = self.prepare_output_path(experiment)?;
        let config = self.testbed.config();
        let mut metadata = MetadataBuilder::new()
            .experiment_name(experiment.name())
            .testbed(
                &config.application.name,
                &config.application.backend.to_string(),
            )
            .parameters(experiment.parameters())
            .build();
        if let Err(msg) = metadata.validate() {
            return Err(DaqError::Configuration(msg).into());
        }
        metadata.state = ExperimentState::Running;
        metadata.save(&output_path)?;
        config.save_snapshot(&output_path)?;

        self.state = ExperimentState::Running;
        info!(
            experiment = experiment.name(),
            run_id = %metadata.run_id,
            path = %output_path.display(),
            "Starting experiment"
        );

        let ctx = ExperimentContext {
            testbed: self.testbed,
            output_path: output_path.clone(),
        };
        let outcome = match experiment.experiment(&ctx).await {
            Ok(()) => experiment.post_experiment(&ctx).await,
            Err(err) => Err(err),
        };

        if let Err(err) = outcome {
            self.state = ExperimentState::Error;
            metadata.finish(ExperimentState::Error, Some(format!("{err:#}")));
            if let Err(save_err) = metadata.save(&output_path) {
                warn!(error = %save_err, "Failed to record experiment failure");
            }
            error!(experiment = experiment.name(), error = %err, "Experiment failed");
            return Err(err.context(format!("Experiment '{}' failed", experiment.name())));
        }

        self.state = ExperimentState::Complete;
        metadata.finish(ExperimentState::Complete, None);
        metadata.save(&output_path)?;
        info!(experiment = experiment.name(), "Experiment complete");

        Ok(RunSummary {
            run_id: metadata.run_id,
            experiment_name: metadata.experiment_name,
            output_path,
            state: self.state,
            started: metadata.started,
            finished: metadata.finished,
        })
    }

    fn prepare_output_path(&self, experiment: &dyn Experiment) -> Result<PathBuf> {
        match experiment.output_path() {
            Some(path) => {
                std::fs::create_dir_all(&path).with_context(|| {
                    format!("Failed to create output path '{}'", path.display())
                })?;
                Ok(path)
            }
            None => Ok(create_data_path(
                self.testbed.data_root(),
                &experiment.suffix(),
            )?),
        }
    }
}

/// `base` or `base_<suffix>`.
pub(crate) fn with_suffix(base: &str, suffix: Option<&str>) -> String {
    match suffix {
        Some(suffix) if !suffix.is_empty() => format!("{base}_{suffix}"),
        _ => base.to_string(),
    }
}
