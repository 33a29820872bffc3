//! Run metadata written next to the experiment output as `metadata.json`.

use super::state::ExperimentState;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// File name of the metadata document in the output directory.
pub const METADATA_FILE: &str = "metadata.json";

/// Description of one experiment run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunMetadata {
    /// Unique run identifier
    pub run_id: String,
    /// Experiment name
    pub experiment_name: String,
    /// Testbed name from the configuration
    pub testbed: String,
    /// `simulated` or `hardware`
    pub backend: String,
    /// Host the run executed on
    pub hostname: String,
    /// Experiment parameters as given to the run
    pub parameters: serde_json::Value,
    /// Run state, updated as the run progresses
    pub state: ExperimentState,
    /// Start time
    pub started: DateTime<Utc>,
    /// End time, once finished
    pub finished: Option<DateTime<Utc>>,
    /// Error chain of a failed run
    pub error: Option<String>,
    /// Version of the acquisition software
    pub software_version: String,
}

impl Default for RunMetadata {
    fn default() -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            experiment_name: "Default Experiment".to_string(),
            testbed: String::new(),
            backend: String::new(),
            hostname: hostname::get()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            parameters: serde_json::Value::Null,
            state: ExperimentState::Idle,
            started: Utc::now(),
            finished: None,
            error: None,
            software_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// A builder for constructing `RunMetadata` instances.
#[derive(Default)]
pub struct MetadataBuilder {
    inner: RunMetadata,
}

impl MetadataBuilder {
    /// Builder with a fresh run id.
    pub fn new() -> Self {
        Self::default()
    }

    /// Experiment name.
    pub fn experiment_name(mut self, name: &str) -> Self {
        self.inner.experiment_name = name.to_string();
        self
    }

    /// Testbed name and backend.
    pub fn testbed(mut self, name: &str, backend: &str) -> Self {
        self.inner.testbed = name.to_string();
        self.inner.backend = backend.to_string();
        self
    }

    /// Experiment parameters.
    pub fn parameters(mut self, parameters: serde_json::Value) -> Self {
        self.inner.parameters = parameters;
        self
    }

    /// Finish with state `Idle`.
    pub fn build(self) -> RunMetadata {
        self.inner
    }
}

impl RunMetadata {
    /// Validates the metadata.
    pub fn validate(&self) -> Result<(), String> {
        if self.experiment_name.is_empty() {
            return Err("Experiment name cannot be empty.".to_string());
        }
        Ok(())
    }

    /// Mark the run finished in `state`.
    pub fn finish(&mut self, state: ExperimentState, error: Option<String>) {
        self.state = state;
        self.finished = Some(Utc::now());
        self.error = error;
    }

    /// Write `metadata.json` into `dir`.
    pub fn save(&self, dir: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize run metadata")?;
        let path = dir.join(METADATA_FILE);
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write metadata to {}", path.display()))
    }

    /// Read `metadata.json` from `dir`.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(METADATA_FILE);
        let json = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read metadata from {}", path.display()))?;
        serde_json::from_str(&json).context("Failed to deserialize run metadata")
    }
}
