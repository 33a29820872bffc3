//! Experiment lifecycle state.

use serde::{Deserialize, Serialize};

/// Lifecycle of an experiment run.
///
/// # State Machine
///
/// ```text
/// Idle ──run──> Running ──ok──> Complete
///                  │
///                  └──error──> Error
/// ```
///
/// `Complete` and `Error` are terminal for a run; a runner in either state can
/// begin the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentState {
    /// No experiment running
    Idle,
    /// Experiment actively executing
    Running,
    /// Experiment completed successfully
    Complete,
    /// Experiment stopped on an error
    Error,
}

impl std::fmt::Display for ExperimentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExperimentState::Idle => write!(f, "Idle"),
            ExperimentState::Running => write!(f, "Running"),
            ExperimentState::Complete => write!(f, "Complete"),
            ExperimentState::Error => write!(f, "Error"),
        }
    }
}

impl ExperimentState {
    /// Check if the state allows starting a new run.
    pub fn can_begin(&self) -> bool {
        matches!(
            self,
            ExperimentState::Idle | ExperimentState::Complete | ExperimentState::Error
        )
    }

    /// `Complete` or `Error`.
    pub fn is_finished(&self) -> bool {
        matches!(self, ExperimentState::Complete | ExperimentState::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        assert!(ExperimentState::Idle.can_begin());
        assert!(!ExperimentState::Running.can_begin());
        assert!(ExperimentState::Error.can_begin());

        assert!(ExperimentState::Complete.is_finished());
        assert!(!ExperimentState::Running.is_finished());
    }

    #[test]
    fn test_state_serializes_snake_case() {
        let json = serde_json::to_string(&ExperimentState::Complete).unwrap();
        assert_eq!(json, "\"complete\"");
    }
}
