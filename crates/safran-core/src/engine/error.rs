use crate::core::io::XyzError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(
        "Reference and target are not comparable: {reference_atoms} vs {target_atoms} atoms ({detail})"
    )]
    InputMismatch {
        reference_atoms: usize,
        target_atoms: usize,
        detail: String,
    },

    #[error("No permutation is consistent with the element restrictions (row {row})")]
    AssignmentInfeasible { row: usize },

    #[error("Numeric instability at step {step}: {reason}")]
    NumericInstability { step: usize, reason: String },

    #[error("Restart record is unusable: {0}")]
    RestartCorrupt(String),

    #[error("Energy backend failed at step {step}: {reason}")]
    Backend { step: usize, reason: String },

    #[error("Stop file detected, shutting down")]
    StopRequested,

    #[error("Trajectory I/O failed: {source}")]
    Trajectory {
        #[from]
        source: XyzError,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl EngineError {
    /// Whether the caller should treat this as an orderly shutdown rather
    /// than a failure.
    pub fn is_stop(&self) -> bool {
        matches!(self, EngineError::StopRequested)
    }
}
