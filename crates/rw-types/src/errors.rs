use thiserror::Error;

use crate::trial::{TrialId, TrialStatus};

/// Main error type for the Rungway system
#[derive(Error, Debug)]
pub enum TuneError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Data integrity error: {0}")]
    DataIntegrity(#[from] DataIntegrityError),

    #[error("Clock error: {0}")]
    Clock(#[from] ClockError),

    #[error("Trial error: {0}")]
    Trial(#[from] TrialError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Failure threshold exceeded: {failures} trial failures (max_failures = {max_failures})")]
    FailureThreshold { failures: usize, max_failures: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TuneError {
    /// Trial-level failures are absorbed into the failure counter; everything
    /// else terminates the campaign.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Trial(_))
    }
}

/// Desynchronization between the registry, the scheduler and the backend.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DataIntegrityError {
    #[error("Unknown trial: {trial_id}")]
    UnknownTrial { trial_id: TrialId },

    #[error("Invalid transition for trial {trial_id}: {from} -> {to}")]
    InvalidTransition {
        trial_id: TrialId,
        from: TrialStatus,
        to: TrialStatus,
    },

    #[error("Trial {trial_id} registered twice")]
    DuplicateTrial { trial_id: TrialId },

    #[error("Result for trial {trial_id} is missing metric '{metric}'")]
    MissingMetric { trial_id: TrialId, metric: String },

    #[error("Rung ladder violated: {message}")]
    RungLadder { message: String },
}

/// Clock misuse
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClockError {
    #[error("Uninitialized clock: start() must be called before querying time")]
    Uninitialized,

    #[error("Cannot advance clock by negative step {step}")]
    NegativeStep { step: f64 },

    #[error("Clock reading {seconds}s is outside the representable calendar range")]
    OutOfRange { seconds: f64 },
}

/// Recoverable trial-level failures, counted against `max_failures`
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrialError {
    #[error("Trial {trial_id} could not be launched: {message}")]
    LaunchFailed { trial_id: TrialId, message: String },

    #[error("Trial {trial_id} failed during execution: {message}")]
    ExecutionFailed { trial_id: TrialId, message: String },
}

impl TrialError {
    pub fn trial_id(&self) -> TrialId {
        match self {
            Self::LaunchFailed { trial_id, .. } | Self::ExecutionFailed { trial_id, .. } => {
                *trial_id
            }
        }
    }
}

/// Checkpoint persistence and restoration errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CheckpointError {
    #[error("Checkpoint is malformed: {message}")]
    Malformed { message: String },

    #[error("Unsupported checkpoint version {found} (expected {expected})")]
    VersionMismatch { found: u32, expected: u32 },

    #[error("Checkpoint does not match the running campaign: {message}")]
    Incompatible { message: String },
}

/// Result type alias for Rungway operations
pub type TuneResult<T> = Result<T, TuneError>;

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::TuneError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::TuneError::Config(format!($($arg)*))
    };
}
