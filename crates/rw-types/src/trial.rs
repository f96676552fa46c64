//! Trial model shared by the registry, scheduler and tuner.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::config::Configuration;

/// Unique, monotonically assigned trial identifier.
pub type TrialId = u64;

/// Reported metrics of one result, keyed by metric name.
pub type Metrics = BTreeMap<String, f64>;

/// Whether we are maximizing or minimizing the objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricMode {
    Min,
    Max,
}

impl Default for MetricMode {
    fn default() -> Self {
        Self::Min
    }
}

impl MetricMode {
    /// `true` if `candidate` is strictly better than `incumbent`.
    pub fn is_better(self, candidate: f64, incumbent: f64) -> bool {
        match self {
            Self::Min => candidate < incumbent,
            Self::Max => candidate > incumbent,
        }
    }

    /// Total order placing better values first. NaN sorts last in both modes.
    pub fn cmp_best_first(self, a: f64, b: f64) -> std::cmp::Ordering {
        match (a.is_nan(), b.is_nan()) {
            (true, true) => std::cmp::Ordering::Equal,
            (true, false) => std::cmp::Ordering::Greater,
            (false, true) => std::cmp::Ordering::Less,
            (false, false) => match self {
                Self::Min => a.total_cmp(&b),
                Self::Max => b.total_cmp(&a),
            },
        }
    }
}

/// A single trial: one configuration evaluated by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub trial_id: TrialId,
    pub config: Configuration,
    pub creation_time: DateTime<Utc>,
}

impl Trial {
    pub fn new(trial_id: TrialId, config: Configuration, creation_time: DateTime<Utc>) -> Self {
        Self {
            trial_id,
            config,
            creation_time,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialStatus {
    InProgress,
    Completed,
    Stopped,
    Paused,
    Failed,
}

impl TrialStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Stopped | Self::Failed)
    }

    /// Lifecycle rules. Re-entering the current status is always allowed (stop
    /// twice is a no-op); terminal states cannot be left; a paused trial can
    /// only go back to `in_progress` through an explicit resume, or be
    /// finalized.
    pub fn can_transition_to(self, next: TrialStatus) -> bool {
        if self == next {
            return true;
        }
        match self {
            Self::InProgress => true,
            Self::Paused => matches!(next, Self::InProgress | Self::Stopped | Self::Failed),
            Self::Completed | Self::Stopped | Self::Failed => false,
        }
    }
}

impl fmt::Display for TrialStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Stopped => "stopped",
            Self::Paused => "paused",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One report of a trial at a given resource level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    pub trial_id: TrialId,
    pub resource_level: u64,
    #[serde(with = "crate::float_serde::map")]
    pub metrics: Metrics,
    /// Tuner clock reading (seconds since start of campaign) on receipt.
    pub timestamp: f64,
}

impl TrialResult {
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }
}

/// What the scheduler wants done with a trial after one of its results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerDecision {
    Continue,
    Stop,
    Pause,
}

impl fmt::Display for SchedulerDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Continue => "continue",
            Self::Stop => "stop",
            Self::Pause => "pause",
        };
        f.write_str(s)
    }
}
