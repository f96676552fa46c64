//! Trial execution backend abstraction.

use async_trait::async_trait;
use rw_types::{Configuration, Metrics, Trial, TrialError, TrialId, TrialStatus, TuneResult};
use serde::{Deserialize, Serialize};

/// One update polled from a backend: an optional result (non-empty
/// `metrics`) and the trial's status as seen by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialReport {
    pub trial_id: TrialId,
    pub resource_level: u64,
    #[serde(with = "rw_types::float_serde::map")]
    pub metrics: Metrics,
    pub status: TrialStatus,
    /// Failure message when `status` is `failed`.
    pub error: Option<String>,
}

impl TrialReport {
    pub fn result(trial_id: TrialId, resource_level: u64, metrics: Metrics) -> Self {
        Self {
            trial_id,
            resource_level,
            metrics,
            status: TrialStatus::InProgress,
            error: None,
        }
    }

    pub fn with_status(mut self, status: TrialStatus) -> Self {
        self.status = status;
        self
    }

    pub fn failed(trial_id: TrialId, resource_level: u64, message: impl Into<String>) -> Self {
        Self {
            trial_id,
            resource_level,
            metrics: Metrics::new(),
            status: TrialStatus::Failed,
            error: Some(message.into()),
        }
    }

    pub fn has_result(&self) -> bool {
        !self.metrics.is_empty()
    }
}

/// Where trials physically run.
///
/// Stop, pause and `stop_all` are fire-and-forget and must be idempotent:
/// the tuner may issue them for trials that already finished.
#[async_trait]
pub trait Backend: Send {
    /// Launch a freshly created trial.
    async fn start_trial(&mut self, trial: &Trial) -> Result<(), TrialError>;

    /// Continue a paused (or interrupted) trial.
    async fn resume_trial(
        &mut self,
        trial_id: TrialId,
        config: &Configuration,
    ) -> Result<(), TrialError>;

    async fn stop_trial(&mut self, trial_id: TrialId) -> TuneResult<()>;

    /// Pause a trial so it can be resumed later. `resource_level` is the
    /// level the pause decision was made at; a resumed trial continues with
    /// the level after it, even if the backend already computed further.
    /// Backends without native pausing stop the trial and restart it on
    /// resume.
    async fn pause_trial(&mut self, trial_id: TrialId, resource_level: u64) -> TuneResult<()> {
        let _ = resource_level;
        self.stop_trial(trial_id).await
    }

    /// Updates produced since the previous poll, in the order they happened.
    async fn fetch_new_results(&mut self) -> TuneResult<Vec<TrialReport>>;

    async fn stop_all(&mut self) -> TuneResult<()>;

    /// Campaign time of the next known event, if the backend can predict it.
    /// Simulated backends use this to let the clock jump instead of sleep.
    fn next_event_time(&self) -> Option<f64> {
        None
    }
}
