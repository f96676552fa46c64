//! The scheduler facade driven by the tuner loop.

use rw_types::{
    CheckpointError, Configuration, DataIntegrityError, MetricMode, SchedulerDecision, Trial,
    TrialId, TrialResult, TuneResult,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

use crate::hyperband::{HyperbandScheduler, HyperbandState, HyperbandType};
use crate::searcher::Searcher;

/// Scheduling policy. FIFO lets every trial run to completion.
#[derive(Debug, Clone)]
pub enum SchedulerKind {
    Fifo,
    Hyperband(HyperbandScheduler),
}

/// What the tuner should do with a free worker slot.
#[derive(Debug, Clone, PartialEq)]
pub enum TrialSuggestion {
    /// Start a new trial with this configuration.
    Start(Configuration),
    /// Resume a paused trial.
    Resume(TrialId),
}

/// Checkpointed scheduler state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerState {
    pub policy: String,
    pub searcher: String,
    pub searcher_state: serde_json::Value,
    pub trials: BTreeSet<TrialId>,
    pub hyperband: Option<HyperbandState>,
}

#[derive(Debug)]
pub struct Scheduler {
    kind: SchedulerKind,
    searcher: Box<dyn Searcher>,
    metric: String,
    mode: MetricMode,
    trials: BTreeSet<TrialId>,
}

impl Scheduler {
    pub fn new(
        kind: SchedulerKind,
        searcher: Box<dyn Searcher>,
        metric: impl Into<String>,
        mode: MetricMode,
    ) -> Self {
        Self {
            kind,
            searcher,
            metric: metric.into(),
            mode,
            trials: BTreeSet::new(),
        }
    }

    pub fn fifo(searcher: Box<dyn Searcher>, metric: impl Into<String>, mode: MetricMode) -> Self {
        Self::new(SchedulerKind::Fifo, searcher, metric, mode)
    }

    pub fn policy_name(&self) -> &'static str {
        match &self.kind {
            SchedulerKind::Fifo => "fifo",
            SchedulerKind::Hyperband(_) => "hyperband",
        }
    }

    pub fn kind(&self) -> &SchedulerKind {
        &self.kind
    }

    pub fn metric(&self) -> &str {
        &self.metric
    }

    pub fn mode(&self) -> MetricMode {
        self.mode
    }

    pub fn searcher(&self) -> &dyn Searcher {
        self.searcher.as_ref()
    }

    /// Whether this scheduler can pause trials.
    pub fn supports_pause(&self) -> bool {
        matches!(
            &self.kind,
            SchedulerKind::Hyperband(hb) if hb.kind() == HyperbandType::Promotion
        )
    }

    /// Paused trials ready for promotion come first; otherwise a new
    /// configuration from the searcher. `None` means nothing is left to run.
    pub fn suggest(&mut self) -> Option<TrialSuggestion> {
        if let SchedulerKind::Hyperband(hb) = &mut self.kind {
            if let Some(trial_id) = hb.promote() {
                return Some(TrialSuggestion::Resume(trial_id));
            }
        }
        self.searcher.get_config().map(TrialSuggestion::Start)
    }

    /// A paused trial ready for promotion, without consulting the searcher.
    pub fn next_promotion(&mut self) -> Option<TrialId> {
        match &mut self.kind {
            SchedulerKind::Hyperband(hb) => hb.promote(),
            SchedulerKind::Fifo => None,
        }
    }

    /// Register a trial the tuner just started.
    pub fn on_trial_add(&mut self, trial: &Trial) -> TuneResult<()> {
        if !self.trials.insert(trial.trial_id) {
            return Err(DataIntegrityError::DuplicateTrial {
                trial_id: trial.trial_id,
            }
            .into());
        }
        if let SchedulerKind::Hyperband(hb) = &mut self.kind {
            hb.on_trial_add(trial.trial_id)?;
        }
        Ok(())
    }

    /// Decide on one result. The searcher sees every accepted result.
    pub fn on_trial_result(
        &mut self,
        trial: &Trial,
        result: &TrialResult,
    ) -> TuneResult<SchedulerDecision> {
        let trial_id = trial.trial_id;
        if !self.trials.contains(&trial_id) {
            return Err(DataIntegrityError::UnknownTrial { trial_id }.into());
        }
        let decision = match &mut self.kind {
            SchedulerKind::Fifo => SchedulerDecision::Continue,
            SchedulerKind::Hyperband(hb) => {
                let value = result.metric(&self.metric).ok_or_else(|| {
                    DataIntegrityError::MissingMetric {
                        trial_id,
                        metric: self.metric.clone(),
                    }
                })?;
                hb.on_result(trial_id, result.resource_level, value)?
            }
        };
        self.searcher
            .on_trial_result(trial_id, &trial.config, result.resource_level, &result.metrics);
        debug!(trial_id, level = result.resource_level, %decision, "scheduler decision");
        Ok(decision)
    }

    /// A trial reached a terminal status.
    pub fn on_trial_finished(&mut self, trial_id: TrialId) {
        if let SchedulerKind::Hyperband(hb) = &mut self.kind {
            hb.on_trial_finished(trial_id);
        }
    }

    pub fn state(&self) -> TuneResult<SchedulerState> {
        Ok(SchedulerState {
            policy: self.policy_name().to_string(),
            searcher: self.searcher.name().to_string(),
            searcher_state: self.searcher.state()?,
            trials: self.trials.clone(),
            hyperband: match &self.kind {
                SchedulerKind::Fifo => None,
                SchedulerKind::Hyperband(hb) => Some(hb.state()),
            },
        })
    }

    /// Restore from a checkpoint. The state must come from a scheduler built
    /// from the same configuration.
    pub fn load_state(&mut self, state: SchedulerState) -> TuneResult<()> {
        if state.policy != self.policy_name() || state.searcher != self.searcher.name() {
            return Err(CheckpointError::Incompatible {
                message: format!(
                    "checkpoint has {}/{} scheduler, campaign uses {}/{}",
                    state.policy,
                    state.searcher,
                    self.policy_name(),
                    self.searcher.name()
                ),
            }
            .into());
        }
        match (&mut self.kind, state.hyperband) {
            (SchedulerKind::Fifo, None) => {}
            (SchedulerKind::Hyperband(hb), Some(hb_state)) => hb.load_state(hb_state)?,
            _ => {
                return Err(CheckpointError::Malformed {
                    message: "hyperband state does not match scheduler policy".to_string(),
                }
                .into())
            }
        }
        self.searcher.load_state(state.searcher_state)?;
        self.trials = state.trials;
        Ok(())
    }
}
