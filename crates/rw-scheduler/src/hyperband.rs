//! Asynchronous Hyperband: stopping and promotion variants.

use rand::Rng;
use rw_types::{DataIntegrityError, MetricMode, SchedulerDecision, TrialId, TuneResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::rng::{RngState, SeededRng};
use crate::rung::RungSystem;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HyperbandType {
    /// Trials below the rung threshold are stopped for good.
    #[default]
    Stopping,
    /// Trials below the rung threshold are paused and may be resumed once
    /// enough worse trials have reached the rung.
    Promotion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BracketSampling {
    #[default]
    Random,
    RoundRobin,
}

/// Scheduler-side bookkeeping for one trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialSlot {
    pub bracket: usize,
    pub last_level: Option<u64>,
    /// Rung level the trial was paused at (promotion only).
    pub paused_at: Option<u64>,
}

/// Everything a checkpoint needs to restore a [`HyperbandScheduler`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HyperbandState {
    pub rungs: RungSystem,
    pub rng: RngState,
    pub next_bracket: usize,
    pub slots: BTreeMap<TrialId, TrialSlot>,
}

#[derive(Debug, Clone)]
pub struct HyperbandScheduler {
    kind: HyperbandType,
    mode: MetricMode,
    sampling: BracketSampling,
    rungs: RungSystem,
    rng: SeededRng,
    next_bracket: usize,
    slots: BTreeMap<TrialId, TrialSlot>,
}

impl HyperbandScheduler {
    pub fn new(
        kind: HyperbandType,
        mode: MetricMode,
        sampling: BracketSampling,
        rungs: RungSystem,
        rng: SeededRng,
    ) -> Self {
        Self {
            kind,
            mode,
            sampling,
            rungs,
            rng,
            next_bracket: 0,
            slots: BTreeMap::new(),
        }
    }

    pub fn kind(&self) -> HyperbandType {
        self.kind
    }

    pub fn rungs(&self) -> &RungSystem {
        &self.rungs
    }

    pub fn slot(&self, trial_id: TrialId) -> Option<&TrialSlot> {
        self.slots.get(&trial_id)
    }

    /// Assign a bracket to a newly started trial.
    pub fn on_trial_add(&mut self, trial_id: TrialId) -> Result<usize, DataIntegrityError> {
        if self.slots.contains_key(&trial_id) {
            return Err(DataIntegrityError::DuplicateTrial { trial_id });
        }
        let num_brackets = self.rungs.num_brackets();
        let bracket = match self.sampling {
            BracketSampling::Random => self.rng.gen_range(0..num_brackets),
            BracketSampling::RoundRobin => {
                let b = self.next_bracket;
                self.next_bracket = (self.next_bracket + 1) % num_brackets;
                b
            }
        };
        debug!(trial_id, bracket, "trial assigned to bracket");
        self.slots.insert(
            trial_id,
            TrialSlot {
                bracket,
                last_level: None,
                paused_at: None,
            },
        );
        Ok(bracket)
    }

    /// Decide on a result of `trial_id` at `level`.
    pub fn on_result(
        &mut self,
        trial_id: TrialId,
        level: u64,
        value: f64,
    ) -> Result<SchedulerDecision, DataIntegrityError> {
        let slot = self
            .slots
            .get_mut(&trial_id)
            .ok_or(DataIntegrityError::UnknownTrial { trial_id })?;
        if let Some(last) = slot.last_level {
            if level <= last {
                warn!(
                    trial_id,
                    level,
                    last_level = last,
                    "duplicate or out-of-order resource level"
                );
            }
        }
        slot.last_level = Some(slot.last_level.map_or(level, |last| last.max(level)));
        let bracket = slot.bracket;

        let top_level = self.rungs.max_resource_level();
        let mode = self.mode;
        let Some(rung) = self.rungs.rung_mut(bracket, level) else {
            return Ok(SchedulerDecision::Continue);
        };
        rung.record(trial_id, value);
        if level == top_level {
            return Ok(SchedulerDecision::Continue);
        }

        let in_top = rung.is_in_top_quantile(trial_id, mode).unwrap_or(true);
        let decision = if in_top {
            rung.mark_promoted(trial_id);
            SchedulerDecision::Continue
        } else {
            match self.kind {
                HyperbandType::Stopping => SchedulerDecision::Stop,
                HyperbandType::Promotion => SchedulerDecision::Pause,
            }
        };
        if decision == SchedulerDecision::Pause {
            if let Some(slot) = self.slots.get_mut(&trial_id) {
                slot.paused_at = Some(level);
            }
        }
        debug!(trial_id, level, value, bracket, %decision, "rung decision");
        Ok(decision)
    }

    /// A paused trial that has made it into the top of its rung, highest
    /// rung first. The trial is marked as promoted.
    pub fn promote(&mut self) -> Option<TrialId> {
        if self.kind != HyperbandType::Promotion {
            return None;
        }
        let mut best: Option<(u64, TrialId)> = None;
        for rung in self.rungs.rungs() {
            for trial_id in rung.promotable(self.mode) {
                let paused_here = self
                    .slots
                    .get(&trial_id)
                    .is_some_and(|s| s.paused_at == Some(rung.resource_level));
                if paused_here && best.map_or(true, |(level, _)| rung.resource_level > level) {
                    best = Some((rung.resource_level, trial_id));
                    break;
                }
            }
        }
        let (level, trial_id) = best?;
        let slot = self.slots.get_mut(&trial_id)?;
        slot.paused_at = None;
        let bracket = slot.bracket;
        if let Some(rung) = self.rungs.rung_mut(bracket, level) {
            rung.mark_promoted(trial_id);
        }
        debug!(trial_id, level, "promoting paused trial");
        Some(trial_id)
    }

    /// A trial reached a terminal status; it can no longer be promoted.
    pub fn on_trial_finished(&mut self, trial_id: TrialId) {
        if let Some(slot) = self.slots.get_mut(&trial_id) {
            slot.paused_at = None;
        }
    }

    pub fn state(&self) -> HyperbandState {
        HyperbandState {
            rungs: self.rungs.clone(),
            rng: self.rng.state(),
            next_bracket: self.next_bracket,
            slots: self.slots.clone(),
        }
    }

    pub fn load_state(&mut self, state: HyperbandState) -> TuneResult<()> {
        self.rungs.check_compatible(&state.rungs)?;
        if let Some((trial_id, _)) = state
            .slots
            .iter()
            .find(|(_, s)| s.bracket >= self.rungs.num_brackets())
        {
            return Err(DataIntegrityError::RungLadder {
                message: format!("trial {trial_id} is in a bracket that does not exist"),
            }
            .into());
        }
        self.rungs = state.rungs;
        self.rng = SeededRng::from_state(state.rng);
        self.next_bracket = state.next_bracket % self.rungs.num_brackets();
        self.slots = state.slots;
        Ok(())
    }
}
