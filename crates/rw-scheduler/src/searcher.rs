//! Searchers: where new configurations come from.

use rw_types::{CheckpointError, Configuration, Metrics, TrialId, TuneError, TuneResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use tracing::{debug, warn};

use crate::duplicate::DuplicateDetector;
use crate::rng::{RngState, SeededRng};
use crate::space::{Grid, SearchSpace};

/// Proposes configurations to evaluate and observes their results.
///
/// `get_config` returning `None` means the search space is exhausted; the
/// tuner treats that as a normal end of the campaign.
pub trait Searcher: Send + Debug {
    fn name(&self) -> &str;

    fn get_config(&mut self) -> Option<Configuration>;

    /// Called for every result the scheduler accepts.
    fn on_trial_result(
        &mut self,
        _trial_id: TrialId,
        _config: &Configuration,
        _resource_level: u64,
        _metrics: &Metrics,
    ) {
    }

    /// Opaque state blob stored in checkpoints.
    fn state(&self) -> TuneResult<serde_json::Value>;

    fn load_state(&mut self, state: serde_json::Value) -> TuneResult<()>;
}

fn decode_state<T: DeserializeOwned>(searcher: &str, state: serde_json::Value) -> TuneResult<T> {
    serde_json::from_value(state).map_err(|e| {
        TuneError::from(CheckpointError::Malformed {
            message: format!("{searcher} searcher state: {e}"),
        })
    })
}

// ---- Random search ----

#[derive(Debug, Serialize, Deserialize)]
struct RandomSearcherState {
    rng: RngState,
    proposed: Vec<Configuration>,
    points_to_evaluate: Vec<Configuration>,
    num_results: usize,
}

/// Seeded uniform sampling with duplicate rejection.
#[derive(Debug, Clone)]
pub struct RandomSearcher {
    space: SearchSpace,
    rng: SeededRng,
    detector: DuplicateDetector,
    max_retries: usize,
    points_to_evaluate: Vec<Configuration>,
    proposed: Vec<Configuration>,
    num_results: usize,
}

impl RandomSearcher {
    pub const DEFAULT_MAX_RETRIES: usize = 100;

    pub fn new(space: SearchSpace, rng: SeededRng) -> Self {
        Self {
            space,
            rng,
            detector: DuplicateDetector::default(),
            max_retries: Self::DEFAULT_MAX_RETRIES,
            points_to_evaluate: Vec::new(),
            proposed: Vec::new(),
            num_results: 0,
        }
    }

    pub fn with_duplicate_detector(mut self, detector: DuplicateDetector) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    /// Configurations proposed verbatim, in order, before any sampling.
    pub fn with_points_to_evaluate(mut self, points: Vec<Configuration>) -> Self {
        self.points_to_evaluate = points;
        self
    }

    pub fn proposed(&self) -> &[Configuration] {
        &self.proposed
    }

    pub fn num_results(&self) -> usize {
        self.num_results
    }
}

impl Searcher for RandomSearcher {
    fn name(&self) -> &str {
        "random"
    }

    fn get_config(&mut self) -> Option<Configuration> {
        while !self.points_to_evaluate.is_empty() {
            let config = self.points_to_evaluate.remove(0);
            if !self.detector.contains(&self.proposed, &config) {
                self.proposed.push(config.clone());
                return Some(config);
            }
        }

        for _ in 0..self.max_retries {
            let config = self.space.sample(&mut self.rng);
            if !self.detector.contains(&self.proposed, &config) {
                debug!(config = %config, "random searcher proposal");
                self.proposed.push(config.clone());
                return Some(config);
            }
        }
        warn!(
            retries = self.max_retries,
            proposed = self.proposed.len(),
            "random searcher could not find a new configuration"
        );
        None
    }

    fn on_trial_result(
        &mut self,
        _trial_id: TrialId,
        _config: &Configuration,
        _resource_level: u64,
        _metrics: &Metrics,
    ) {
        self.num_results += 1;
    }

    fn state(&self) -> TuneResult<serde_json::Value> {
        Ok(serde_json::to_value(RandomSearcherState {
            rng: self.rng.state(),
            proposed: self.proposed.clone(),
            points_to_evaluate: self.points_to_evaluate.clone(),
            num_results: self.num_results,
        })?)
    }

    fn load_state(&mut self, state: serde_json::Value) -> TuneResult<()> {
        let state: RandomSearcherState = decode_state(self.name(), state)?;
        self.rng = SeededRng::from_state(state.rng);
        self.proposed = state.proposed;
        self.points_to_evaluate = state.points_to_evaluate;
        self.num_results = state.num_results;
        Ok(())
    }
}

// ---- Grid search ----

#[derive(Debug, Serialize, Deserialize)]
struct GridSearcherState {
    cursor: usize,
    grid_size: usize,
}

/// Walks the Cartesian grid of the search space once, in order.
#[derive(Debug, Clone)]
pub struct GridSearcher {
    grid: Grid,
    cursor: usize,
}

impl GridSearcher {
    pub fn new(space: &SearchSpace, float_steps: usize) -> Self {
        Self {
            grid: space.grid(float_steps),
            cursor: 0,
        }
    }

    pub fn remaining(&self) -> usize {
        self.grid.len() - self.cursor
    }
}

impl Searcher for GridSearcher {
    fn name(&self) -> &str {
        "grid"
    }

    fn get_config(&mut self) -> Option<Configuration> {
        if self.cursor >= self.grid.len() {
            return None;
        }
        let config = self.grid.get(self.cursor)?;
        self.cursor += 1;
        Some(config)
    }

    fn state(&self) -> TuneResult<serde_json::Value> {
        Ok(serde_json::to_value(GridSearcherState {
            cursor: self.cursor,
            grid_size: self.grid.len(),
        })?)
    }

    fn load_state(&mut self, state: serde_json::Value) -> TuneResult<()> {
        let state: GridSearcherState = decode_state(self.name(), state)?;
        if state.grid_size != self.grid.len() || state.cursor > self.grid.len() {
            return Err(CheckpointError::Incompatible {
                message: format!(
                    "grid searcher state for {} points (cursor {}), grid has {}",
                    state.grid_size,
                    state.cursor,
                    self.grid.len()
                ),
            }
            .into());
        }
        self.cursor = state.cursor;
        Ok(())
    }
}
