//! Simulated backend.
//!
//! Runs trials against a [`Benchmark`] on the simulated clock: nothing is
//! computed in real time, each resource level simply becomes due
//! `level_duration` simulated seconds after the previous one. Useful for
//! comparing schedulers quickly and for integration tests.

use async_trait::async_trait;
use rw_clock::{SimulatedTimeKeeper, TimeKeeper};
use rw_types::constants::{DEFAULT_RESOURCE_ATTR, WORKER_COST, WORKER_TIME};
use rw_types::{
    Configuration, Metrics, ParameterValue, Trial, TrialError, TrialId, TrialStatus, TuneResult,
};
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BinaryHeap};
use std::fmt::Debug;
use tracing::{debug, info};

use crate::backend::{Backend, TrialReport};

/// A synthetic objective evaluated level by level.
pub trait Benchmark: Send + Sync + Debug {
    /// Last resource level of a trial with `config`.
    fn max_resource_level(&self, config: &Configuration) -> u64;

    /// Simulated seconds needed to compute `level`.
    fn level_duration(&self, config: &Configuration, level: u64) -> f64;

    /// Metrics reported at `level`. An error makes the trial fail.
    fn evaluate(&self, config: &Configuration, level: u64) -> Result<Metrics, String>;
}

/// `score = 1 / (0.1 + width·step/100) + 0.1·height`, with `step` the
/// zero-based level index. Configurations carry `width`, `height` and
/// optionally `steps` (number of levels).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeightBenchmark {
    pub metric: String,
    pub default_steps: u64,
    /// Simulated seconds per step.
    pub step_time: f64,
    /// Optional dollar cost per simulated second, reported cumulatively.
    pub cost_per_second: Option<f64>,
}

impl Default for HeightBenchmark {
    fn default() -> Self {
        Self {
            metric: "mean_loss".to_string(),
            default_steps: 100,
            step_time: 0.1,
            cost_per_second: None,
        }
    }
}

impl HeightBenchmark {
    fn param(config: &Configuration, name: &str) -> Result<f64, String> {
        config
            .get(name)
            .and_then(ParameterValue::as_f64)
            .ok_or_else(|| format!("missing numeric parameter '{name}'"))
    }
}

impl Benchmark for HeightBenchmark {
    fn max_resource_level(&self, config: &Configuration) -> u64 {
        match config.get("steps") {
            Some(ParameterValue::Int(steps)) if *steps > 0 => *steps as u64,
            _ => self.default_steps,
        }
    }

    fn level_duration(&self, _config: &Configuration, _level: u64) -> f64 {
        self.step_time
    }

    fn evaluate(&self, config: &Configuration, level: u64) -> Result<Metrics, String> {
        let width = Self::param(config, "width")?;
        let height = Self::param(config, "height")?;
        let step = level.saturating_sub(1) as f64;
        let score = 1.0 / (0.1 + width * step / 100.0) + 0.1 * height;

        let elapsed = level as f64 * self.step_time;
        let mut metrics = Metrics::new();
        metrics.insert(self.metric.clone(), score);
        metrics.insert(DEFAULT_RESOURCE_ATTR.to_string(), level as f64);
        metrics.insert(WORKER_TIME.to_string(), elapsed);
        if let Some(rate) = self.cost_per_second {
            metrics.insert(WORKER_COST.to_string(), elapsed * rate);
        }
        Ok(metrics)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct PendingLevel {
    due: f64,
    seq: u64,
    trial_id: TrialId,
    level: u64,
}

impl Eq for PendingLevel {}

impl Ord for PendingLevel {
    fn cmp(&self, other: &Self) -> Ordering {
        self.due
            .total_cmp(&other.due)
            .then(self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for PendingLevel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone)]
struct SimulatedTrial {
    config: Configuration,
    last_level: u64,
    /// Sequence number of the currently scheduled level; stale heap entries
    /// are skipped.
    active_seq: Option<u64>,
}

/// Event-queue backend driven by the shared simulated clock.
#[derive(Debug)]
pub struct SimulatedBackend<B: Benchmark> {
    benchmark: B,
    clock: SimulatedTimeKeeper,
    charge_overhead: bool,
    trials: BTreeMap<TrialId, SimulatedTrial>,
    queue: BinaryHeap<Reverse<PendingLevel>>,
    next_seq: u64,
}

impl<B: Benchmark> SimulatedBackend<B> {
    pub fn new(benchmark: B, clock: SimulatedTimeKeeper) -> Self {
        Self {
            benchmark,
            clock,
            charge_overhead: true,
            trials: BTreeMap::new(),
            queue: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    /// Whether real time spent outside the backend is charged to the
    /// simulated clock. Disable for fully deterministic runs.
    pub fn with_overhead_charging(mut self, enabled: bool) -> Self {
        self.charge_overhead = enabled;
        self
    }

    pub fn benchmark(&self) -> &B {
        &self.benchmark
    }

    pub fn num_active(&self) -> usize {
        self.trials.values().filter(|t| t.active_seq.is_some()).count()
    }

    fn now(&self) -> Result<f64, String> {
        self.clock.time().map_err(|e| e.to_string())
    }

    fn schedule_next(&mut self, trial_id: TrialId, from_time: f64) {
        let Some(trial) = self.trials.get_mut(&trial_id) else {
            return;
        };
        let level = trial.last_level + 1;
        let due = from_time + self.benchmark.level_duration(&trial.config, level);
        let seq = self.next_seq;
        self.next_seq += 1;
        trial.active_seq = Some(seq);
        self.queue.push(Reverse(PendingLevel {
            due,
            seq,
            trial_id,
            level,
        }));
    }

    fn deactivate(&mut self, trial_id: TrialId) {
        if let Some(trial) = self.trials.get_mut(&trial_id) {
            trial.active_seq = None;
        }
    }

    fn enter(&self) -> TuneResult<()> {
        if self.charge_overhead {
            self.clock.charge_overhead()?;
        }
        Ok(())
    }

    fn exit(&self) {
        self.clock.mark_exit();
    }

    /// Entry for trial-level calls, whose errors are launch failures.
    fn enter_for(&self, trial_id: TrialId) -> Result<f64, TrialError> {
        self.enter()
            .map_err(|e| e.to_string())
            .and_then(|()| self.now())
            .map_err(|message| TrialError::LaunchFailed { trial_id, message })
    }
}

#[async_trait]
impl<B: Benchmark> Backend for SimulatedBackend<B> {
    async fn start_trial(&mut self, trial: &Trial) -> Result<(), TrialError> {
        let trial_id = trial.trial_id;
        if self.trials.contains_key(&trial_id) {
            return Err(TrialError::LaunchFailed {
                trial_id,
                message: "trial already started".to_string(),
            });
        }
        let now = self.enter_for(trial_id)?;
        self.trials.insert(
            trial_id,
            SimulatedTrial {
                config: trial.config.clone(),
                last_level: 0,
                active_seq: None,
            },
        );
        self.schedule_next(trial_id, now);
        debug!(trial_id, at = now, "simulated trial started");
        self.exit();
        Ok(())
    }

    async fn resume_trial(
        &mut self,
        trial_id: TrialId,
        config: &Configuration,
    ) -> Result<(), TrialError> {
        let now = self.enter_for(trial_id)?;
        // unknown trials (e.g. after a restart from checkpoint) run from scratch
        self.trials.entry(trial_id).or_insert_with(|| SimulatedTrial {
            config: config.clone(),
            last_level: 0,
            active_seq: None,
        });
        self.schedule_next(trial_id, now);
        debug!(trial_id, at = now, "simulated trial resumed");
        self.exit();
        Ok(())
    }

    async fn stop_trial(&mut self, trial_id: TrialId) -> TuneResult<()> {
        self.enter()?;
        self.deactivate(trial_id);
        self.exit();
        Ok(())
    }

    async fn pause_trial(&mut self, trial_id: TrialId, resource_level: u64) -> TuneResult<()> {
        self.enter()?;
        if let Some(trial) = self.trials.get_mut(&trial_id) {
            if trial.last_level > resource_level {
                debug!(
                    trial_id,
                    from = trial.last_level,
                    to = resource_level,
                    "rewinding paused trial"
                );
                trial.last_level = resource_level;
            }
            trial.active_seq = None;
        }
        self.exit();
        Ok(())
    }

    async fn fetch_new_results(&mut self) -> TuneResult<Vec<TrialReport>> {
        self.enter()?;
        let now = self.clock.time()?;
        let mut reports = Vec::new();
        while let Some(Reverse(next)) = self.queue.peek().copied() {
            if next.due > now {
                break;
            }
            self.queue.pop();
            let Some(trial) = self.trials.get_mut(&next.trial_id) else {
                continue;
            };
            if trial.active_seq != Some(next.seq) {
                continue;
            }
            trial.last_level = next.level;
            let max_level = self.benchmark.max_resource_level(&trial.config);
            match self.benchmark.evaluate(&trial.config, next.level) {
                Ok(metrics) => {
                    let mut report = TrialReport::result(next.trial_id, next.level, metrics);
                    if next.level >= max_level {
                        report = report.with_status(TrialStatus::Completed);
                        trial.active_seq = None;
                    } else {
                        self.schedule_next(next.trial_id, next.due);
                    }
                    reports.push(report);
                }
                Err(message) => {
                    trial.active_seq = None;
                    reports.push(TrialReport::failed(next.trial_id, next.level, message));
                }
            }
        }
        self.exit();
        Ok(reports)
    }

    async fn stop_all(&mut self) -> TuneResult<()> {
        self.enter()?;
        let active = self.num_active();
        for trial in self.trials.values_mut() {
            trial.active_seq = None;
        }
        self.queue.clear();
        if active > 0 {
            info!(trials = active, "simulated backend stopped all trials");
        }
        self.exit();
        Ok(())
    }

    fn next_event_time(&self) -> Option<f64> {
        self.queue
            .iter()
            .filter(|Reverse(p)| {
                self.trials
                    .get(&p.trial_id)
                    .is_some_and(|t| t.active_seq == Some(p.seq))
            })
            .map(|Reverse(p)| p.due)
            .min_by(f64::total_cmp)
    }
}
