//! The orchestration loop.
//!
//! One [`Tuner`] drives a campaign: it polls the [`Backend`], feeds results to
//! the aggregator and the scheduler, applies the scheduler's decisions, keeps
//! `n_workers` trials busy, evaluates the stopping criterion and checkpoints
//! periodically. Everything runs on a single task; parallelism lives in the
//! backend.

use chrono::Utc;
use crossbeam_channel::Sender;
use rw_clock::{Clock, TimeKeeper};
use rw_scheduler::{Scheduler, TrialSuggestion};
use rw_tracking::{TrialRegistry, TuningStatus};
use rw_types::constants::{DECISION, STATUS, TRIAL_ID, TUNER_TIME};
use rw_types::{
    config_error, internal_error, CheckpointError, Configuration, DataIntegrityError, Metrics,
    SchedulerDecision, Trial, TrialError, TrialId, TrialResult, TrialStatus, TuneError, TuneResult,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backend::{Backend, TrialReport};
use crate::checkpoint::{TunerCheckpoint, CHECKPOINT_VERSION};
use crate::config::TunerConfig;
use crate::events::{CancelToken, TunerEvent};

/// Why a campaign ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum TerminationReason {
    StoppingCriterion { cause: String },
    SearchSpaceExhausted,
    FailureThreshold { failures: usize, max_failures: usize },
    Cancelled,
    Error { message: String },
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StoppingCriterion { cause } => write!(f, "stopping criterion: {cause}"),
            Self::SearchSpaceExhausted => write!(f, "search space exhausted"),
            Self::FailureThreshold {
                failures,
                max_failures,
            } => write!(f, "{failures} trial failures (max_failures {max_failures})"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Error { message } => write!(f, "error: {message}"),
        }
    }
}

/// One processed result with what the tuner made of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub result: TrialResult,
    /// `None` if the trial was no longer running and the scheduler was not
    /// consulted.
    pub decision: Option<SchedulerDecision>,
    /// Registry status of the trial after the result was processed.
    pub status: TrialStatus,
}

impl ResultRecord {
    /// Flat row: the reported metrics plus the reserved bookkeeping keys.
    pub fn to_row(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut row: serde_json::Map<String, serde_json::Value> = self
            .result
            .metrics
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::json!(v)))
            .collect();
        row.insert(TRIAL_ID.to_string(), self.result.trial_id.into());
        row.insert(TUNER_TIME.to_string(), serde_json::json!(self.result.timestamp));
        row.insert(
            DECISION.to_string(),
            self.decision
                .map(|d| d.to_string().into())
                .unwrap_or(serde_json::Value::Null),
        );
        row.insert(STATUS.to_string(), self.status.to_string().into());
        row
    }
}

/// Final report of a campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningSummary {
    pub tuner_id: Uuid,
    pub tuner_name: String,
    pub termination_reason: TerminationReason,
    pub metric: String,
    pub best_trial_id: Option<TrialId>,
    pub best_config: Option<Configuration>,
    pub best_metric: Option<f64>,
    pub elapsed: f64,
    pub num_trials_started: usize,
    pub num_trials_completed: usize,
    pub num_trials_stopped: usize,
    pub num_trials_failed: usize,
    pub num_trials_paused: usize,
    pub num_results: usize,
    pub total_cost: f64,
}

impl fmt::Display for TuningSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "tuner {} ({})", self.tuner_name, self.tuner_id)?;
        writeln!(f, "  ended:     {}", self.termination_reason)?;
        writeln!(f, "  elapsed:   {:.1}s", self.elapsed)?;
        writeln!(
            f,
            "  trials:    {} started, {} completed, {} stopped, {} paused, {} failed",
            self.num_trials_started,
            self.num_trials_completed,
            self.num_trials_stopped,
            self.num_trials_paused,
            self.num_trials_failed
        )?;
        writeln!(f, "  results:   {} (cost {:.3})", self.num_results, self.total_cost)?;
        match (self.best_trial_id, self.best_metric, &self.best_config) {
            (Some(id), Some(value), Some(config)) => {
                write!(f, "  best:      trial {id} {} = {value:.6} {config}", self.metric)
            }
            _ => write!(f, "  best:      none"),
        }
    }
}

pub struct Tuner<B: Backend> {
    id: Uuid,
    config: TunerConfig,
    backend: B,
    scheduler: Scheduler,
    clock: Clock,
    registry: TrialRegistry,
    status: TuningStatus,
    results: Vec<ResultRecord>,
    num_failures: usize,
    elapsed_offset: f64,
    relaunch: Vec<TrialId>,
    search_exhausted: bool,
    last_checkpoint: f64,
    last_print: f64,
    events: Option<Sender<TunerEvent>>,
    cancel: CancelToken,
    termination: Option<TerminationReason>,
}

impl<B: Backend> Tuner<B> {
    pub fn new(
        backend: B,
        scheduler: Scheduler,
        config: TunerConfig,
        clock: Clock,
    ) -> TuneResult<Self> {
        config.validate()?;
        if scheduler.metric() != config.metric || scheduler.mode() != config.mode {
            return Err(config_error!(
                "scheduler optimizes {} ({:?}) but tuner reports {} ({:?})",
                scheduler.metric(),
                scheduler.mode(),
                config.metric,
                config.mode
            ));
        }
        let status = TuningStatus::new(vec![config.metric.clone()]);
        Ok(Self {
            id: Uuid::new_v4(),
            config,
            backend,
            scheduler,
            clock,
            registry: TrialRegistry::new(),
            status,
            results: Vec::new(),
            num_failures: 0,
            elapsed_offset: 0.0,
            relaunch: Vec::new(),
            search_exhausted: false,
            last_checkpoint: 0.0,
            last_print: 0.0,
            events: None,
            cancel: CancelToken::new(),
            termination: None,
        })
    }

    /// Continue the campaign stored in `checkpoint`. `scheduler` must be built
    /// from the same scheduler configuration as the interrupted campaign; its
    /// state is replaced by the checkpointed one. Trials that were running
    /// are relaunched when [`run`](Self::run) starts.
    pub fn from_checkpoint(
        backend: B,
        mut scheduler: Scheduler,
        config: TunerConfig,
        clock: Clock,
        checkpoint: TunerCheckpoint,
    ) -> TuneResult<Self> {
        if checkpoint.version != CHECKPOINT_VERSION {
            return Err(CheckpointError::VersionMismatch {
                found: checkpoint.version,
                expected: CHECKPOINT_VERSION,
            }
            .into());
        }
        if checkpoint.metric != config.metric || checkpoint.mode != config.mode {
            return Err(CheckpointError::Incompatible {
                message: format!(
                    "checkpoint optimizes {} ({:?}), configuration {} ({:?})",
                    checkpoint.metric, checkpoint.mode, config.metric, config.mode
                ),
            }
            .into());
        }
        if checkpoint.seed != config.seed {
            warn!(
                checkpoint_seed = checkpoint.seed,
                config_seed = config.seed,
                "seed differs from checkpoint; continuing with the checkpointed random state"
            );
        }
        checkpoint.registry.validate()?;
        scheduler.load_state(checkpoint.scheduler)?;

        let mut tuner = Self::new(backend, scheduler, config, clock)?;
        tuner.id = checkpoint.tuner_id;
        tuner.relaunch = checkpoint.registry.with_status(TrialStatus::InProgress);
        tuner.registry = checkpoint.registry;
        tuner.status = checkpoint.status;
        tuner.results = checkpoint.results;
        tuner.num_failures = checkpoint.num_failures;
        tuner.elapsed_offset = checkpoint.elapsed;
        tuner.last_checkpoint = checkpoint.elapsed;
        tuner.last_print = checkpoint.elapsed;
        info!(
            tuner_id = %tuner.id,
            trials = tuner.registry.len(),
            results = tuner.results.len(),
            elapsed = checkpoint.elapsed,
            "restored tuner from checkpoint"
        );
        Ok(tuner)
    }

    pub fn with_event_sender(mut self, sender: Sender<TunerEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn registry(&self) -> &TrialRegistry {
        &self.registry
    }

    pub fn status(&self) -> &TuningStatus {
        &self.status
    }

    pub fn results(&self) -> &[ResultRecord] {
        &self.results
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn num_failures(&self) -> usize {
        self.num_failures
    }

    fn emit(&self, event: TunerEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.try_send(event);
        }
    }

    /// Run the campaign to its end.
    ///
    /// Configuration, integrity and checkpoint errors, as well as reaching
    /// `max_failures`, end the campaign with an error; [`summary`](Self::summary)
    /// still reports what happened.
    pub async fn run(&mut self) -> TuneResult<TuningSummary> {
        self.clock.start_at(self.elapsed_offset);
        info!(
            tuner_id = %self.id,
            name = %self.config.tuner_name,
            scheduler = self.scheduler.policy_name(),
            searcher = self.scheduler.searcher().name(),
            n_workers = self.config.n_workers,
            metric = %self.config.metric,
            "starting tuning campaign"
        );

        let outcome = match self.relaunch_interrupted().await {
            Ok(()) => self.run_loop().await,
            Err(e) => Err(e),
        };
        let reason = match &outcome {
            Ok(reason) => reason.clone(),
            Err(TuneError::FailureThreshold {
                failures,
                max_failures,
            }) => TerminationReason::FailureThreshold {
                failures: *failures,
                max_failures: *max_failures,
            },
            Err(e) => TerminationReason::Error {
                message: e.to_string(),
            },
        };
        self.termination = Some(reason.clone());

        let shutdown = self.shutdown().await;
        self.emit(TunerEvent::Stopped {
            reason: reason.clone(),
        });
        let summary = self.summary();
        info!(reason = %reason, elapsed = summary.elapsed, "tuning campaign finished");
        info!("\n{summary}");

        match (outcome, shutdown) {
            (Err(e), Err(shutdown_err)) => {
                error!(error = %shutdown_err, "shutdown after failure also failed");
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
            (Ok(_), Err(e)) => Err(e),
            (Ok(_), Ok(())) => Ok(summary),
        }
    }

    async fn run_loop(&mut self) -> TuneResult<TerminationReason> {
        loop {
            if self.cancel.is_cancelled() {
                info!("cancellation requested");
                return Ok(TerminationReason::Cancelled);
            }

            let reports = match self.backend.fetch_new_results().await {
                Ok(reports) => reports,
                Err(TuneError::Trial(e)) => {
                    self.on_trial_error(e).await?;
                    Vec::new()
                }
                Err(e) => return Err(e),
            };
            self.process_reports(reports).await?;
            self.fill_workers().await?;

            let now = self.clock.time()?;
            self.status.update(&self.registry.snapshot(), &[]);
            self.status.set_wallclock_time(now);

            if let Some(cause) = self.config.stop_criterion.should_stop(&self.status) {
                info!(%cause, "stopping criterion met");
                return Ok(TerminationReason::StoppingCriterion { cause });
            }
            if self.search_exhausted && self.registry.num_running() == 0 {
                info!("search space exhausted and no trial is running");
                return Ok(TerminationReason::SearchSpaceExhausted);
            }

            self.maybe_checkpoint(now)?;
            self.maybe_print(now);

            let next_event = self.backend.next_event_time();
            self.clock.wait(self.config.sleep_time, next_event).await?;
        }
    }

    /// Trials that were running when the checkpoint was taken.
    async fn relaunch_interrupted(&mut self) -> TuneResult<()> {
        for trial_id in std::mem::take(&mut self.relaunch) {
            let config = self
                .registry
                .get(trial_id)
                .ok_or(DataIntegrityError::UnknownTrial { trial_id })?
                .config
                .clone();
            info!(trial_id, "relaunching interrupted trial");
            match self.backend.resume_trial(trial_id, &config).await {
                Ok(()) => self.emit(TunerEvent::TrialResumed { trial_id }),
                Err(e) => self.on_trial_error(e).await?,
            }
        }
        Ok(())
    }

    async fn process_reports(&mut self, reports: Vec<TrialReport>) -> TuneResult<()> {
        let mut new_results = Vec::new();
        let outcome = self.apply_reports(reports, &mut new_results).await;
        // results recorded before a failure still count
        self.status.update(&self.registry.snapshot(), &new_results);
        outcome
    }

    async fn apply_reports(
        &mut self,
        reports: Vec<TrialReport>,
        new_results: &mut Vec<(TrialId, Metrics)>,
    ) -> TuneResult<()> {
        // Trials paused or stopped during this poll. Their later reports were
        // produced before the decision and are dropped; a paused trial
        // recomputes those levels when resumed.
        let mut halted = BTreeSet::new();
        for report in reports {
            let trial_id = report.trial_id;
            if halted.contains(&trial_id) {
                debug!(
                    trial_id,
                    level = report.resource_level,
                    "dropping report of halted trial"
                );
                continue;
            }
            let trial = self
                .registry
                .get(trial_id)
                .cloned()
                .ok_or(DataIntegrityError::UnknownTrial { trial_id })?;

            if report.has_result() {
                let result = TrialResult {
                    trial_id,
                    resource_level: report.resource_level,
                    metrics: report.metrics.clone(),
                    timestamp: self.clock.time()?,
                };
                let decision = self.on_result(&trial, &result).await?;
                if matches!(
                    decision,
                    Some(SchedulerDecision::Pause | SchedulerDecision::Stop)
                ) {
                    halted.insert(trial_id);
                }
                new_results.push((trial_id, result.metrics.clone()));
                self.results.push(ResultRecord {
                    result,
                    decision,
                    status: self.registry.status(trial_id).ok_or_else(|| {
                        internal_error!("trial {trial_id} left the registry")
                    })?,
                });
            }
            self.on_backend_status(&trial, &report).await?;
        }
        Ok(())
    }

    /// Feed one result to the scheduler and apply its decision. Results of
    /// trials that are no longer running are recorded but not scheduled.
    async fn on_result(
        &mut self,
        trial: &Trial,
        result: &TrialResult,
    ) -> TuneResult<Option<SchedulerDecision>> {
        let trial_id = trial.trial_id;
        if self.registry.status(trial_id) != Some(TrialStatus::InProgress) {
            debug!(trial_id, level = result.resource_level, "result of inactive trial");
            return Ok(None);
        }
        let decision = self.scheduler.on_trial_result(trial, result)?;
        self.emit(TunerEvent::TrialDecision {
            trial_id,
            resource_level: result.resource_level,
            decision,
        });
        match decision {
            SchedulerDecision::Continue => {}
            SchedulerDecision::Stop => {
                info!(trial_id, level = result.resource_level, "stopping trial");
                self.backend.stop_trial(trial_id).await?;
                self.registry.set_status(trial_id, TrialStatus::Stopped)?;
                self.scheduler.on_trial_finished(trial_id);
                self.emit(TunerEvent::TrialFinished {
                    trial_id,
                    status: TrialStatus::Stopped,
                });
            }
            SchedulerDecision::Pause => {
                info!(trial_id, level = result.resource_level, "pausing trial");
                self.backend.pause_trial(trial_id, result.resource_level).await?;
                self.registry.set_status(trial_id, TrialStatus::Paused)?;
            }
        }
        Ok(Some(decision))
    }

    /// Apply the status the backend reported. Only running trials change:
    /// a trial the tuner already stopped or paused keeps that status.
    async fn on_backend_status(&mut self, trial: &Trial, report: &TrialReport) -> TuneResult<()> {
        let trial_id = trial.trial_id;
        let current = self.registry.status(trial_id);
        match report.status {
            TrialStatus::InProgress => Ok(()),
            TrialStatus::Failed => {
                if current.is_some_and(|s| s.is_terminal()) {
                    return Ok(());
                }
                let message = report
                    .error
                    .clone()
                    .unwrap_or_else(|| "trial failed".to_string());
                self.on_trial_error(TrialError::ExecutionFailed { trial_id, message })
                    .await
            }
            status => {
                if current != Some(TrialStatus::InProgress) {
                    debug!(trial_id, reported = %status, "ignoring status of inactive trial");
                    return Ok(());
                }
                self.registry.set_status(trial_id, status)?;
                if status.is_terminal() {
                    self.scheduler.on_trial_finished(trial_id);
                }
                info!(trial_id, status = %status, "trial finished");
                self.emit(TunerEvent::TrialFinished { trial_id, status });
                Ok(())
            }
        }
    }

    /// Count a recoverable trial failure; abort once `max_failures` is hit.
    async fn on_trial_error(&mut self, err: TrialError) -> TuneResult<()> {
        let trial_id = err.trial_id();
        self.num_failures += 1;
        warn!(
            trial_id,
            error = %err,
            failures = self.num_failures,
            max_failures = self.config.max_failures,
            "trial failed"
        );
        if self
            .registry
            .status(trial_id)
            .is_some_and(|s| !s.is_terminal())
        {
            self.registry.set_status(trial_id, TrialStatus::Failed)?;
        }
        self.scheduler.on_trial_finished(trial_id);
        self.emit(TunerEvent::TrialFailed {
            trial_id,
            message: err.to_string(),
            failures: self.num_failures,
        });
        if self.num_failures >= self.config.max_failures {
            error!(
                failures = self.num_failures,
                "failure threshold reached, stopping all trials"
            );
            self.backend.stop_all().await?;
            return Err(TuneError::FailureThreshold {
                failures: self.num_failures,
                max_failures: self.config.max_failures,
            });
        }
        Ok(())
    }

    /// Top up to `n_workers` running trials; promotions come first.
    async fn fill_workers(&mut self) -> TuneResult<()> {
        while self.registry.num_running() < self.config.n_workers {
            let can_start = !self.search_exhausted
                && self.config.stop_criterion.allows_new_trial(&self.status);
            let suggestion = if can_start {
                self.scheduler.suggest()
            } else {
                self.scheduler.next_promotion().map(TrialSuggestion::Resume)
            };
            match suggestion {
                None => {
                    if can_start {
                        info!(
                            trials = self.registry.len(),
                            "searcher has no new configuration"
                        );
                        self.search_exhausted = true;
                    }
                    return Ok(());
                }
                Some(TrialSuggestion::Start(config)) => self.start_trial(config).await?,
                Some(TrialSuggestion::Resume(trial_id)) => self.resume_trial(trial_id).await?,
            }
        }
        Ok(())
    }

    async fn start_trial(&mut self, config: Configuration) -> TuneResult<()> {
        let trial = self.registry.create(config, self.clock.time_stamp()?);
        self.scheduler.on_trial_add(&trial)?;
        // keep num_trials_started current for the admission check
        self.status.update(&self.registry.snapshot(), &[]);
        match self.backend.start_trial(&trial).await {
            Ok(()) => {
                info!(trial_id = trial.trial_id, config = %trial.config, "started trial");
                self.emit(TunerEvent::TrialStarted {
                    trial_id: trial.trial_id,
                    config: trial.config,
                });
                Ok(())
            }
            Err(e) => self.on_trial_error(e).await,
        }
    }

    async fn resume_trial(&mut self, trial_id: TrialId) -> TuneResult<()> {
        let config = self
            .registry
            .get(trial_id)
            .ok_or(DataIntegrityError::UnknownTrial { trial_id })?
            .config
            .clone();
        self.registry.set_status(trial_id, TrialStatus::InProgress)?;
        match self.backend.resume_trial(trial_id, &config).await {
            Ok(()) => {
                info!(trial_id, "resumed paused trial");
                self.emit(TunerEvent::TrialResumed { trial_id });
                Ok(())
            }
            Err(e) => self.on_trial_error(e).await,
        }
    }

    fn maybe_checkpoint(&mut self, now: f64) -> TuneResult<()> {
        if self.config.checkpoint_path.is_some()
            && now - self.last_checkpoint >= self.config.results_update_interval
        {
            self.save_checkpoint()?;
            self.last_checkpoint = now;
        }
        Ok(())
    }

    fn maybe_print(&mut self, now: f64) {
        if now - self.last_print >= self.config.print_update_interval {
            info!("\n{}", self.status);
            self.last_print = now;
        }
    }

    /// Snapshot of the whole campaign.
    pub fn checkpoint(&self) -> TuneResult<TunerCheckpoint> {
        Ok(TunerCheckpoint {
            version: CHECKPOINT_VERSION,
            tuner_id: self.id,
            tuner_name: self.config.tuner_name.clone(),
            created_at: Utc::now(),
            seed: self.config.seed,
            metric: self.config.metric.clone(),
            mode: self.config.mode,
            elapsed: self.clock.time()?,
            num_failures: self.num_failures,
            registry: self.registry.clone(),
            results: self.results.clone(),
            scheduler: self.scheduler.state()?,
            status: self.status.clone(),
        })
    }

    /// Write a checkpoint to `checkpoint_path`, if configured.
    pub fn save_checkpoint(&self) -> TuneResult<()> {
        let Some(path) = &self.config.checkpoint_path else {
            return Ok(());
        };
        let checkpoint = self.checkpoint()?;
        checkpoint.save(path)?;
        self.emit(TunerEvent::CheckpointSaved {
            path: path.clone(),
            elapsed: checkpoint.elapsed,
        });
        Ok(())
    }

    async fn shutdown(&mut self) -> TuneResult<()> {
        self.backend.stop_all().await?;
        if let Ok(now) = self.clock.time() {
            self.status.set_wallclock_time(now);
        }
        self.save_checkpoint()
    }

    /// Campaign summary. Before the campaign has ended the termination
    /// reason reads as cancelled.
    pub fn summary(&self) -> TuningSummary {
        let metric = &self.config.metric;
        let best = self.status.best_metric(metric, self.config.mode);
        let best_config = best
            .and_then(|(trial_id, _)| self.registry.get(trial_id))
            .map(|t| t.config.clone());
        TuningSummary {
            tuner_id: self.id,
            tuner_name: self.config.tuner_name.clone(),
            termination_reason: self
                .termination
                .clone()
                .unwrap_or(TerminationReason::Cancelled),
            metric: metric.clone(),
            best_trial_id: best.map(|(id, _)| id),
            best_config,
            best_metric: best.map(|(_, v)| v),
            elapsed: self.clock.time().unwrap_or(self.status.wallclock_time()),
            num_trials_started: self.registry.len(),
            num_trials_completed: self.registry.count(TrialStatus::Completed),
            num_trials_stopped: self.registry.count(TrialStatus::Stopped),
            num_trials_failed: self.registry.count(TrialStatus::Failed),
            num_trials_paused: self.registry.count(TrialStatus::Paused),
            num_results: self.results.len(),
            total_cost: self.status.total_cost(),
        }
    }
}
