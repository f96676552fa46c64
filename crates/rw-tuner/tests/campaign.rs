use rw_clock::{Clock, SimulatedTimeKeeper};
use rw_scheduler::{HyperbandConfig, HyperbandType, SchedulerConfig, SearchSpace, SearcherConfig};
use rw_tuner::{
    Benchmark, CancelToken, HeightBenchmark, SimulatedBackend, StoppingCriterion,
    TerminationReason, Tuner, TunerCheckpoint, TunerConfig, TunerEvent,
};
use rw_types::{
    Configuration, DataIntegrityError, MetricMode, Metrics, ParameterValue, SchedulerDecision,
    TrialId, TrialStatus, TuneError,
};
use std::collections::{BTreeMap, BTreeSet};

const METRIC: &str = "mean_loss";

fn space(steps: i64) -> SearchSpace {
    SearchSpace::new()
        .add_constant("steps", steps)
        .add_int("width", 0, 20)
        .add_int("height", -100, 100)
}

fn bench() -> HeightBenchmark {
    HeightBenchmark {
        step_time: 1.0,
        ..Default::default()
    }
}

fn simulated<B: Benchmark>(benchmark: B) -> (SimulatedBackend<B>, Clock) {
    let keeper = SimulatedTimeKeeper::new();
    let backend = SimulatedBackend::new(benchmark, keeper.clone()).with_overhead_charging(false);
    (backend, Clock::simulated(keeper))
}

fn tuner_config(n_workers: usize, criterion: StoppingCriterion) -> TunerConfig {
    TunerConfig::new(METRIC, MetricMode::Min)
        .with_name("test")
        .with_workers(n_workers)
        .with_sleep_time(1.0)
        .with_seed(7)
        .with_stop_criterion(criterion)
}

fn tuner_for<B: Benchmark>(
    scheduler: &SchedulerConfig,
    config: TunerConfig,
    benchmark: B,
) -> Tuner<SimulatedBackend<B>> {
    let (backend, clock) = simulated(benchmark);
    let scheduler = scheduler
        .build(&config.metric, config.mode, config.seed)
        .unwrap();
    Tuner::new(backend, scheduler, config, clock).unwrap()
}

/// Reported resource levels per trial, in arrival order.
fn levels_by_trial<B: Benchmark>(tuner: &Tuner<SimulatedBackend<B>>) -> BTreeMap<TrialId, Vec<u64>> {
    let mut levels: BTreeMap<TrialId, Vec<u64>> = BTreeMap::new();
    for record in tuner.results() {
        levels
            .entry(record.result.trial_id)
            .or_default()
            .push(record.result.resource_level);
    }
    levels
}

#[tokio::test]
async fn fifo_runs_trials_to_completion() {
    let scheduler = SchedulerConfig::fifo(space(5));
    let config = tuner_config(2, StoppingCriterion::new().with_max_num_trials_completed(4));
    let mut tuner = tuner_for(&scheduler, config, bench());

    let summary = tuner.run().await.unwrap();

    assert!(matches!(
        summary.termination_reason,
        TerminationReason::StoppingCriterion { .. }
    ));
    assert_eq!(summary.num_trials_completed, 4);
    assert_eq!(summary.num_trials_failed, 0);
    assert!(tuner
        .results()
        .iter()
        .all(|r| r.decision == Some(SchedulerDecision::Continue)));

    let levels = levels_by_trial(&tuner);
    for trial_id in tuner.registry().with_status(TrialStatus::Completed) {
        assert_eq!(levels[&trial_id], vec![1, 2, 3, 4, 5]);
    }

    let best = tuner
        .results()
        .iter()
        .map(|r| r.result.metrics[METRIC])
        .fold(f64::INFINITY, f64::min);
    assert_eq!(summary.best_metric, Some(best));
    let best_id = summary.best_trial_id.unwrap();
    assert_eq!(
        summary.best_config.as_ref(),
        Some(&tuner.registry().get(best_id).unwrap().config)
    );
}

#[tokio::test]
async fn max_trials_started_caps_new_trials() {
    let scheduler = SchedulerConfig::fifo(space(5));
    let config = tuner_config(4, StoppingCriterion::new().with_max_num_trials_started(3));
    let mut tuner = tuner_for(&scheduler, config, bench());

    let summary = tuner.run().await.unwrap();

    assert_eq!(tuner.registry().len(), 3);
    assert_eq!(summary.num_trials_started, 3);
    match summary.termination_reason {
        TerminationReason::StoppingCriterion { cause } => {
            assert!(cause.contains("max_num_trials_started"), "{cause}")
        }
        other => panic!("unexpected termination: {other:?}"),
    }
}

#[tokio::test]
async fn stopping_hyperband_cuts_poor_trials() {
    let scheduler = SchedulerConfig::Hyperband(
        HyperbandConfig::new(space(9), 9)
            .with_reduction_factor(3)
            .with_grace_period(1),
    );
    let config = tuner_config(4, StoppingCriterion::new().with_max_num_trials_finished(12));
    let mut tuner = tuner_for(&scheduler, config, bench());

    let summary = tuner.run().await.unwrap();

    assert!(summary.num_trials_stopped > 0);
    assert!(summary.num_trials_completed + summary.num_trials_stopped >= 12);

    let levels = levels_by_trial(&tuner);
    for trial_id in tuner.registry().with_status(TrialStatus::Stopped) {
        let reported = &levels[&trial_id];
        assert!(*reported.last().unwrap() < 9);
    }
    // nothing is recorded after a stop decision
    let mut stopped = BTreeSet::new();
    for record in tuner.results() {
        assert!(!stopped.contains(&record.result.trial_id));
        if record.decision == Some(SchedulerDecision::Stop) {
            assert_eq!(record.status, TrialStatus::Stopped);
            stopped.insert(record.result.trial_id);
        }
    }
}

#[tokio::test]
async fn promotion_hyperband_resumes_paused_trials() {
    let scheduler = SchedulerConfig::Hyperband(
        HyperbandConfig::new(space(9), 9).with_type(HyperbandType::Promotion),
    );
    let config = tuner_config(
        2,
        StoppingCriterion::new()
            .with_max_num_trials_completed(4)
            .with_max_wallclock_time(2000.0),
    );
    let (tx, rx) = crossbeam_channel::unbounded();
    let mut tuner = tuner_for(&scheduler, config, bench()).with_event_sender(tx);

    tuner.run().await.unwrap();

    let events: Vec<TunerEvent> = rx.try_iter().collect();
    let resumed: Vec<TrialId> = events
        .iter()
        .filter_map(|e| match e {
            TunerEvent::TrialResumed { trial_id } => Some(*trial_id),
            _ => None,
        })
        .collect();
    assert!(!resumed.is_empty());

    let paused: BTreeSet<TrialId> = tuner
        .results()
        .iter()
        .filter(|r| r.decision == Some(SchedulerDecision::Pause))
        .map(|r| r.result.trial_id)
        .collect();
    assert!(resumed.iter().all(|id| paused.contains(id)));

    // a resumed trial picks up at the next level instead of starting over
    for (trial_id, reported) in levels_by_trial(&tuner) {
        let expected: Vec<u64> = (1..=reported.len() as u64).collect();
        assert_eq!(reported, expected, "trial {trial_id}");
    }
    assert!(matches!(
        events.last(),
        Some(TunerEvent::Stopped {
            reason: TerminationReason::StoppingCriterion { .. }
        })
    ));
}

/// Height benchmark whose trials all break at level 2.
#[derive(Debug)]
struct BrokenAtLevelTwo(HeightBenchmark);

impl Benchmark for BrokenAtLevelTwo {
    fn max_resource_level(&self, config: &Configuration) -> u64 {
        self.0.max_resource_level(config)
    }

    fn level_duration(&self, config: &Configuration, level: u64) -> f64 {
        self.0.level_duration(config, level)
    }

    fn evaluate(&self, config: &Configuration, level: u64) -> Result<Metrics, String> {
        if level >= 2 {
            return Err("diverged".to_string());
        }
        self.0.evaluate(config, level)
    }
}

#[tokio::test]
async fn failure_threshold_aborts_the_campaign() {
    let scheduler = SchedulerConfig::fifo(space(5));
    let config = tuner_config(2, StoppingCriterion::new().with_max_wallclock_time(100.0))
        .with_max_failures(3);
    let (tx, rx) = crossbeam_channel::unbounded();
    let mut tuner = tuner_for(&scheduler, config, BrokenAtLevelTwo(bench())).with_event_sender(tx);

    let err = tuner.run().await.unwrap_err();

    assert!(matches!(
        err,
        TuneError::FailureThreshold {
            failures: 3,
            max_failures: 3
        }
    ));
    assert_eq!(tuner.num_failures(), 3);
    assert_eq!(tuner.registry().count(TrialStatus::Failed), 3);
    assert_eq!(
        tuner.summary().termination_reason,
        TerminationReason::FailureThreshold {
            failures: 3,
            max_failures: 3
        }
    );
    let failed_events = rx
        .try_iter()
        .filter(|e| matches!(e, TunerEvent::TrialFailed { .. }))
        .count();
    assert_eq!(failed_events, 3);
}

/// Height benchmark where configurations with `width == 1` fail at once.
#[derive(Debug)]
struct WidthOneFails(HeightBenchmark);

impl Benchmark for WidthOneFails {
    fn max_resource_level(&self, config: &Configuration) -> u64 {
        self.0.max_resource_level(config)
    }

    fn level_duration(&self, config: &Configuration, level: u64) -> f64 {
        self.0.level_duration(config, level)
    }

    fn evaluate(&self, config: &Configuration, level: u64) -> Result<Metrics, String> {
        if config.get("width").and_then(ParameterValue::as_f64) == Some(1.0) {
            return Err("width 1 is unstable".to_string());
        }
        self.0.evaluate(config, level)
    }
}

#[tokio::test]
async fn results_before_the_fatal_failure_are_aggregated() {
    let grid = SearchSpace::new()
        .add_constant("steps", 5_i64)
        .add_int("width", 0, 1)
        .add_constant("height", 3_i64);
    let scheduler = SchedulerConfig::Fifo(rw_scheduler::FifoConfig {
        search_space: grid,
        searcher: SearcherConfig::Grid { float_steps: 2 },
    });
    let config = tuner_config(2, StoppingCriterion::new()).with_max_failures(1);
    let mut tuner = tuner_for(&scheduler, config, WidthOneFails(bench()));

    let err = tuner.run().await.unwrap_err();
    assert!(matches!(err, TuneError::FailureThreshold { failures: 1, .. }));

    // the healthy trial's level 1 arrived in the same poll as the failure
    assert_eq!(tuner.results().len(), 1);
    let accepted = &tuner.results()[0].result;
    assert!(tuner
        .status()
        .trial_metric_statistics
        .contains_key(&accepted.trial_id));
    let summary = tuner.summary();
    assert_eq!(summary.best_trial_id, Some(accepted.trial_id));
    assert_eq!(summary.best_metric, Some(accepted.metrics[METRIC]));
}

/// Height benchmark whose objective is always NaN.
#[derive(Debug)]
struct Diverging(HeightBenchmark);

impl Benchmark for Diverging {
    fn max_resource_level(&self, config: &Configuration) -> u64 {
        self.0.max_resource_level(config)
    }

    fn level_duration(&self, config: &Configuration, level: u64) -> f64 {
        self.0.level_duration(config, level)
    }

    fn evaluate(&self, config: &Configuration, level: u64) -> Result<Metrics, String> {
        let mut metrics = self.0.evaluate(config, level)?;
        metrics.insert(self.0.metric.clone(), f64::NAN);
        Ok(metrics)
    }
}

#[tokio::test]
async fn nan_metrics_survive_the_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("campaign.json");
    let scheduler = SchedulerConfig::Hyperband(
        HyperbandConfig::new(space(3), 3).with_reduction_factor(3),
    );
    let config = tuner_config(2, StoppingCriterion::new().with_max_num_trials_completed(1))
        .with_checkpoint_path(&path);
    let mut tuner = tuner_for(&scheduler, config.clone(), Diverging(bench()));

    let summary = tuner.run().await.unwrap();
    assert_eq!(summary.best_metric, None);

    let checkpoint = TunerCheckpoint::load(&path).unwrap();
    assert_eq!(checkpoint.results.len(), tuner.results().len());
    assert!(checkpoint
        .results
        .iter()
        .all(|r| r.result.metrics[METRIC].is_nan()));
    let rung_values: Vec<f64> = checkpoint
        .scheduler
        .hyperband
        .as_ref()
        .unwrap()
        .rungs
        .rungs()
        .flat_map(|rung| rung.occupants().iter().map(|e| e.value))
        .collect();
    assert!(!rung_values.is_empty());
    assert!(rung_values.iter().all(|v| v.is_nan()));
    assert!(checkpoint
        .status
        .trial_metric_statistics
        .values()
        .all(|stats| stats.last_metrics[METRIC].is_nan()));

    let (backend, clock) = simulated(Diverging(bench()));
    let rebuilt = scheduler
        .build(&config.metric, config.mode, config.seed)
        .unwrap();
    assert!(Tuner::from_checkpoint(backend, rebuilt, config, clock, checkpoint).is_ok());
}

#[tokio::test]
async fn hyperband_checkpoint_restores_scheduler_and_status() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("campaign.json");
    let scheduler = SchedulerConfig::Hyperband(
        HyperbandConfig::new(space(9), 9)
            .with_type(HyperbandType::Promotion)
            .with_brackets(2, false),
    );
    let first = tuner_config(3, StoppingCriterion::new().with_max_num_trials_completed(2))
        .with_checkpoint_path(&path);
    let mut tuner = tuner_for(&scheduler, first.clone(), bench());
    tuner.run().await.unwrap();

    let checkpoint = TunerCheckpoint::load(&path).unwrap();
    let saved_scheduler = tuner.scheduler().state().unwrap();
    assert!(saved_scheduler.hyperband.is_some());
    assert_eq!(checkpoint.scheduler, saved_scheduler);
    assert_eq!(&checkpoint.status, tuner.status());

    let second = first.with_stop_criterion(StoppingCriterion::new().with_max_num_trials_completed(4));
    let (backend, clock) = simulated(bench());
    let rebuilt = scheduler
        .build(&second.metric, second.mode, second.seed)
        .unwrap();
    let mut resumed = Tuner::from_checkpoint(backend, rebuilt, second, clock, checkpoint).unwrap();
    assert_eq!(resumed.scheduler().state().unwrap(), saved_scheduler);
    assert_eq!(resumed.status(), tuner.status());

    let summary = resumed.run().await.unwrap();
    assert!(summary.num_trials_completed >= 4);
    for (trial_id, reported) in levels_by_trial(&resumed) {
        assert!(
            reported.windows(2).all(|w| w[1] == w[0] + 1 || w[1] == 1),
            "trial {trial_id}: {reported:?}"
        );
    }
}

#[tokio::test]
async fn pause_discards_levels_computed_past_the_decision() {
    // zero-length levels: a trial reports several levels in one poll
    let instant = HeightBenchmark {
        step_time: 0.0,
        ..Default::default()
    };
    let scheduler = SchedulerConfig::Hyperband(
        HyperbandConfig::new(space(9), 9).with_type(HyperbandType::Promotion),
    );
    let config = tuner_config(3, StoppingCriterion::new().with_max_num_trials_started(30));
    let mut tuner = tuner_for(&scheduler, config, instant);

    tuner.run().await.unwrap();

    let mut last_decision: BTreeMap<TrialId, Option<SchedulerDecision>> = BTreeMap::new();
    for record in tuner.results() {
        last_decision.insert(record.result.trial_id, record.decision);
        assert!(record.decision.is_some(), "unscheduled result {record:?}");
    }
    for (trial_id, reported) in levels_by_trial(&tuner) {
        let expected: Vec<u64> = (1..=reported.len() as u64).collect();
        assert_eq!(reported, expected, "trial {trial_id}");
    }
    let paused = tuner.registry().with_status(TrialStatus::Paused);
    assert!(!paused.is_empty());
    for trial_id in paused {
        assert_eq!(last_decision[&trial_id], Some(SchedulerDecision::Pause));
    }
}

#[tokio::test]
async fn grid_search_ends_when_exhausted() {
    let grid = SearchSpace::new()
        .add_constant("steps", 3_i64)
        .add_int("width", 0, 2)
        .add_int("height", 0, 1);
    let scheduler = SchedulerConfig::Fifo(rw_scheduler::FifoConfig {
        search_space: grid,
        searcher: SearcherConfig::Grid { float_steps: 2 },
    });
    let mut tuner = tuner_for(&scheduler, tuner_config(4, StoppingCriterion::new()), bench());

    let summary = tuner.run().await.unwrap();

    assert_eq!(summary.termination_reason, TerminationReason::SearchSpaceExhausted);
    assert_eq!(summary.num_trials_started, 6);
    assert_eq!(summary.num_trials_completed, 6);
    assert_eq!(summary.num_results, 18);
    let configs: Vec<&Configuration> = tuner.registry().all().map(|t| &t.config).collect();
    for (i, a) in configs.iter().enumerate() {
        assert!(configs[i + 1..].iter().all(|b| !a.identical(b)));
    }
}

#[tokio::test]
async fn checkpoint_resume_continues_the_campaign() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("campaign.json");
    let scheduler = SchedulerConfig::fifo(space(5));

    let first = tuner_config(2, StoppingCriterion::new().with_max_num_trials_completed(2))
        .with_checkpoint_path(&path);
    let mut tuner = tuner_for(&scheduler, first.clone(), bench());
    tuner.run().await.unwrap();

    let checkpoint = TunerCheckpoint::load(&path).unwrap();
    assert_eq!(checkpoint.tuner_id, tuner.id());
    assert_eq!(&checkpoint.registry, tuner.registry());
    assert_eq!(checkpoint.results.as_slice(), tuner.results());
    let interrupted = checkpoint.registry.with_status(TrialStatus::InProgress);
    let elapsed = checkpoint.elapsed;
    let first_results = checkpoint.results.len();
    let first_trials = checkpoint.registry.len();

    let second = first.with_stop_criterion(StoppingCriterion::new().with_max_num_trials_completed(4));
    let (backend, clock) = simulated(bench());
    let rebuilt = scheduler
        .build(&second.metric, second.mode, second.seed)
        .unwrap();
    let mut resumed = Tuner::from_checkpoint(backend, rebuilt, second, clock, checkpoint).unwrap();
    let summary = resumed.run().await.unwrap();

    assert_eq!(summary.tuner_id, tuner.id());
    assert!(summary.num_trials_completed >= 4);
    assert!(resumed.results().len() > first_results);
    assert!(resumed.registry().len() >= first_trials);
    assert!(resumed.results()[first_results..]
        .iter()
        .all(|r| r.result.timestamp > elapsed));
    for trial_id in interrupted {
        assert_eq!(
            resumed.registry().status(trial_id),
            Some(TrialStatus::Completed)
        );
    }
}

#[tokio::test]
async fn checkpoint_of_another_metric_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("campaign.json");
    let scheduler = SchedulerConfig::fifo(space(3));
    let config = tuner_config(1, StoppingCriterion::new().with_max_num_trials_completed(1))
        .with_checkpoint_path(&path);
    tuner_for(&scheduler, config, bench()).run().await.unwrap();

    let checkpoint = TunerCheckpoint::load(&path).unwrap();
    let other = TunerConfig::new("accuracy", MetricMode::Max);
    let (backend, clock) = simulated(bench());
    let rebuilt = scheduler.build("accuracy", MetricMode::Max, 0).unwrap();
    let err = Tuner::from_checkpoint(backend, rebuilt, other, clock, checkpoint)
        .err()
        .unwrap();
    assert!(matches!(
        err,
        TuneError::Checkpoint(rw_types::CheckpointError::Incompatible { .. })
    ));
}

#[tokio::test]
async fn cancelled_tuner_stops_before_starting_trials() {
    let scheduler = SchedulerConfig::fifo(space(5));
    let token = CancelToken::new();
    let mut tuner = tuner_for(&scheduler, tuner_config(2, StoppingCriterion::new()), bench())
        .with_cancel_token(token.clone());
    token.cancel();

    let summary = tuner.run().await.unwrap();

    assert_eq!(summary.termination_reason, TerminationReason::Cancelled);
    assert!(tuner.registry().is_empty());
}

#[tokio::test]
async fn missing_metric_is_fatal() {
    let scheduler = SchedulerConfig::Hyperband(HyperbandConfig::new(space(9), 9));
    let config = TunerConfig::new("accuracy", MetricMode::Max).with_workers(1);
    let mut tuner = tuner_for(&scheduler, config, bench());

    let err = tuner.run().await.unwrap_err();

    assert!(matches!(
        err,
        TuneError::DataIntegrity(DataIntegrityError::MissingMetric { .. })
    ));
    assert!(matches!(
        tuner.summary().termination_reason,
        TerminationReason::Error { .. }
    ));
}

#[test]
fn scheduler_and_tuner_must_agree_on_the_metric() {
    let (backend, clock) = simulated(bench());
    let scheduler = SchedulerConfig::fifo(space(3))
        .build("loss", MetricMode::Min, 0)
        .unwrap();
    let err = Tuner::new(backend, scheduler, TunerConfig::default(), clock)
        .err()
        .unwrap();
    assert!(matches!(err, TuneError::Config(_)));
}
