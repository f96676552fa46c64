//! Running metric statistics over all reported results.

use rw_types::constants::WORKER_COST;
use rw_types::{MetricMode, Metrics, TrialId, TrialStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::registry::TrialStatusSnapshot;

/// Running max / min / sum / last value per metric name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricStatistics {
    #[serde(with = "rw_types::float_serde::map")]
    pub max_metrics: BTreeMap<String, f64>,
    #[serde(with = "rw_types::float_serde::map")]
    pub min_metrics: BTreeMap<String, f64>,
    #[serde(with = "rw_types::float_serde::map")]
    pub sum_metrics: BTreeMap<String, f64>,
    #[serde(with = "rw_types::float_serde::map")]
    pub last_metrics: BTreeMap<String, f64>,
    pub count: usize,
}

impl MetricStatistics {
    pub fn add(&mut self, metrics: &Metrics) {
        for (name, &value) in metrics {
            self.max_metrics
                .entry(name.clone())
                .and_modify(|m| *m = m.max(value))
                .or_insert(value);
            self.min_metrics
                .entry(name.clone())
                .and_modify(|m| *m = m.min(value))
                .or_insert(value);
            *self.sum_metrics.entry(name.clone()).or_insert(0.0) += value;
            self.last_metrics.insert(name.clone(), value);
        }
        self.count += 1;
    }
}

/// Campaign-wide tuning statistics.
///
/// Only [`update`](Self::update) mutates the statistics; the tuner loop calls
/// it exactly once per delivered result (re-delivering a result double
/// counts).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TuningStatus {
    metric_names: Vec<String>,
    pub overall_metric_statistics: MetricStatistics,
    pub trial_metric_statistics: BTreeMap<TrialId, MetricStatistics>,
    trial_statuses: BTreeMap<TrialId, TrialStatus>,
    num_trials_started: usize,
    wallclock_time: f64,
}

impl TuningStatus {
    /// `metric_names` only controls what the status table prints; every
    /// reported metric is tracked.
    pub fn new(metric_names: Vec<String>) -> Self {
        Self {
            metric_names,
            ..Default::default()
        }
    }

    /// Fold a batch of new results into the statistics.
    ///
    /// `trial_status_dict` is the registry snapshot: trials appearing in it
    /// for the first time count towards `num_trials_started`. Results are
    /// processed in input order.
    pub fn update(
        &mut self,
        trial_status_dict: &TrialStatusSnapshot,
        new_results: &[(TrialId, Metrics)],
    ) {
        for (trial_id, (_, status)) in trial_status_dict {
            if self.trial_statuses.insert(*trial_id, *status).is_none() {
                self.num_trials_started += 1;
            }
        }
        for (trial_id, metrics) in new_results {
            self.trial_metric_statistics
                .entry(*trial_id)
                .or_default()
                .add(metrics);
            self.overall_metric_statistics.add(metrics);
        }
    }

    pub fn set_wallclock_time(&mut self, seconds: f64) {
        self.wallclock_time = seconds;
    }

    pub fn wallclock_time(&self) -> f64 {
        self.wallclock_time
    }

    pub fn metric_names(&self) -> &[String] {
        &self.metric_names
    }

    pub fn num_trials_started(&self) -> usize {
        self.num_trials_started
    }

    fn count(&self, status: TrialStatus) -> usize {
        self.trial_statuses.values().filter(|s| **s == status).count()
    }

    pub fn num_trials_completed(&self) -> usize {
        self.count(TrialStatus::Completed)
    }

    pub fn num_trials_failed(&self) -> usize {
        self.count(TrialStatus::Failed)
    }

    pub fn num_trials_stopped(&self) -> usize {
        self.count(TrialStatus::Stopped)
    }

    pub fn num_trials_paused(&self) -> usize {
        self.count(TrialStatus::Paused)
    }

    pub fn num_trials_running(&self) -> usize {
        self.count(TrialStatus::InProgress)
    }

    /// Trials in a terminal status.
    pub fn num_trials_finished(&self) -> usize {
        self.trial_statuses.values().filter(|s| s.is_terminal()).count()
    }

    /// Sum over trials of their last reported cumulative cost.
    pub fn total_cost(&self) -> f64 {
        self.trial_metric_statistics
            .values()
            .filter_map(|s| s.last_metrics.get(WORKER_COST))
            .sum()
    }

    /// Best trial for `metric_name`.
    ///
    /// Each trial is represented by its own extreme (minimum in `min` mode,
    /// maximum in `max` mode), so a trial's best report counts even if later
    /// reports regressed. Ties go to the lowest trial id.
    pub fn best_metric(&self, metric_name: &str, mode: MetricMode) -> Option<(TrialId, f64)> {
        let mut best: Option<(TrialId, f64)> = None;
        for (trial_id, stats) in &self.trial_metric_statistics {
            let extreme = match mode {
                MetricMode::Min => stats.min_metrics.get(metric_name),
                MetricMode::Max => stats.max_metrics.get(metric_name),
            };
            let Some(&value) = extreme else { continue };
            if value.is_nan() {
                continue;
            }
            match best {
                Some((_, incumbent)) if !mode.is_better(value, incumbent) => {}
                _ => best = Some((*trial_id, value)),
            }
        }
        best
    }
}

impl fmt::Display for TuningStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "tuning status (wallclock {:.1}s): {} started, {} running, {} paused, {} completed, {} stopped, {} failed, cost {:.3}",
            self.wallclock_time,
            self.num_trials_started,
            self.num_trials_running(),
            self.num_trials_paused(),
            self.num_trials_completed(),
            self.num_trials_stopped(),
            self.num_trials_failed(),
            self.total_cost(),
        )?;
        write!(f, "{:>8} {:>12} {:>8}", "trial_id", "status", "reports")?;
        for name in &self.metric_names {
            write!(f, " {name:>14}")?;
        }
        writeln!(f)?;
        for (trial_id, status) in &self.trial_statuses {
            let stats = self.trial_metric_statistics.get(trial_id);
            let reports = stats.map(|s| s.count).unwrap_or(0);
            write!(f, "{trial_id:>8} {:>12} {reports:>8}", status.to_string())?;
            for name in &self.metric_names {
                match stats.and_then(|s| s.last_metrics.get(name)) {
                    Some(v) => write!(f, " {v:>14.4}")?,
                    None => write!(f, " {:>14}", "-")?,
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
