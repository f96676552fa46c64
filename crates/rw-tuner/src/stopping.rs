//! Campaign stopping criterion.

use rw_tracking::TuningStatus;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Named thresholds over the tuning status. Every threshold is optional; the
/// criterion fires as soon as any one of them is reached.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoppingCriterion {
    /// Seconds of campaign time.
    pub max_wallclock_time: Option<f64>,
    pub max_num_trials_started: Option<usize>,
    pub max_num_trials_completed: Option<usize>,
    /// Trials in a terminal status (completed, stopped or failed).
    pub max_num_trials_finished: Option<usize>,
    pub max_cost: Option<f64>,
    /// Stop once any result reaches at least this value of the metric.
    pub max_metric_value: Option<BTreeMap<String, f64>>,
    /// Stop once any result reaches at most this value of the metric.
    pub min_metric_value: Option<BTreeMap<String, f64>>,
}

impl StoppingCriterion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_wallclock_time(mut self, seconds: f64) -> Self {
        self.max_wallclock_time = Some(seconds);
        self
    }

    pub fn with_max_num_trials_started(mut self, n: usize) -> Self {
        self.max_num_trials_started = Some(n);
        self
    }

    pub fn with_max_num_trials_completed(mut self, n: usize) -> Self {
        self.max_num_trials_completed = Some(n);
        self
    }

    pub fn with_max_num_trials_finished(mut self, n: usize) -> Self {
        self.max_num_trials_finished = Some(n);
        self
    }

    pub fn with_max_cost(mut self, cost: f64) -> Self {
        self.max_cost = Some(cost);
        self
    }

    pub fn with_max_metric_value(mut self, metric: impl Into<String>, value: f64) -> Self {
        self.max_metric_value
            .get_or_insert_with(BTreeMap::new)
            .insert(metric.into(), value);
        self
    }

    pub fn with_min_metric_value(mut self, metric: impl Into<String>, value: f64) -> Self {
        self.min_metric_value
            .get_or_insert_with(BTreeMap::new)
            .insert(metric.into(), value);
        self
    }

    /// `true` if no threshold is set: the campaign only ends when the search
    /// space is exhausted.
    pub fn is_unbounded(&self) -> bool {
        *self == Self::default()
    }

    /// Whether another trial may be started without exceeding
    /// `max_num_trials_started`.
    pub fn allows_new_trial(&self, status: &TuningStatus) -> bool {
        self.max_num_trials_started
            .map_or(true, |max| status.num_trials_started() < max)
    }

    /// Description of the first threshold reached, if any.
    pub fn should_stop(&self, status: &TuningStatus) -> Option<String> {
        if let Some(max) = self.max_wallclock_time {
            if status.wallclock_time() >= max {
                return Some(format!(
                    "max_wallclock_time {max}s reached ({:.1}s)",
                    status.wallclock_time()
                ));
            }
        }
        let counts = [
            (
                "max_num_trials_started",
                self.max_num_trials_started,
                status.num_trials_started(),
            ),
            (
                "max_num_trials_completed",
                self.max_num_trials_completed,
                status.num_trials_completed(),
            ),
            (
                "max_num_trials_finished",
                self.max_num_trials_finished,
                status.num_trials_finished(),
            ),
        ];
        for (name, max, actual) in counts {
            if let Some(max) = max {
                if actual >= max {
                    return Some(format!("{name} {max} reached ({actual})"));
                }
            }
        }
        if let Some(max) = self.max_cost {
            let cost = status.total_cost();
            if cost >= max {
                return Some(format!("max_cost {max} reached ({cost:.3})"));
            }
        }
        let overall = &status.overall_metric_statistics;
        for (metric, threshold) in self.max_metric_value.iter().flatten() {
            if let Some(&value) = overall.max_metrics.get(metric) {
                if value >= *threshold {
                    return Some(format!(
                        "max_metric_value {metric} >= {threshold} reached ({value})"
                    ));
                }
            }
        }
        for (metric, threshold) in self.min_metric_value.iter().flatten() {
            if let Some(&value) = overall.min_metrics.get(metric) {
                if value <= *threshold {
                    return Some(format!(
                        "min_metric_value {metric} <= {threshold} reached ({value})"
                    ));
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rw_tracking::TrialStatusSnapshot;
    use rw_types::constants::WORKER_COST;
    use rw_types::{Configuration, Metrics, Trial, TrialId, TrialStatus};

    fn snapshot(statuses: &[TrialStatus]) -> TrialStatusSnapshot {
        statuses
            .iter()
            .enumerate()
            .map(|(id, status)| {
                let id = id as TrialId;
                (id, (Trial::new(id, Configuration::default(), Utc::now()), *status))
            })
            .collect()
    }

    fn metric(name: &str, value: f64) -> Metrics {
        [(name.to_string(), value)].into_iter().collect()
    }

    #[test]
    fn empty_criterion_never_fires() {
        let criterion = StoppingCriterion::new();
        let mut status = TuningStatus::default();
        status.set_wallclock_time(1e9);
        assert!(criterion.is_unbounded());
        assert_eq!(criterion.should_stop(&status), None);
        assert!(criterion.allows_new_trial(&status));
    }

    #[test]
    fn wallclock_threshold() {
        let criterion = StoppingCriterion::new().with_max_wallclock_time(60.0);
        let mut status = TuningStatus::default();
        status.set_wallclock_time(59.9);
        assert!(criterion.should_stop(&status).is_none());
        status.set_wallclock_time(60.0);
        assert!(criterion.should_stop(&status).is_some());
    }

    #[test]
    fn trial_count_thresholds() {
        let mut status = TuningStatus::default();
        status.update(
            &snapshot(&[
                TrialStatus::Completed,
                TrialStatus::Stopped,
                TrialStatus::InProgress,
            ]),
            &[],
        );

        let started = StoppingCriterion::new().with_max_num_trials_started(3);
        assert!(started.should_stop(&status).is_some());
        assert!(!started.allows_new_trial(&status));

        let completed = StoppingCriterion::new().with_max_num_trials_completed(2);
        assert!(completed.should_stop(&status).is_none());

        let finished = StoppingCriterion::new().with_max_num_trials_finished(2);
        let cause = finished.should_stop(&status).unwrap();
        assert!(cause.starts_with("max_num_trials_finished"));
    }

    #[test]
    fn metric_and_cost_thresholds() {
        let mut status = TuningStatus::default();
        status.update(
            &snapshot(&[TrialStatus::InProgress, TrialStatus::InProgress]),
            &[
                (0, metric("mean_loss", -2.0)),
                (1, metric("mean_loss", -7.5)),
                (0, metric(WORKER_COST, 1.5)),
            ],
        );

        let low = StoppingCriterion::new().with_min_metric_value("mean_loss", -6.0);
        assert!(low.should_stop(&status).is_some());
        let lower = StoppingCriterion::new().with_min_metric_value("mean_loss", -8.0);
        assert!(lower.should_stop(&status).is_none());
        let high = StoppingCriterion::new().with_max_metric_value("mean_loss", -1.0);
        assert!(high.should_stop(&status).is_none());
        let other = StoppingCriterion::new().with_min_metric_value("accuracy", 0.0);
        assert!(other.should_stop(&status).is_none());

        assert!(StoppingCriterion::new()
            .with_max_cost(1.0)
            .should_stop(&status)
            .is_some());
    }

    #[test]
    fn criterion_deserializes_with_missing_fields() {
        let criterion: StoppingCriterion = serde_json::from_str(
            r#"{"max_wallclock_time": 10, "min_metric_value": {"mean_loss": -6.0}}"#,
        )
        .unwrap();
        assert_eq!(
            criterion,
            StoppingCriterion::new()
                .with_max_wallclock_time(10.0)
                .with_min_metric_value("mean_loss", -6.0)
        );
    }
}
