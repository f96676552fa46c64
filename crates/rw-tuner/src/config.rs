//! Tuner and campaign configuration.

use rw_scheduler::{HyperbandConfig, SchedulerConfig, SearchSpace};
use rw_types::{config_error, MetricMode, TuneResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::simulator::HeightBenchmark;
use crate::stopping::StoppingCriterion;

/// Environment variable holding the path of a campaign JSON file.
pub const CONFIG_ENV_VAR: &str = "RUNGWAY_CONFIG";

fn load_json<T: DeserializeOwned>(path: &Path) -> TuneResult<T> {
    let text = std::fs::read_to_string(path)?;
    serde_json::from_str(&text)
        .map_err(|e| config_error!("invalid configuration file {}: {e}", path.display()))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunerConfig {
    pub tuner_name: String,
    /// Maximum number of trials running at the same time.
    pub n_workers: usize,
    /// Seconds between two loop iterations (real clock), or the step taken
    /// by a simulated clock when no backend event is pending.
    pub sleep_time: f64,
    /// The campaign aborts once this many trials have failed.
    pub max_failures: usize,
    /// Seconds between two checkpoints.
    pub results_update_interval: f64,
    /// Seconds between two status log lines.
    pub print_update_interval: f64,
    pub checkpoint_path: Option<PathBuf>,
    pub seed: u64,
    pub metric: String,
    pub mode: MetricMode,
    pub stop_criterion: StoppingCriterion,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            tuner_name: "rungway".to_string(),
            n_workers: 4,
            sleep_time: 5.0,
            max_failures: 1,
            results_update_interval: 10.0,
            print_update_interval: 30.0,
            checkpoint_path: None,
            seed: 0,
            metric: "mean_loss".to_string(),
            mode: MetricMode::Min,
            stop_criterion: StoppingCriterion::default(),
        }
    }
}

impl TunerConfig {
    pub fn new(metric: impl Into<String>, mode: MetricMode) -> Self {
        Self {
            metric: metric.into(),
            mode,
            ..Default::default()
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> TuneResult<Self> {
        let config: Self = load_json(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.tuner_name = name.into();
        self
    }

    pub fn with_workers(mut self, n_workers: usize) -> Self {
        self.n_workers = n_workers;
        self
    }

    pub fn with_sleep_time(mut self, seconds: f64) -> Self {
        self.sleep_time = seconds;
        self
    }

    pub fn with_max_failures(mut self, max_failures: usize) -> Self {
        self.max_failures = max_failures;
        self
    }

    pub fn with_results_update_interval(mut self, seconds: f64) -> Self {
        self.results_update_interval = seconds;
        self
    }

    pub fn with_print_update_interval(mut self, seconds: f64) -> Self {
        self.print_update_interval = seconds;
        self
    }

    pub fn with_checkpoint_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint_path = Some(path.into());
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_stop_criterion(mut self, criterion: StoppingCriterion) -> Self {
        self.stop_criterion = criterion;
        self
    }

    pub fn validate(&self) -> TuneResult<()> {
        if self.n_workers == 0 {
            return Err(config_error!("n_workers must be positive"));
        }
        if self.max_failures == 0 {
            return Err(config_error!("max_failures must be positive"));
        }
        if self.metric.is_empty() {
            return Err(config_error!("metric name is empty"));
        }
        let intervals = [
            ("sleep_time", self.sleep_time),
            ("results_update_interval", self.results_update_interval),
            ("print_update_interval", self.print_update_interval),
        ];
        for (name, value) in intervals {
            if !value.is_finite() || value < 0.0 {
                return Err(config_error!("{name} must be a non-negative number, got {value}"));
            }
        }
        Ok(())
    }
}

/// Settings of the simulated backend used by `rw-simulate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub benchmark: HeightBenchmark,
    /// Charge real orchestration time to the simulated clock.
    pub charge_overhead: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            benchmark: HeightBenchmark::default(),
            charge_overhead: true,
        }
    }
}

/// A complete campaign file: tuner, scheduler and simulation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignConfig {
    #[serde(default)]
    pub tuner: TunerConfig,
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

impl CampaignConfig {
    pub fn from_path(path: impl AsRef<Path>) -> TuneResult<Self> {
        let config: Self = load_json(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    /// Path from [`CONFIG_ENV_VAR`], or the built-in height campaign.
    pub fn from_env() -> TuneResult<Self> {
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) => Self::from_path(PathBuf::from(path)),
            None => Ok(Self::height_demo()),
        }
    }

    pub fn validate(&self) -> TuneResult<()> {
        self.tuner.validate()?;
        self.scheduler.validate()
    }

    /// Asynchronous successive halving on the height benchmark: 100 steps,
    /// `width` in [0, 20], `height` in [-100, 100].
    pub fn height_demo() -> Self {
        let max_steps = 100;
        let space = SearchSpace::new()
            .add_constant("steps", max_steps as i64)
            .add_int("width", 0, 20)
            .add_int("height", -100, 100);
        let benchmark = HeightBenchmark::default();
        let tuner = TunerConfig::new(benchmark.metric.clone(), MetricMode::Min)
            .with_name("height-asha")
            .with_workers(4)
            .with_stop_criterion(
                StoppingCriterion::new()
                    .with_max_wallclock_time(600.0)
                    .with_min_metric_value(benchmark.metric.clone(), -9.5),
            );
        Self {
            tuner,
            scheduler: SchedulerConfig::Hyperband(HyperbandConfig::new(space, max_steps)),
            simulation: SimulationConfig {
                benchmark,
                charge_overhead: true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rw_types::TuneError;
    use std::io::Write;

    #[test]
    fn invalid_tuner_settings_are_rejected() {
        let bad = [
            TunerConfig::default().with_workers(0),
            TunerConfig::default().with_max_failures(0),
            TunerConfig::default().with_sleep_time(-1.0),
            TunerConfig::default().with_results_update_interval(f64::NAN),
            TunerConfig::default().with_print_update_interval(f64::INFINITY),
        ];
        for config in bad {
            assert!(matches!(config.validate(), Err(TuneError::Config(_))));
        }
        assert!(TunerConfig::default().validate().is_ok());
    }

    #[test]
    fn tuner_config_loads_from_file_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"n_workers": 8, "metric": "accuracy", "mode": "max",
                "stop_criterion": {{"max_num_trials_started": 20}}}}"#
        )
        .unwrap();
        let config = TunerConfig::from_path(file.path()).unwrap();
        assert_eq!(config.n_workers, 8);
        assert_eq!(config.mode, MetricMode::Max);
        assert_eq!(config.max_failures, 1);
        assert_eq!(config.stop_criterion.max_num_trials_started, Some(20));
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{\"n_workers\": \"many\"}}").unwrap();
        assert!(matches!(
            TunerConfig::from_path(file.path()),
            Err(TuneError::Config(_))
        ));
        assert!(matches!(
            TunerConfig::from_path("/nonexistent/rungway.json"),
            Err(TuneError::Io(_))
        ));
    }

    #[test]
    fn demo_campaign_round_trips() {
        let demo = CampaignConfig::height_demo();
        assert!(demo.validate().is_ok());
        let json = serde_json::to_string(&demo).unwrap();
        let back: CampaignConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, demo);
    }
}
