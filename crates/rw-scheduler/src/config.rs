//! Serializable scheduler configuration.

use rw_types::{config_error, Configuration, MetricMode, TuneResult};
use serde::{Deserialize, Serialize};

use crate::duplicate::DuplicateDetector;
use crate::hyperband::{BracketSampling, HyperbandScheduler, HyperbandType};
use crate::rng::SeededRng;
use crate::rung::{custom_ladder, geometric_ladder, RungSystem};
use crate::scheduler::{Scheduler, SchedulerKind};
use crate::searcher::{GridSearcher, RandomSearcher, Searcher};
use crate::space::SearchSpace;

/// Stream ids used to derive component generators from the campaign seed.
const SCHEDULER_STREAM: u64 = 1;
const SEARCHER_STREAM: u64 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SearcherConfig {
    Random {
        #[serde(default)]
        duplicate_detector: DuplicateDetector,
        #[serde(default = "default_max_retries")]
        max_retries: usize,
        #[serde(default)]
        points_to_evaluate: Vec<Configuration>,
    },
    Grid {
        #[serde(default = "default_float_steps")]
        float_steps: usize,
    },
}

fn default_max_retries() -> usize {
    RandomSearcher::DEFAULT_MAX_RETRIES
}

fn default_float_steps() -> usize {
    5
}

impl Default for SearcherConfig {
    fn default() -> Self {
        Self::Random {
            duplicate_detector: DuplicateDetector::default(),
            max_retries: default_max_retries(),
            points_to_evaluate: Vec::new(),
        }
    }
}

impl SearcherConfig {
    pub fn build(&self, space: &SearchSpace, rng: SeededRng) -> Box<dyn Searcher> {
        match self {
            Self::Random {
                duplicate_detector,
                max_retries,
                points_to_evaluate,
            } => Box::new(
                RandomSearcher::new(space.clone(), rng)
                    .with_duplicate_detector(*duplicate_detector)
                    .with_max_retries(*max_retries)
                    .with_points_to_evaluate(points_to_evaluate.clone()),
            ),
            Self::Grid { float_steps } => Box::new(GridSearcher::new(space, *float_steps)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FifoConfig {
    pub search_space: SearchSpace,
    #[serde(default)]
    pub searcher: SearcherConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HyperbandConfig {
    pub search_space: SearchSpace,
    #[serde(default)]
    pub searcher: SearcherConfig,
    #[serde(default)]
    pub hyperband_type: HyperbandType,
    #[serde(default = "default_reduction_factor")]
    pub reduction_factor: u64,
    #[serde(default = "default_grace_period")]
    pub grace_period: u64,
    pub max_resource_level: u64,
    /// Explicit rung levels; overrides the geometric ladder.
    #[serde(default)]
    pub rung_levels: Option<Vec<u64>>,
    #[serde(default = "default_num_brackets")]
    pub num_brackets: usize,
    #[serde(default = "default_rung_system_per_bracket")]
    pub rung_system_per_bracket: bool,
    #[serde(default)]
    pub bracket_sampling: BracketSampling,
}

fn default_reduction_factor() -> u64 {
    3
}

fn default_grace_period() -> u64 {
    1
}

fn default_num_brackets() -> usize {
    1
}

fn default_rung_system_per_bracket() -> bool {
    true
}

impl HyperbandConfig {
    pub fn new(search_space: SearchSpace, max_resource_level: u64) -> Self {
        Self {
            search_space,
            searcher: SearcherConfig::default(),
            hyperband_type: HyperbandType::default(),
            reduction_factor: default_reduction_factor(),
            grace_period: default_grace_period(),
            max_resource_level,
            rung_levels: None,
            num_brackets: default_num_brackets(),
            rung_system_per_bracket: default_rung_system_per_bracket(),
            bracket_sampling: BracketSampling::default(),
        }
    }

    pub fn with_type(mut self, hyperband_type: HyperbandType) -> Self {
        self.hyperband_type = hyperband_type;
        self
    }

    pub fn with_searcher(mut self, searcher: SearcherConfig) -> Self {
        self.searcher = searcher;
        self
    }

    pub fn with_reduction_factor(mut self, reduction_factor: u64) -> Self {
        self.reduction_factor = reduction_factor;
        self
    }

    pub fn with_grace_period(mut self, grace_period: u64) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn with_rung_levels(mut self, rung_levels: Vec<u64>) -> Self {
        self.rung_levels = Some(rung_levels);
        self
    }

    pub fn with_brackets(mut self, num_brackets: usize, per_bracket: bool) -> Self {
        self.num_brackets = num_brackets;
        self.rung_system_per_bracket = per_bracket;
        self
    }

    pub fn with_bracket_sampling(mut self, sampling: BracketSampling) -> Self {
        self.bracket_sampling = sampling;
        self
    }

    /// The rung ladder, validated.
    pub fn ladder(&self) -> TuneResult<Vec<u64>> {
        if self.reduction_factor < 2 {
            return Err(config_error!(
                "reduction_factor must be >= 2, got {}",
                self.reduction_factor
            ));
        }
        match &self.rung_levels {
            Some(levels) => custom_ladder(levels, self.max_resource_level),
            None => geometric_ladder(
                self.grace_period,
                self.reduction_factor,
                self.max_resource_level,
            ),
        }
    }
}

/// Scheduling policy plus searcher, as loaded from a campaign file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SchedulerConfig {
    Fifo(FifoConfig),
    Hyperband(HyperbandConfig),
}

impl SchedulerConfig {
    pub fn fifo(search_space: SearchSpace) -> Self {
        Self::Fifo(FifoConfig {
            search_space,
            searcher: SearcherConfig::default(),
        })
    }

    pub fn search_space(&self) -> &SearchSpace {
        match self {
            Self::Fifo(c) => &c.search_space,
            Self::Hyperband(c) => &c.search_space,
        }
    }

    pub fn validate(&self) -> TuneResult<()> {
        self.search_space().validate().map_err(|e| config_error!("{e}"))?;
        if let Self::Hyperband(c) = self {
            let ladder = c.ladder()?;
            if c.num_brackets == 0 || c.num_brackets > ladder.len() {
                return Err(config_error!(
                    "num_brackets must be in [1, {}] for ladder {ladder:?}, got {}",
                    ladder.len(),
                    c.num_brackets
                ));
            }
        }
        Ok(())
    }

    /// Build a ready scheduler. Component generators are derived from
    /// `seed`, so equal seeds give equal campaigns.
    pub fn build(&self, metric: &str, mode: MetricMode, seed: u64) -> TuneResult<Scheduler> {
        self.validate()?;
        let root = SeededRng::new(seed);
        match self {
            Self::Fifo(c) => {
                let searcher = c
                    .searcher
                    .build(&c.search_space, root.derive(SEARCHER_STREAM));
                Ok(Scheduler::fifo(searcher, metric, mode))
            }
            Self::Hyperband(c) => {
                let rungs = RungSystem::new(
                    c.ladder()?,
                    c.reduction_factor,
                    c.num_brackets,
                    c.rung_system_per_bracket,
                )?;
                let hb = HyperbandScheduler::new(
                    c.hyperband_type,
                    mode,
                    c.bracket_sampling,
                    rungs,
                    root.derive(SCHEDULER_STREAM),
                );
                let searcher = c
                    .searcher
                    .build(&c.search_space, root.derive(SEARCHER_STREAM));
                Ok(Scheduler::new(
                    SchedulerKind::Hyperband(hb),
                    searcher,
                    metric,
                    mode,
                ))
            }
        }
    }
}
