//! # rw-scheduler
//!
//! Multi-fidelity scheduling for Rungway.
//!
//! Provides the search space and searchers that propose configurations, the
//! rung/bracket system, the FIFO and asynchronous Hyperband (stopping and
//! promotion) policies behind one [`Scheduler`], and the serializable
//! [`SchedulerConfig`] that builds them from a seed.

mod config;
mod duplicate;
mod hyperband;
mod rng;
mod rung;
mod scheduler;
mod searcher;
mod space;

pub use config::{FifoConfig, HyperbandConfig, SchedulerConfig, SearcherConfig};
pub use duplicate::DuplicateDetector;
pub use hyperband::{BracketSampling, HyperbandScheduler, HyperbandState, HyperbandType, TrialSlot};
pub use rng::{RngState, SeededRng};
pub use rung::{custom_ladder, geometric_ladder, Rung, RungEntry, RungSystem};
pub use scheduler::{Scheduler, SchedulerKind, SchedulerState, TrialSuggestion};
pub use searcher::{GridSearcher, RandomSearcher, Searcher};
pub use space::{Grid, ParameterDef, ParameterKind, SearchSpace};
