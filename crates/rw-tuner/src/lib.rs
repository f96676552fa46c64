//! # rw-tuner
//!
//! The Rungway tuning loop.
//!
//! A [`Tuner`] owns the trial registry and status aggregator, asks its
//! [`Scheduler`](rw_scheduler::Scheduler) what to run, hands trials to a
//! [`Backend`] and applies the scheduler's decisions to incoming results,
//! until a [`StoppingCriterion`] fires, the search space runs out or too many
//! trials fail. [`SimulatedBackend`] runs synthetic [`Benchmark`]s on the
//! simulated clock.

mod backend;
mod checkpoint;
mod config;
mod events;
mod simulator;
mod stopping;
mod tuner;

pub use backend::{Backend, TrialReport};
pub use checkpoint::{TunerCheckpoint, CHECKPOINT_VERSION};
pub use config::{CampaignConfig, SimulationConfig, TunerConfig, CONFIG_ENV_VAR};
pub use events::{CancelToken, TunerEvent};
pub use simulator::{Benchmark, HeightBenchmark, SimulatedBackend};
pub use stopping::StoppingCriterion;
pub use tuner::{ResultRecord, TerminationReason, Tuner, TuningSummary};
