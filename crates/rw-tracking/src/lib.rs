//! # rw-tracking
//!
//! Bookkeeping owned by the tuner loop: the [`TrialRegistry`] (trials and
//! their lifecycle state) and [`TuningStatus`] (running per-trial and
//! campaign-wide metric statistics).

mod registry;
mod status;

pub use registry::{TrialRecord, TrialRegistry, TrialStatusSnapshot};
pub use status::{MetricStatistics, TuningStatus};
