//! Reserved metric and record keys shared between the tuner and trial reports.

/// Trial identifier column in result records.
pub const TRIAL_ID: &str = "trial_id";

/// Cumulative cost (e.g. dollars) a trial has spent so far, as reported by the
/// trial itself. The campaign cost is the sum of the last reported values.
pub const WORKER_COST: &str = "st_worker_cost";

/// Seconds since the trial started, as reported by the trial.
pub const WORKER_TIME: &str = "st_worker_time";

/// Tuner clock reading when a result was received.
pub const TUNER_TIME: &str = "st_tuner_time";

/// Scheduler decision taken on a result.
pub const DECISION: &str = "st_decision";

/// Trial status at the time a result was received.
pub const STATUS: &str = "st_status";

/// Default name of the resource attribute (fidelity axis).
pub const DEFAULT_RESOURCE_ATTR: &str = "epoch";
