//! # rw-clock
//!
//! Time sources for tuning campaigns.
//!
//! The tuner only ever reads time through [`TimeKeeper`], so the same loop runs
//! against [`RealTimeKeeper`] (elapsed wall-clock time) or
//! [`SimulatedTimeKeeper`] (time advanced explicitly, typically to the next
//! event of a simulated backend). [`Clock`] is the closed set of both, and
//! owns the loop's single wait step.

mod real;
mod simulated;

use chrono::{DateTime, Utc};
use rw_types::ClockError;
use std::time::Duration;
use tracing::debug;

pub use real::RealTimeKeeper;
pub use simulated::SimulatedTimeKeeper;

pub type ClockResult<T> = Result<T, ClockError>;

/// Abstraction over the campaign time source.
///
/// Every query fails with [`ClockError::Uninitialized`] until
/// [`start_of_time`](TimeKeeper::start_of_time) has been called.
pub trait TimeKeeper: Send + Sync {
    /// Start (or restart) the campaign clock at zero.
    fn start_of_time(&self) {
        self.start_at(0.0);
    }

    /// Start the clock as if `elapsed` seconds had already passed. Used when a
    /// campaign is resumed from a checkpoint.
    fn start_at(&self, elapsed: f64);

    /// Seconds since the start of the campaign.
    fn time(&self) -> ClockResult<f64>;

    /// Calendar time at which the campaign started.
    fn start_time_stamp(&self) -> ClockResult<DateTime<Utc>>;

    /// Calendar time corresponding to [`time`](TimeKeeper::time).
    fn time_stamp(&self) -> ClockResult<DateTime<Utc>> {
        let elapsed = self.time()?;
        self.start_time_stamp()?
            .checked_add_signed(seconds(elapsed))
            .ok_or(ClockError::OutOfRange { seconds: elapsed })
    }
}

/// Convert fractional seconds into a chrono duration (microsecond precision).
/// Values beyond the `i64` microsecond range saturate.
pub(crate) fn seconds(secs: f64) -> chrono::Duration {
    chrono::Duration::microseconds((secs * 1e6).round() as i64)
}

/// Calendar time at which a clock reading of zero happened, given that
/// `offset` seconds had elapsed at `stamp`.
pub(crate) fn rewind(stamp: DateTime<Utc>, offset: f64) -> ClockResult<DateTime<Utc>> {
    stamp
        .checked_sub_signed(seconds(offset))
        .ok_or(ClockError::OutOfRange { seconds: offset })
}

/// The time source driving a tuner.
#[derive(Debug, Clone)]
pub enum Clock {
    Real(RealTimeKeeper),
    Simulated(SimulatedTimeKeeper),
}

impl Clock {
    pub fn real() -> Self {
        Self::Real(RealTimeKeeper::new())
    }

    pub fn simulated(keeper: SimulatedTimeKeeper) -> Self {
        Self::Simulated(keeper)
    }

    pub fn is_simulated(&self) -> bool {
        matches!(self, Self::Simulated(_))
    }

    fn keeper(&self) -> &dyn TimeKeeper {
        match self {
            Self::Real(k) => k as &dyn TimeKeeper,
            Self::Simulated(k) => k as &dyn TimeKeeper,
        }
    }

    /// Wait until the next loop iteration.
    ///
    /// With a real clock this sleeps for `sleep_time` seconds. With a simulated
    /// clock nothing sleeps: time jumps to `next_event` (the timestamp of the
    /// next pending backend event), or by `sleep_time` if no event is known.
    pub async fn wait(&self, sleep_time: f64, next_event: Option<f64>) -> ClockResult<()> {
        match self {
            Self::Real(keeper) => {
                keeper.time()?;
                tokio::time::sleep(Duration::from_secs_f64(sleep_time.max(0.0))).await;
                Ok(())
            }
            Self::Simulated(keeper) => {
                let now = keeper.time()?;
                match next_event {
                    Some(t) => {
                        debug!(from = now, to = t, "simulated clock: advancing to next event");
                        keeper.advance_to(t)
                    }
                    None => keeper.advance(sleep_time.max(0.0)),
                }
            }
        }
    }
}

impl TimeKeeper for Clock {
    fn start_at(&self, elapsed: f64) {
        self.keeper().start_at(elapsed)
    }

    fn time(&self) -> ClockResult<f64> {
        self.keeper().time()
    }

    fn start_time_stamp(&self) -> ClockResult<DateTime<Utc>> {
        self.keeper().start_time_stamp()
    }
}
