use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rw_types::ClockError;
use std::sync::Arc;
use std::time::Instant;

use crate::{rewind, ClockResult, TimeKeeper};

#[derive(Debug, Clone, Copy)]
struct Anchor {
    instant: Instant,
    stamp: DateTime<Utc>,
    offset: f64,
}

/// Production clock: elapsed real time since [`TimeKeeper::start_of_time`].
///
/// There is no advance operation; time moves on its own.
#[derive(Debug, Clone, Default)]
pub struct RealTimeKeeper {
    anchor: Arc<RwLock<Option<Anchor>>>,
}

impl RealTimeKeeper {
    pub fn new() -> Self {
        Self::default()
    }

    fn anchor(&self) -> ClockResult<Anchor> {
        (*self.anchor.read()).ok_or(ClockError::Uninitialized)
    }
}

impl TimeKeeper for RealTimeKeeper {
    fn start_at(&self, elapsed: f64) {
        *self.anchor.write() = Some(Anchor {
            instant: Instant::now(),
            stamp: Utc::now(),
            offset: elapsed.max(0.0),
        });
    }

    fn time(&self) -> ClockResult<f64> {
        let anchor = self.anchor()?;
        Ok(anchor.offset + anchor.instant.elapsed().as_secs_f64())
    }

    fn start_time_stamp(&self) -> ClockResult<DateTime<Utc>> {
        let anchor = self.anchor()?;
        rewind(anchor.stamp, anchor.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn real_clock_requires_start() {
        let keeper = RealTimeKeeper::new();
        assert_eq!(keeper.time(), Err(ClockError::Uninitialized));
        assert_eq!(keeper.time_stamp(), Err(ClockError::Uninitialized));
    }

    #[test]
    fn real_clock_is_monotonic() {
        let keeper = RealTimeKeeper::new();
        keeper.start_of_time();
        let t0 = keeper.time().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let t1 = keeper.time().unwrap();
        assert!(t0 >= 0.0);
        assert!(t1 > t0);
    }

    #[test]
    fn resumed_clock_starts_at_offset() {
        let keeper = RealTimeKeeper::new();
        keeper.start_at(3600.0);
        assert!(keeper.time().unwrap() >= 3600.0);

        let start = keeper.start_time_stamp().unwrap();
        assert!(Utc::now() - start >= chrono::Duration::seconds(3600));
    }

    #[test]
    fn huge_offset_is_an_error_not_a_panic() {
        let keeper = RealTimeKeeper::new();
        keeper.start_at(1e30);
        assert!(keeper.time().unwrap() >= 1e30);
        assert_eq!(
            keeper.start_time_stamp(),
            Err(ClockError::OutOfRange { seconds: 1e30 })
        );
        assert!(keeper.time_stamp().is_err());
    }

    #[test]
    fn restart_resets_elapsed_time() {
        let keeper = RealTimeKeeper::new();
        keeper.start_at(100.0);
        keeper.start_of_time();
        assert!(keeper.time().unwrap() < 100.0);
    }
}
