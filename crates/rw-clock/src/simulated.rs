use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rw_types::ClockError;
use std::sync::Arc;
use std::time::Instant;

use crate::{rewind, ClockResult, TimeKeeper};

#[derive(Debug, Default)]
struct SimulatedState {
    current: Option<f64>,
    start_stamp: Option<DateTime<Utc>>,
    start_offset: f64,
    last_exit: Option<Instant>,
}

/// Virtual clock for simulated campaigns.
///
/// Time only advances through [`advance`](Self::advance) and
/// [`advance_to`](Self::advance_to) and never moves backward. Clones share
/// the same state, so the tuner and a simulated backend can hold the same
/// clock.
///
/// [`mark_exit`](Self::mark_exit) and
/// [`real_time_since_mark`](Self::real_time_since_mark) measure real time
/// spent outside the simulated backend (tuner loop, scheduler). The backend
/// folds that time into the simulated clock on entry
/// ([`charge_overhead`](Self::charge_overhead)) and marks on exit, so the
/// cost of the optimization logic itself counts against the simulated
/// wall-clock budget.
#[derive(Debug, Clone, Default)]
pub struct SimulatedTimeKeeper {
    state: Arc<Mutex<SimulatedState>>,
}

impl SimulatedTimeKeeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, step: f64) -> ClockResult<()> {
        let mut state = self.state.lock();
        let current = state.current.ok_or(ClockError::Uninitialized)?;
        if step < 0.0 || step.is_nan() {
            return Err(ClockError::NegativeStep { step });
        }
        state.current = Some(current + step);
        Ok(())
    }

    /// Move to `to_time`; a target in the past leaves the clock unchanged.
    pub fn advance_to(&self, to_time: f64) -> ClockResult<()> {
        let mut state = self.state.lock();
        let current = state.current.ok_or(ClockError::Uninitialized)?;
        if to_time > current {
            state.current = Some(to_time);
        }
        Ok(())
    }

    /// Record a real-time checkpoint.
    pub fn mark_exit(&self) {
        self.state.lock().last_exit = Some(Instant::now());
    }

    /// Real seconds elapsed since the last [`mark_exit`](Self::mark_exit).
    pub fn real_time_since_mark(&self) -> ClockResult<f64> {
        let state = self.state.lock();
        state.current.ok_or(ClockError::Uninitialized)?;
        Ok(state
            .last_exit
            .map(|mark| mark.elapsed().as_secs_f64())
            .unwrap_or(0.0))
    }

    /// Advance by the real time spent since the last mark. Returns the amount
    /// charged.
    pub fn charge_overhead(&self) -> ClockResult<f64> {
        let elapsed = self.real_time_since_mark()?;
        self.advance(elapsed)?;
        Ok(elapsed)
    }
}

impl TimeKeeper for SimulatedTimeKeeper {
    fn start_at(&self, elapsed: f64) {
        let mut state = self.state.lock();
        let elapsed = elapsed.max(0.0);
        state.current = Some(elapsed);
        state.start_stamp = Some(Utc::now());
        state.start_offset = elapsed;
        state.last_exit = Some(Instant::now());
    }

    fn time(&self) -> ClockResult<f64> {
        self.state.lock().current.ok_or(ClockError::Uninitialized)
    }

    fn start_time_stamp(&self) -> ClockResult<DateTime<Utc>> {
        let state = self.state.lock();
        let stamp = state.start_stamp.ok_or(ClockError::Uninitialized)?;
        rewind(stamp, state.start_offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn queries_before_start_fail() {
        let keeper = SimulatedTimeKeeper::new();
        assert_eq!(keeper.time(), Err(ClockError::Uninitialized));
        assert_eq!(keeper.advance(1.0), Err(ClockError::Uninitialized));
        assert_eq!(keeper.advance_to(1.0), Err(ClockError::Uninitialized));
        assert_eq!(keeper.real_time_since_mark(), Err(ClockError::Uninitialized));
        assert_eq!(keeper.start_time_stamp(), Err(ClockError::Uninitialized));
    }

    #[test]
    fn negative_step_is_rejected() {
        let keeper = SimulatedTimeKeeper::new();
        keeper.start_of_time();
        keeper.advance(2.0).unwrap();
        assert_eq!(keeper.advance(-1.0), Err(ClockError::NegativeStep { step: -1.0 }));
        assert_eq!(keeper.time().unwrap(), 2.0);
    }

    #[test]
    fn restart_resets_to_zero() {
        let keeper = SimulatedTimeKeeper::new();
        keeper.start_of_time();
        keeper.advance(100.0).unwrap();
        keeper.start_of_time();
        assert_eq!(keeper.time().unwrap(), 0.0);
    }

    #[test]
    fn out_of_range_stamps_are_errors() {
        let keeper = SimulatedTimeKeeper::new();
        keeper.start_at(1e30);
        assert_eq!(keeper.time().unwrap(), 1e30);
        assert_eq!(
            keeper.start_time_stamp(),
            Err(ClockError::OutOfRange { seconds: 1e30 })
        );

        keeper.start_of_time();
        assert!(keeper.time_stamp().is_ok());
        keeper.advance(1e30).unwrap();
        assert_eq!(
            keeper.time_stamp(),
            Err(ClockError::OutOfRange { seconds: 1e30 })
        );
    }

    #[test]
    fn clones_share_time() {
        let keeper = SimulatedTimeKeeper::new();
        let shared = keeper.clone();
        keeper.start_of_time();
        shared.advance(7.0).unwrap();
        assert_eq!(keeper.time().unwrap(), 7.0);
    }

    #[test]
    fn overhead_is_charged_to_simulated_time() {
        let keeper = SimulatedTimeKeeper::new();
        keeper.start_of_time();
        keeper.mark_exit();
        std::thread::sleep(std::time::Duration::from_millis(10));
        let charged = keeper.charge_overhead().unwrap();
        assert!(charged >= 0.01);
        assert_eq!(keeper.time().unwrap(), charged);
    }

    proptest! {
        #[test]
        fn advance_accumulates_monotonically(steps in proptest::collection::vec(0.0f64..1e4, 0..50)) {
            let keeper = SimulatedTimeKeeper::new();
            keeper.start_of_time();
            let mut expected = 0.0;
            let mut previous = 0.0;
            for step in steps {
                keeper.advance(step).unwrap();
                expected += step;
                let now = keeper.time().unwrap();
                prop_assert!(now >= previous);
                prop_assert_eq!(now, expected);
                previous = now;
            }
        }

        #[test]
        fn advance_to_never_moves_backward(start in 0.0f64..1e4, target in 0.0f64..1e4) {
            let keeper = SimulatedTimeKeeper::new();
            keeper.start_of_time();
            keeper.advance(start).unwrap();
            keeper.advance_to(target).unwrap();
            let now = keeper.time().unwrap();
            if target < start {
                prop_assert_eq!(now, start);
            } else {
                prop_assert_eq!(now, target);
            }
        }
    }
}
