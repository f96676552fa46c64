//! Tuner events for external consumers, and cooperative cancellation.

use rw_types::{Configuration, SchedulerDecision, TrialId, TrialStatus};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::tuner::TerminationReason;

/// Emitted by the tuner loop (logging, dashboards, tests).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TunerEvent {
    TrialStarted {
        trial_id: TrialId,
        config: Configuration,
    },
    TrialResumed {
        trial_id: TrialId,
    },
    TrialDecision {
        trial_id: TrialId,
        resource_level: u64,
        decision: SchedulerDecision,
    },
    TrialFinished {
        trial_id: TrialId,
        status: TrialStatus,
    },
    TrialFailed {
        trial_id: TrialId,
        message: String,
        failures: usize,
    },
    CheckpointSaved {
        path: PathBuf,
        elapsed: f64,
    },
    Stopped {
        reason: TerminationReason,
    },
}

/// Shared flag asking a running tuner to stop after the current iteration.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
