//! Trial registry: the single owner of trial records and their status.

use chrono::{DateTime, Utc};
use rw_types::{Configuration, DataIntegrityError, Trial, TrialId, TrialStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Trial and its current status, keyed by trial id.
pub type TrialStatusSnapshot = BTreeMap<TrialId, (Trial, TrialStatus)>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub trial: Trial,
    pub status: TrialStatus,
}

/// All trials of a campaign, in creation order. Trials reaching a terminal
/// status stay here as history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrialRegistry {
    records: BTreeMap<TrialId, TrialRecord>,
    next_trial_id: TrialId,
}

impl TrialRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new trial with the next id, in status `in_progress`.
    pub fn create(&mut self, config: Configuration, creation_time: DateTime<Utc>) -> Trial {
        let trial_id = self.next_trial_id;
        self.next_trial_id += 1;
        let trial = Trial::new(trial_id, config, creation_time);
        self.records.insert(
            trial_id,
            TrialRecord {
                trial: trial.clone(),
                status: TrialStatus::InProgress,
            },
        );
        trial
    }

    /// Move a trial to `status`, returning the previous status. Setting the
    /// status a trial already has is a no-op.
    pub fn set_status(
        &mut self,
        trial_id: TrialId,
        status: TrialStatus,
    ) -> Result<TrialStatus, DataIntegrityError> {
        let record = self
            .records
            .get_mut(&trial_id)
            .ok_or(DataIntegrityError::UnknownTrial { trial_id })?;
        let previous = record.status;
        if !previous.can_transition_to(status) {
            return Err(DataIntegrityError::InvalidTransition {
                trial_id,
                from: previous,
                to: status,
            });
        }
        if previous != status {
            debug!(trial_id, from = %previous, to = %status, "trial status changed");
        }
        record.status = status;
        Ok(previous)
    }

    pub fn get(&self, trial_id: TrialId) -> Option<&Trial> {
        self.records.get(&trial_id).map(|r| &r.trial)
    }

    pub fn status(&self, trial_id: TrialId) -> Option<TrialStatus> {
        self.records.get(&trial_id).map(|r| r.status)
    }

    /// All trials in creation order.
    pub fn all(&self) -> impl Iterator<Item = &Trial> {
        self.records.values().map(|r| &r.trial)
    }

    pub fn records(&self) -> impl Iterator<Item = &TrialRecord> {
        self.records.values()
    }

    /// Ids of trials currently in `status`, in creation order.
    pub fn with_status(&self, status: TrialStatus) -> Vec<TrialId> {
        self.records
            .values()
            .filter(|r| r.status == status)
            .map(|r| r.trial.trial_id)
            .collect()
    }

    pub fn count(&self, status: TrialStatus) -> usize {
        self.records.values().filter(|r| r.status == status).count()
    }

    pub fn num_running(&self) -> usize {
        self.count(TrialStatus::InProgress)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn next_trial_id(&self) -> TrialId {
        self.next_trial_id
    }

    pub fn snapshot(&self) -> TrialStatusSnapshot {
        self.records
            .iter()
            .map(|(id, r)| (*id, (r.trial.clone(), r.status)))
            .collect()
    }

    /// Check the invariants a restored registry must satisfy.
    pub fn validate(&self) -> Result<(), DataIntegrityError> {
        for (id, record) in &self.records {
            if *id != record.trial.trial_id {
                return Err(DataIntegrityError::UnknownTrial {
                    trial_id: record.trial.trial_id,
                });
            }
            if *id >= self.next_trial_id {
                return Err(DataIntegrityError::DuplicateTrial { trial_id: *id });
            }
        }
        Ok(())
    }
}
