//! Versioned campaign checkpoints.

use chrono::{DateTime, Utc};
use rw_scheduler::SchedulerState;
use rw_tracking::{TrialRegistry, TuningStatus};
use rw_types::{CheckpointError, MetricMode, TuneResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

use crate::tuner::ResultRecord;

pub const CHECKPOINT_VERSION: u32 = 1;

/// Everything needed to continue an interrupted campaign. Every field is
/// required on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TunerCheckpoint {
    pub version: u32,
    pub tuner_id: Uuid,
    pub tuner_name: String,
    pub created_at: DateTime<Utc>,
    pub seed: u64,
    pub metric: String,
    pub mode: MetricMode,
    /// Campaign seconds elapsed when the checkpoint was taken.
    pub elapsed: f64,
    pub num_failures: usize,
    pub registry: TrialRegistry,
    pub results: Vec<ResultRecord>,
    pub scheduler: SchedulerState,
    pub status: TuningStatus,
}

fn malformed(message: impl Into<String>) -> CheckpointError {
    CheckpointError::Malformed {
        message: message.into(),
    }
}

impl TunerCheckpoint {
    /// Write atomically: a temporary file next to `path` is renamed over it.
    pub fn save(&self, path: &Path) -> TuneResult<()> {
        let json = serde_json::to_vec_pretty(self)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = tmp_path(path);
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        debug!(path = %path.display(), trials = self.registry.len(), "checkpoint written");
        Ok(())
    }

    /// Read and validate a checkpoint. Any missing or malformed field fails.
    pub fn load(path: &Path) -> TuneResult<Self> {
        let bytes = std::fs::read(path)?;
        let value: serde_json::Value = serde_json::from_slice(&bytes)
            .map_err(|e| malformed(format!("{}: {e}", path.display())))?;
        let version = value
            .get("version")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| malformed("missing version"))?;
        if version != u64::from(CHECKPOINT_VERSION) {
            return Err(CheckpointError::VersionMismatch {
                found: u32::try_from(version).unwrap_or(u32::MAX),
                expected: CHECKPOINT_VERSION,
            }
            .into());
        }
        let checkpoint: Self = serde_json::from_value(value).map_err(|e| malformed(e.to_string()))?;
        checkpoint.registry.validate()?;
        if let Some(record) = checkpoint
            .results
            .iter()
            .find(|r| checkpoint.registry.get(r.result.trial_id).is_none())
        {
            return Err(malformed(format!(
                "result for trial {} which is not in the registry",
                record.result.trial_id
            ))
            .into());
        }
        Ok(checkpoint)
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
