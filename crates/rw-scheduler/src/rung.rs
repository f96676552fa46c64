//! Rungs and the bracket/rung system of the Hyperband schedulers.

use rw_types::{config_error, DataIntegrityError, MetricMode, TrialId, TuneResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RungEntry {
    pub trial_id: TrialId,
    #[serde(with = "rw_types::float_serde::value")]
    pub value: f64,
    /// Set once the trial went on past this rung (continued or resumed).
    pub promoted: bool,
}

/// Occupants of one resource level. Entries stay in arrival order, which is
/// the tie-breaker when ranking equal values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rung {
    pub resource_level: u64,
    reduction_factor: u64,
    occupants: Vec<RungEntry>,
}

impl Rung {
    pub fn new(resource_level: u64, reduction_factor: u64) -> Self {
        Self {
            resource_level,
            reduction_factor,
            occupants: Vec::new(),
        }
    }

    pub fn promotion_quantile(&self) -> f64 {
        1.0 / self.reduction_factor as f64
    }

    pub fn occupants(&self) -> &[RungEntry] {
        &self.occupants
    }

    pub fn len(&self) -> usize {
        self.occupants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.occupants.is_empty()
    }

    /// Record `value` for `trial_id`. Returns `false` if the trial already
    /// occupied the rung, in which case its value is replaced.
    pub fn record(&mut self, trial_id: TrialId, value: f64) -> bool {
        match self.occupants.iter_mut().find(|e| e.trial_id == trial_id) {
            Some(entry) => {
                entry.value = value;
                false
            }
            None => {
                self.occupants.push(RungEntry {
                    trial_id,
                    value,
                    promoted: false,
                });
                true
            }
        }
    }

    /// How many of the current occupants are in the top `1/η`.
    pub fn num_promotable(&self) -> usize {
        self.occupants.len() / self.reduction_factor as usize
    }

    /// Occupant indices, best first.
    fn ranking(&self, mode: MetricMode) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.occupants.len()).collect();
        // sort_by is stable: equal values keep arrival order
        order.sort_by(|&a, &b| {
            mode.cmp_best_first(self.occupants[a].value, self.occupants[b].value)
        });
        order
    }

    /// Zero-based rank of `trial_id` among the occupants.
    pub fn rank(&self, trial_id: TrialId, mode: MetricMode) -> Option<usize> {
        self.ranking(mode)
            .into_iter()
            .position(|i| self.occupants[i].trial_id == trial_id)
    }

    /// Whether `trial_id` may continue past this rung. With fewer than η
    /// occupants every trial continues.
    pub fn is_in_top_quantile(&self, trial_id: TrialId, mode: MetricMode) -> Option<bool> {
        let rank = self.rank(trial_id, mode)?;
        if self.occupants.len() < self.reduction_factor as usize {
            return Some(true);
        }
        Some(rank < self.num_promotable())
    }

    pub fn mark_promoted(&mut self, trial_id: TrialId) {
        if let Some(entry) = self.occupants.iter_mut().find(|e| e.trial_id == trial_id) {
            entry.promoted = true;
        }
    }

    /// Occupants in the top `1/η` that have not been promoted yet, best first.
    pub fn promotable(&self, mode: MetricMode) -> Vec<TrialId> {
        self.ranking(mode)
            .into_iter()
            .take(self.num_promotable())
            .map(|i| &self.occupants[i])
            .filter(|e| !e.promoted)
            .map(|e| e.trial_id)
            .collect()
    }
}

/// Rung levels `grace·η^k` below `max_resource_level`, followed by
/// `max_resource_level` itself as the top rung.
pub fn geometric_ladder(
    grace_period: u64,
    reduction_factor: u64,
    max_resource_level: u64,
) -> TuneResult<Vec<u64>> {
    if reduction_factor < 2 {
        return Err(config_error!(
            "reduction_factor must be >= 2, got {reduction_factor}"
        ));
    }
    if grace_period < 1 || grace_period > max_resource_level {
        return Err(config_error!(
            "grace_period must be in [1, {max_resource_level}], got {grace_period}"
        ));
    }
    let mut ladder = Vec::new();
    let mut level = grace_period;
    while level < max_resource_level {
        ladder.push(level);
        level = match level.checked_mul(reduction_factor) {
            Some(next) => next,
            None => break,
        };
    }
    ladder.push(max_resource_level);
    Ok(ladder)
}

/// Explicit rung levels: strictly increasing, positive and below
/// `max_resource_level`, which is appended as the top rung.
pub fn custom_ladder(rung_levels: &[u64], max_resource_level: u64) -> TuneResult<Vec<u64>> {
    if rung_levels.first() == Some(&0) {
        return Err(config_error!("rung levels must be positive"));
    }
    if rung_levels.windows(2).any(|w| w[0] >= w[1]) {
        return Err(config_error!(
            "rung levels must be strictly increasing, got {rung_levels:?}"
        ));
    }
    if rung_levels.last().is_some_and(|&l| l >= max_resource_level) {
        return Err(config_error!(
            "rung levels must be below max_resource_level {max_resource_level}"
        ));
    }
    let mut ladder = rung_levels.to_vec();
    ladder.push(max_resource_level);
    Ok(ladder)
}

/// Brackets over a shared ladder. Bracket `b` uses the rungs
/// `ladder[b..]`: later brackets start their trials at a higher level.
///
/// With `per_bracket` every bracket ranks its trials in its own rungs;
/// otherwise all brackets share one rung per level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RungSystem {
    ladder: Vec<u64>,
    num_brackets: usize,
    per_bracket: bool,
    tables: Vec<Vec<Rung>>,
}

impl RungSystem {
    pub fn new(
        ladder: Vec<u64>,
        reduction_factor: u64,
        num_brackets: usize,
        per_bracket: bool,
    ) -> TuneResult<Self> {
        if ladder.is_empty() {
            return Err(config_error!("rung ladder is empty"));
        }
        if num_brackets == 0 || num_brackets > ladder.len() {
            return Err(config_error!(
                "num_brackets must be in [1, {}], got {num_brackets}",
                ladder.len()
            ));
        }
        let table = |start: usize| -> Vec<Rung> {
            ladder[start..]
                .iter()
                .map(|&level| Rung::new(level, reduction_factor))
                .collect()
        };
        let tables = if per_bracket {
            (0..num_brackets).map(table).collect()
        } else {
            vec![table(0)]
        };
        Ok(Self {
            ladder,
            num_brackets,
            per_bracket,
            tables,
        })
    }

    pub fn ladder(&self) -> &[u64] {
        &self.ladder
    }

    pub fn num_brackets(&self) -> usize {
        self.num_brackets
    }

    pub fn max_resource_level(&self) -> u64 {
        self.ladder.last().copied().unwrap_or_default()
    }

    /// Rung levels of `bracket`.
    pub fn bracket_levels(&self, bracket: usize) -> &[u64] {
        self.ladder.get(bracket..).unwrap_or(&[])
    }

    fn table_index(&self, bracket: usize) -> usize {
        if self.per_bracket {
            bracket
        } else {
            0
        }
    }

    /// The rung at `level` seen by `bracket`, if `level` is one of its rungs.
    pub fn rung(&self, bracket: usize, level: u64) -> Option<&Rung> {
        if !self.bracket_levels(bracket).contains(&level) {
            return None;
        }
        self.tables
            .get(self.table_index(bracket))?
            .iter()
            .find(|r| r.resource_level == level)
    }

    pub fn rung_mut(&mut self, bracket: usize, level: u64) -> Option<&mut Rung> {
        if !self.bracket_levels(bracket).contains(&level) {
            return None;
        }
        let index = self.table_index(bracket);
        self.tables
            .get_mut(index)?
            .iter_mut()
            .find(|r| r.resource_level == level)
    }

    /// All rungs of all tables.
    pub fn rungs(&self) -> impl Iterator<Item = &Rung> {
        self.tables.iter().flatten()
    }

    /// Check that a restored system has the same shape as this one.
    pub fn check_compatible(&self, restored: &RungSystem) -> Result<(), DataIntegrityError> {
        if restored.ladder != self.ladder
            || restored.num_brackets != self.num_brackets
            || restored.per_bracket != self.per_bracket
        {
            return Err(DataIntegrityError::RungLadder {
                message: format!(
                    "checkpointed ladder {:?} ({} brackets, per_bracket={}) does not match {:?} ({} brackets, per_bracket={})",
                    restored.ladder,
                    restored.num_brackets,
                    restored.per_bracket,
                    self.ladder,
                    self.num_brackets,
                    self.per_bracket
                ),
            });
        }
        let expected_tables = if self.per_bracket { self.num_brackets } else { 1 };
        if restored.tables.len() != expected_tables {
            return Err(DataIntegrityError::RungLadder {
                message: format!(
                    "expected {expected_tables} rung tables, found {}",
                    restored.tables.len()
                ),
            });
        }
        for (index, table) in restored.tables.iter().enumerate() {
            let levels: Vec<u64> = table.iter().map(|r| r.resource_level).collect();
            let start = if self.per_bracket { index } else { 0 };
            if levels.as_slice() != &self.ladder[start..] {
                return Err(DataIntegrityError::RungLadder {
                    message: format!("rung table {index} has levels {levels:?}"),
                });
            }
        }
        Ok(())
    }
}
