//! Search space definitions used by the built-in searchers.

use rand::Rng;
use rw_types::{Configuration, ParameterValue};
use serde::{Deserialize, Serialize};

/// A single parameter dimension in the search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDef {
    /// Parameter name as it appears in the configuration (e.g. "learning_rate").
    pub name: String,
    /// The kind of search range.
    pub kind: ParameterKind,
}

/// Describes how a parameter is sampled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParameterKind {
    /// Continuous uniform range [low, high].
    FloatRange { low: f64, high: f64 },
    /// Integer range [low, high] inclusive.
    IntRange { low: i64, high: i64 },
    /// Log-uniform range (sampled in log-space then exponentiated).
    LogUniform { low: f64, high: f64 },
    /// Categorical choices.
    Choice { values: Vec<ParameterValue> },
    /// Fixed value passed through to every configuration (e.g. the number of
    /// epochs a trial should run).
    Constant { value: ParameterValue },
}

/// The full search space: an ordered list of parameter definitions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub parameters: Vec<ParameterDef>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self::default()
    }

    fn add(mut self, name: impl Into<String>, kind: ParameterKind) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind,
        });
        self
    }

    pub fn add_float(self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.add(name, ParameterKind::FloatRange { low, high })
    }

    pub fn add_int(self, name: impl Into<String>, low: i64, high: i64) -> Self {
        self.add(name, ParameterKind::IntRange { low, high })
    }

    pub fn add_log_uniform(self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.add(name, ParameterKind::LogUniform { low, high })
    }

    pub fn add_choice(self, name: impl Into<String>, values: Vec<ParameterValue>) -> Self {
        self.add(name, ParameterKind::Choice { values })
    }

    pub fn add_constant(self, name: impl Into<String>, value: impl Into<ParameterValue>) -> Self {
        self.add(
            name,
            ParameterKind::Constant {
                value: value.into(),
            },
        )
    }

    /// Reject empty, inverted or unbounded ranges.
    pub fn validate(&self) -> Result<(), String> {
        for param in &self.parameters {
            let ok = match &param.kind {
                ParameterKind::FloatRange { low, high } => {
                    low.is_finite() && high.is_finite() && low <= high
                }
                ParameterKind::IntRange { low, high } => low <= high,
                ParameterKind::LogUniform { low, high } => {
                    *low > 0.0 && high.is_finite() && low <= high
                }
                ParameterKind::Choice { values } => !values.is_empty(),
                ParameterKind::Constant { .. } => true,
            };
            if !ok {
                return Err(format!("invalid range for parameter '{}'", param.name));
            }
        }
        Ok(())
    }

    /// Total number of grid points (returns `None` if any parameter is
    /// continuous without a natural grid).
    pub fn grid_size(&self) -> Option<usize> {
        let mut total: usize = 1;
        for param in &self.parameters {
            let dim_size = match &param.kind {
                ParameterKind::IntRange { low, high } => usize::try_from(i128::from(*high) - i128::from(*low) + 1).ok()?,
                ParameterKind::Choice { values } => values.len(),
                ParameterKind::Constant { .. } => 1,
                _ => return None,
            };
            total = total.checked_mul(dim_size)?;
        }
        Some(total)
    }

    /// Draw one configuration uniformly at random.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Configuration {
        self.parameters
            .iter()
            .map(|param| {
                let value = match &param.kind {
                    ParameterKind::FloatRange { low, high } => {
                        ParameterValue::Float(rng.gen_range(*low..=*high))
                    }
                    ParameterKind::IntRange { low, high } => {
                        ParameterValue::Int(rng.gen_range(*low..=*high))
                    }
                    ParameterKind::LogUniform { low, high } => {
                        let log_val: f64 = rng.gen_range(low.ln()..=high.ln());
                        ParameterValue::Float(log_val.exp())
                    }
                    ParameterKind::Choice { values } => {
                        values[rng.gen_range(0..values.len())].clone()
                    }
                    ParameterKind::Constant { value } => value.clone(),
                };
                (param.name.clone(), value)
            })
            .collect()
    }

    /// Cartesian grid; continuous dimensions get `float_steps` evenly spaced
    /// points (log-spaced for log-uniform ranges). Points are produced on
    /// demand, so the grid may be far larger than memory.
    pub fn grid(&self, float_steps: usize) -> Grid {
        let steps = float_steps.max(2);
        let axes = self
            .parameters
            .iter()
            .map(|param| {
                let axis = match &param.kind {
                    ParameterKind::FloatRange { low, high } => GridAxis::Spaced {
                        low: *low,
                        high: *high,
                        steps,
                        log: false,
                    },
                    ParameterKind::IntRange { low, high } => GridAxis::Ints {
                        low: *low,
                        count: (i128::from(*high) - i128::from(*low) + 1).max(0) as u128,
                    },
                    ParameterKind::LogUniform { low, high } => GridAxis::Spaced {
                        low: low.ln(),
                        high: high.ln(),
                        steps,
                        log: true,
                    },
                    ParameterKind::Choice { values } => GridAxis::Listed(values.clone()),
                    ParameterKind::Constant { value } => GridAxis::Listed(vec![value.clone()]),
                };
                (param.name.clone(), axis)
            })
            .collect();
        Grid::new(axes)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum GridAxis {
    Ints { low: i64, count: u128 },
    Spaced { low: f64, high: f64, steps: usize, log: bool },
    Listed(Vec<ParameterValue>),
}

impl GridAxis {
    fn len(&self) -> u128 {
        match self {
            Self::Ints { count, .. } => *count,
            Self::Spaced { steps, .. } => *steps as u128,
            Self::Listed(values) => values.len() as u128,
        }
    }

    fn value(&self, index: u128) -> ParameterValue {
        match self {
            // index < count, so the sum stays within [low, high]
            Self::Ints { low, .. } => ParameterValue::Int((i128::from(*low) + index as i128) as i64),
            Self::Spaced {
                low,
                high,
                steps,
                log,
            } => {
                let v = low + (index as f64 / (*steps - 1) as f64) * (high - low);
                ParameterValue::Float(if *log { v.exp() } else { v })
            }
            Self::Listed(values) => values[index as usize].clone(),
        }
    }
}

/// Cartesian product of the search space axes, indexed in row-major order:
/// the last parameter varies fastest.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    axes: Vec<(String, GridAxis)>,
    /// Saturates at `u128::MAX`.
    total: u128,
}

impl Grid {
    fn new(axes: Vec<(String, GridAxis)>) -> Self {
        let total = axes
            .iter()
            .try_fold(1u128, |acc, (_, axis)| acc.checked_mul(axis.len()))
            .unwrap_or(u128::MAX);
        Self { axes, total }
    }

    /// Number of points, saturating at `usize::MAX`.
    pub fn len(&self) -> usize {
        usize::try_from(self.total).unwrap_or(usize::MAX)
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// The configuration at `index`, if inside the grid.
    pub fn get(&self, index: usize) -> Option<Configuration> {
        let mut rest = index as u128;
        if rest >= self.total {
            return None;
        }
        let mut values = Vec::with_capacity(self.axes.len());
        for (name, axis) in self.axes.iter().rev() {
            let len = axis.len();
            values.push((name.clone(), axis.value(rest % len)));
            rest /= len;
        }
        Some(values.into_iter().collect())
    }

    pub fn iter(&self) -> impl Iterator<Item = Configuration> + '_ {
        (0..self.len()).map_while(|i| self.get(i))
    }
}
