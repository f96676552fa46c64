//! Duplicate detection for proposed configurations.

use rw_types::Configuration;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateDetector {
    /// Matches only configurations equal in every value (floats compared
    /// bitwise, categorical values by equality).
    #[default]
    Identical,
    /// Never reports a duplicate.
    NoDetection,
}

impl DuplicateDetector {
    pub fn contains<'a, I>(self, existing: I, candidate: &Configuration) -> bool
    where
        I: IntoIterator<Item = &'a Configuration>,
    {
        match self {
            Self::Identical => existing.into_iter().any(|c| c.identical(candidate)),
            Self::NoDetection => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rw_types::ParameterValue;

    fn config(hp1: i64, hp2: f64, hp3: &str) -> Configuration {
        [
            ("hp1", ParameterValue::Int(hp1)),
            ("hp2", ParameterValue::Float(hp2)),
            ("hp3", ParameterValue::Text(hp3.to_string())),
        ]
        .into_iter()
        .collect()
    }

    fn cases() -> Vec<((i64, f64, &'static str), bool)> {
        vec![
            ((10000, 3.0, "c"), false),
            ((10, 1.000001, "a"), false),
            ((20, 2.000001, "b"), false),
            ((25, 1.0, "a"), false),
            ((10, 1.0, "a"), true),
            ((20, 2.0, "b"), true),
            ((19, 1.0, "a"), false),
            ((10, 1.0000001, "a"), false),
            ((10, 1.0, "c"), false),
            ((10, 1.0, "b"), false),
            ((20, 1.0, "b"), false),
        ]
    }

    #[test]
    fn identical_matches_exact_configurations_only() {
        let existing = [config(10, 1.0, "a"), config(20, 2.0, "b")];
        for ((hp1, hp2, hp3), contained) in cases() {
            let candidate = config(hp1, hp2, hp3);
            assert_eq!(
                DuplicateDetector::Identical.contains(&existing, &candidate),
                contained,
                "candidate {candidate}"
            );
        }
    }

    #[test]
    fn no_detection_never_matches() {
        let existing = [config(10, 1.0, "a"), config(20, 2.0, "b")];
        for ((hp1, hp2, hp3), _) in cases() {
            assert!(!DuplicateDetector::NoDetection.contains(&existing, &config(hp1, hp2, hp3)));
        }
    }
}
