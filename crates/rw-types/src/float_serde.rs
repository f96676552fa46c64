//! Serde adapters for floats that may be non-finite.
//!
//! serde_json writes NaN and infinities as `null` and cannot read them back.
//! Metric values can legitimately be NaN (a diverged trial), so every
//! persisted metric goes through these adapters, which write non-finite
//! values as the strings `"NaN"`, `"inf"` and `"-inf"`:
//!
//! ```ignore
//! #[serde(with = "rw_types::float_serde::map")]
//! pub metrics: BTreeMap<String, f64>,
//! ```

use serde::de::{self, Unexpected, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

#[derive(Debug, Clone, Copy)]
struct Float(f64);

impl Serialize for Float {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let v = self.0;
        if v.is_nan() {
            serializer.serialize_str("NaN")
        } else if v == f64::INFINITY {
            serializer.serialize_str("inf")
        } else if v == f64::NEG_INFINITY {
            serializer.serialize_str("-inf")
        } else {
            serializer.serialize_f64(v)
        }
    }
}

struct FloatVisitor;

impl<'de> Visitor<'de> for FloatVisitor {
    type Value = Float;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a number or one of \"NaN\", \"inf\", \"-inf\"")
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Float, E> {
        Ok(Float(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Float, E> {
        Ok(Float(v as f64))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Float, E> {
        Ok(Float(v as f64))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Float, E> {
        match v {
            "NaN" => Ok(Float(f64::NAN)),
            "inf" => Ok(Float(f64::INFINITY)),
            "-inf" => Ok(Float(f64::NEG_INFINITY)),
            other => Err(E::invalid_value(Unexpected::Str(other), &self)),
        }
    }
}

impl<'de> Deserialize<'de> for Float {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(FloatVisitor)
    }
}

/// A single `f64`.
pub mod value {
    use super::*;

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        Float(*value).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Float::deserialize(deserializer).map(|f| f.0)
    }
}

/// A `BTreeMap<String, f64>` such as [`Metrics`](crate::Metrics).
pub mod map {
    use super::*;
    use std::collections::BTreeMap;

    pub fn serialize<S: Serializer>(
        map: &BTreeMap<String, f64>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_map(map.iter().map(|(k, v)| (k, Float(*v))))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<String, f64>, D::Error> {
        let raw = BTreeMap::<String, Float>::deserialize(deserializer)?;
        Ok(raw.into_iter().map(|(k, v)| (k, v.0)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[derive(Debug, Serialize, Deserialize)]
    struct Sample {
        #[serde(with = "value")]
        value: f64,
        #[serde(with = "map")]
        metrics: BTreeMap<String, f64>,
    }

    #[test]
    fn non_finite_values_survive_json() {
        let sample = Sample {
            value: f64::NAN,
            metrics: [
                ("loss".to_string(), f64::NAN),
                ("hi".to_string(), f64::INFINITY),
                ("lo".to_string(), f64::NEG_INFINITY),
                ("acc".to_string(), 0.25),
            ]
            .into_iter()
            .collect(),
        };
        let json = serde_json::to_string(&sample).unwrap();
        assert!(!json.contains("null"));

        let back: Sample = serde_json::from_str(&json).unwrap();
        assert!(back.value.is_nan());
        assert!(back.metrics["loss"].is_nan());
        assert_eq!(back.metrics["hi"], f64::INFINITY);
        assert_eq!(back.metrics["lo"], f64::NEG_INFINITY);
        assert_eq!(back.metrics["acc"], 0.25);
    }

    #[test]
    fn plain_numbers_and_integers_are_read() {
        let back: Sample = serde_json::from_str(r#"{"value": 3, "metrics": {"n": -2}}"#).unwrap();
        assert_eq!(back.value, 3.0);
        assert_eq!(back.metrics["n"], -2.0);
    }

    #[test]
    fn unknown_strings_are_rejected() {
        let err = serde_json::from_str::<Sample>(r#"{"value": "nan?", "metrics": {}}"#);
        assert!(err.is_err());
    }
}
