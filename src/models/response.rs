use std::collections::BTreeMap;
use std::fmt;

use serde::de::{self, Deserializer};
use serde::Deserialize;

/// Top-level response envelope from the upstream API. `data` is kept raw
/// because exemplar endpoints use a different schema than the three core
/// result types.
#[derive(Debug, Deserialize)]
pub struct Envelope {
    pub status: String,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default, rename = "errorType")]
    pub error_type: Option<String>,
}

/// Result payload for instant, range and scalar queries, tagged by
/// `resultType` on the wire.
#[derive(Debug, Deserialize)]
#[serde(tag = "resultType", content = "result", rename_all = "lowercase")]
pub enum ResultData {
    Matrix(Vec<RangeSeries>),
    Vector(Vec<InstantSample>),
    Scalar(SamplePair),
}

/// One series of a matrix result. `BTreeMap` keeps label keys in
/// lexicographic order, which the naming and identity rules depend on.
#[derive(Debug, Clone, Deserialize)]
pub struct RangeSeries {
    #[serde(default)]
    pub metric: BTreeMap<String, String>,
    #[serde(default)]
    pub values: Vec<SamplePair>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstantSample {
    #[serde(default)]
    pub metric: BTreeMap<String, String>,
    pub value: SamplePair,
}

/// A `[timestamp, "value"]` pair: fractional Unix seconds plus the value as
/// a decimal string.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SamplePair(pub f64, pub SampleValue);

/// Result payload for exemplar queries: a list of series, each carrying its
/// identifying labels and the exemplars observed for it.
#[derive(Debug, Clone, Deserialize)]
pub struct ExemplarSeries {
    #[serde(default, rename = "seriesLabels")]
    pub series_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub exemplars: Vec<Exemplar>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Exemplar {
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub value: SampleValue,
    pub timestamp: f64,
}

/// A sample value as the API serializes it: usually a decimal string, with
/// "NaN", "+Inf" and "-Inf" as the non-finite spellings. Bare numbers are
/// accepted too.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleValue(pub f64);

impl<'de> Deserialize<'de> for SampleValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct Visitor;

        impl de::Visitor<'_> for Visitor {
            type Value = SampleValue;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a numeric sample value or its string form")
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<SampleValue, E> {
                Ok(SampleValue(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<SampleValue, E> {
                Ok(SampleValue(v as f64))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<SampleValue, E> {
                Ok(SampleValue(v as f64))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<SampleValue, E> {
                let parsed = match v {
                    "NaN" => f64::NAN,
                    "+Inf" | "Inf" => f64::INFINITY,
                    "-Inf" => f64::NEG_INFINITY,
                    _ => v
                        .parse::<f64>()
                        .map_err(|_| E::custom(format!("invalid sample value: {v:?}")))?,
                };
                Ok(SampleValue(parsed))
            }
        }

        deserializer.deserialize_any(Visitor)
    }
}
