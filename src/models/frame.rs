use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

/// A named, columnar time-series result: the final, immutable artifact
/// handed back to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub name: String,
    pub fields: Vec<Field>,
    pub meta: FrameMeta,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameMeta {
    /// Human-readable annotation combining the dispatched expression and
    /// step, surfaced to inspectors rather than as a data column.
    pub executed_query_string: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub values: FieldValues,
}

/// Column storage. Value columns are nullable so NaN samples can be encoded
/// as absent rather than as the NaN bit pattern.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValues {
    Time(Vec<DateTime<Utc>>),
    Number(Vec<Option<f64>>),
    Text(Vec<String>),
}

impl Frame {
    pub fn new(name: impl Into<String>) -> Self {
        Frame {
            name: name.into(),
            fields: Vec::new(),
            meta: FrameMeta::default(),
        }
    }

    pub fn with_fields(name: impl Into<String>, fields: Vec<Field>) -> Self {
        Frame {
            name: name.into(),
            fields,
            meta: FrameMeta::default(),
        }
    }

    /// True when every field holds the same number of rows, i.e. Time and
    /// Value columns are index-aligned.
    pub fn is_aligned(&self) -> bool {
        let mut lens = self.fields.iter().map(Field::len);
        match lens.next() {
            Some(first) => lens.all(|l| l == first),
            None => true,
        }
    }
}

impl Field {
    pub fn time(name: impl Into<String>, values: Vec<DateTime<Utc>>) -> Self {
        Field {
            name: name.into(),
            labels: BTreeMap::new(),
            values: FieldValues::Time(values),
        }
    }

    pub fn number(
        name: impl Into<String>,
        labels: BTreeMap<String, String>,
        values: Vec<Option<f64>>,
    ) -> Self {
        Field {
            name: name.into(),
            labels,
            values: FieldValues::Number(values),
        }
    }

    pub fn text(name: impl Into<String>, values: Vec<String>) -> Self {
        Field {
            name: name.into(),
            labels: BTreeMap::new(),
            values: FieldValues::Text(values),
        }
    }

    pub fn len(&self) -> usize {
        match &self.values {
            FieldValues::Time(v) => v.len(),
            FieldValues::Number(v) => v.len(),
            FieldValues::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Canonical string identity of a label set: keys joined in lexicographic
/// order, e.g. `app=Application, tag2=tag2`. Deterministic regardless of the
/// input's original ordering.
pub fn canonical_labels(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(", ")
}
