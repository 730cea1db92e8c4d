use serde::ser::{Serialize, SerializeMap, Serializer};
use std::fmt;

/// Timestamp type (milliseconds since the unix epoch).
pub type Timestamp = i64;

/// Value type.
pub type Value = f64;

/// Reserved label name carrying the metric name of a series.
pub const METRIC_NAME_LABEL: &str = "__name__";

/// A single (timestamp, value) data point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub timestamp: Timestamp,
    pub value: Value,
}

impl Sample {
    pub fn new(timestamp: Timestamp, value: Value) -> Self {
        Self { timestamp, value }
    }
}

/// One (name, value) pair of a series' label set.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Label {
    pub name: String,
    pub value: String,
}

/// The identity of a series: labels sorted by name, names unique.
///
/// Immutable once read from a block. Serializes as a JSON object in
/// name order, which is also how label sets are rendered in output.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Labels(Vec<Label>);

impl Labels {
    /// Builds a label set from (name, value) pairs. Pairs are sorted by
    /// name; a duplicate name keeps the first occurrence.
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        let labels = pairs
            .iter()
            .map(|(n, v)| Label {
                name: n.to_string(),
                value: v.to_string(),
            })
            .collect();
        Self::new(labels)
    }

    /// Builds a label set from already-owned labels, normalizing order.
    pub fn new(mut labels: Vec<Label>) -> Self {
        labels.sort();
        labels.dedup_by(|a, b| a.name == b.name);
        Self(labels)
    }

    /// Label set as read back from an index entry. The writer stores
    /// labels pre-sorted, so no normalization pass is needed.
    pub(crate) fn from_sorted(labels: Vec<Label>) -> Self {
        debug_assert!(labels.windows(2).all(|w| w[0].name < w[1].name));
        Self(labels)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|l| l.name == name)
            .map(|l| l.value.as_str())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Label> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for Labels {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for l in &self.0 {
            map.serialize_entry(&l.name, &l.value)?;
        }
        map.end()
    }
}

impl fmt::Display for Labels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, l) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={:?}", l.name, l.value)?;
        }
        write!(f, "}}")
    }
}
