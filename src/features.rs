//! Typed feature values and the record payload that carries them.
//!
//! An [`Example`] is what one shard frame holds: a map from field name to a
//! [`Feature`]. Features are plain lists (floats, 64-bit integers, or byte
//! strings); shapes and logical types live in the schema, not in the record.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One encoded field value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Feature {
    FloatList(Vec<f32>),
    Int64List(Vec<i64>),
    BytesList(Vec<Vec<u8>>),
}

impl Feature {
    /// Single-element float list.
    #[must_use]
    pub fn float(v: f32) -> Self {
        Self::FloatList(vec![v])
    }

    /// Single-element bytes list.
    #[must_use]
    pub fn bytes(v: impl Into<Vec<u8>>) -> Self {
        Self::BytesList(vec![v.into()])
    }

    /// Short name of the list kind, used in error messages.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::FloatList(_) => "float",
            Self::Int64List(_) => "int64",
            Self::BytesList(_) => "bytes",
        }
    }

    /// Number of elements in the list.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::FloatList(v) => v.len(),
            Self::Int64List(v) => v.len(),
            Self::BytesList(v) => v.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Numeric contents as `f32`, converting int64 lists. `None` for bytes.
    #[must_use]
    pub fn to_f32_vec(&self) -> Option<Vec<f32>> {
        match self {
            Self::FloatList(v) => Some(v.clone()),
            #[allow(clippy::cast_precision_loss)]
            Self::Int64List(v) => Some(v.iter().map(|&x| x as f32).collect()),
            Self::BytesList(_) => None,
        }
    }
}

/// A record: named features in a stable (sorted) order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Example {
    pub features: BTreeMap<String, Feature>,
}

impl Example {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a feature, replacing any previous value under the same name.
    pub fn insert(&mut self, name: impl Into<String>, feature: Feature) {
        self.features.insert(name.into(), feature);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Feature> {
        self.features.get(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Serialize to the frame payload format.
    ///
    /// # Errors
    /// Returns an error if postcard serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        postcard::to_allocvec(self).context("serialize example")
    }

    /// Decode a frame payload.
    ///
    /// # Errors
    /// Returns an error if the payload is not a valid encoded example.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        postcard::from_bytes(bytes).context("deserialize example")
    }
}

impl FromIterator<(String, Feature)> for Example {
    fn from_iter<I: IntoIterator<Item = (String, Feature)>>(iter: I) -> Self {
        Self {
            features: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_roundtrip_keeps_all_kinds() {
        let mut ex = Example::new();
        ex.insert("a", Feature::FloatList(vec![1.0, 2.5]));
        ex.insert("b", Feature::Int64List(vec![-3, 7]));
        ex.insert("c", Feature::bytes("hi"));

        let back = Example::from_bytes(&ex.to_bytes().unwrap()).unwrap();
        assert_eq!(back, ex);
    }

    #[test]
    fn int_lists_convert_to_floats() {
        let f = Feature::Int64List(vec![1, 2]);
        assert_eq!(f.to_f32_vec(), Some(vec![1.0, 2.0]));
        assert_eq!(Feature::bytes("x").to_f32_vec(), None);
    }
}
