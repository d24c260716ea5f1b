//! Datums and samples: the in-memory input of a dataset build.
//!
//! A [`Datum`] is one named field value together with the behavior needed to
//! write it: how to materialize it ([`Decompress`]) and how to turn the
//! materialized value into a container feature ([`Encoder`]). A [`Sample`] is
//! the ordered set of datums that becomes one record.
//!
//! ```
//! use shardset::{Datum, Encoder, NdArray, Sample, Value};
//!
//! let image = Datum::new("image", Value::Array(NdArray::new(vec![2, 2], vec![0.0; 4])?))?
//!     .with_encoder(Encoder::FloatArray);
//! let label = Datum::new("label", Value::Str("cat".into()))?
//!     .with_encoder(Encoder::String);
//! let sample = Sample::new(vec![image, label])?;
//! assert_eq!(sample.len(), 2);
//! # Ok::<(), anyhow::Error>(())
//! ```

use crate::codec::{Decompress, Encoder};
use crate::error::DatasetError;
use crate::features::Feature;
use anyhow::Result;
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;

/// Dense row-major `f32` array with an explicit shape.
#[derive(Clone, Debug, PartialEq)]
pub struct NdArray {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl NdArray {
    /// Build an array, checking that `data` fills `shape` exactly.
    ///
    /// # Errors
    /// Returns [`DatasetError::InvalidDatum`] if the element count differs
    /// from the product of `shape`.
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(DatasetError::InvalidDatum(format!(
                "array of shape {shape:?} needs {expected} elements, got {}",
                data.len()
            ))
            .into());
        }
        Ok(Self { shape, data })
    }

    /// One-dimensional array.
    #[must_use]
    pub fn from_vec(data: Vec<f32>) -> Self {
        Self {
            shape: vec![data.len()],
            data,
        }
    }

    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Elements in row-major order; this is also the flattened form.
    #[must_use]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Same data under a new shape.
    ///
    /// # Errors
    /// Fails if the new shape does not hold the same number of elements.
    pub fn reshape(self, shape: Vec<usize>) -> Result<Self> {
        Self::new(shape, self.data)
    }

    #[must_use]
    pub fn into_data(self) -> Vec<f32> {
        self.data
    }
}

/// A scalar element of a tuple value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Scalar {
    Int(i64),
    Float(f32),
}

impl Scalar {
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub const fn as_f32(self) -> f32 {
        match self {
            Self::Int(v) => v as f32,
            Self::Float(v) => v,
        }
    }
}

/// Every value kind a datum may hold.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Array(NdArray),
    Int(i64),
    /// Single precision, the width of a float-list feature.
    Float(f32),
    Str(String),
    Tuple(Vec<Scalar>),
    Bytes(Vec<u8>),
}

impl Value {
    /// Runtime type name recorded in the schema.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Array(_) => "ndarray",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Tuple(_) => "tuple",
            Self::Bytes(_) => "bytes",
        }
    }

    /// Shape string recorded in the schema.
    ///
    /// Arrays use tuple notation (`(3, 4)`, `(5,)`, `()`), scalars `[1]`,
    /// tuples `(n,)`, and strings/blobs `None`.
    #[must_use]
    pub fn shape_repr(&self) -> String {
        match self {
            Self::Array(a) => tuple_repr(a.shape()),
            Self::Tuple(t) => tuple_repr(&[t.len()]),
            Self::Int(_) | Self::Float(_) => "[1]".to_string(),
            Self::Str(_) | Self::Bytes(_) => "None".to_string(),
        }
    }

    #[must_use]
    pub const fn as_array(&self) -> Option<&NdArray> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_float(&self) -> Option<f32> {
        match self {
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

fn tuple_repr(dims: &[usize]) -> String {
    match dims {
        [] => "()".to_string(),
        [d] => format!("({d},)"),
        _ => {
            let parts: Vec<String> = dims.iter().map(ToString::to_string).collect();
            format!("({})", parts.join(", "))
        }
    }
}

impl From<NdArray> for Value {
    fn from(v: NdArray) -> Self {
        Self::Array(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<PathBuf> for Value {
    fn from(v: PathBuf) -> Self {
        Self::Str(v.to_string_lossy().into_owned())
    }
}

/// A named value plus its decompress and encode behavior.
///
/// Datums are never mutated: decompression produces a new datum via
/// [`Datum::derive`].
#[derive(Clone, Debug)]
pub struct Datum {
    name: String,
    value: Value,
    decompress: Decompress,
    serialize: Option<Encoder>,
}

impl Datum {
    /// Create a datum with identity decompression and no encoder.
    ///
    /// # Errors
    /// Returns [`DatasetError::InvalidDatum`] if `name` is empty.
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(DatasetError::InvalidDatum("datum name must not be empty".into()).into());
        }
        Ok(Self {
            name,
            value: value.into(),
            decompress: Decompress::Identity,
            serialize: None,
        })
    }

    #[must_use]
    pub fn with_decompress(mut self, decompress: Decompress) -> Self {
        self.decompress = decompress;
        self
    }

    #[must_use]
    pub fn with_encoder(mut self, encoder: Encoder) -> Self {
        self.serialize = Some(encoder);
        self
    }

    /// New datum with the same name and encoder holding `value`.
    ///
    /// The derived datum is already materialized, so its decompress step is
    /// the identity.
    #[must_use]
    pub fn derive(&self, value: Value) -> Self {
        Self {
            name: self.name.clone(),
            value,
            decompress: Decompress::Identity,
            serialize: self.serialize.clone(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn value(&self) -> &Value {
        &self.value
    }

    #[must_use]
    pub const fn decompressor(&self) -> &Decompress {
        &self.decompress
    }

    #[must_use]
    pub const fn encoder(&self) -> Option<&Encoder> {
        self.serialize.as_ref()
    }

    /// Run this datum's decompress step. `Ok(None)` means "skip the sample".
    ///
    /// # Errors
    /// Propagates the decompressor's failure.
    pub fn decompress(&self) -> Result<Option<Self>> {
        self.decompress.apply(self)
    }

    /// Encode this (already decompressed) datum.
    ///
    /// # Errors
    /// Returns [`DatasetError::MissingEncoder`] if no encoder was set, or the
    /// encoder's failure.
    pub fn encode(&self) -> Result<Feature> {
        let encoder = self
            .serialize
            .as_ref()
            .ok_or_else(|| DatasetError::MissingEncoder(self.name.clone()))?;
        encoder.apply(self)
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Name: {} -- Value: {:?}", self.name, self.value)
    }
}

/// An ordered set of uniquely-named datums: one record.
#[derive(Clone, Debug, Default)]
pub struct Sample {
    datums: Vec<Datum>,
}

impl Sample {
    /// # Errors
    /// Returns [`DatasetError::DuplicateField`] if two datums share a name.
    pub fn new(datums: Vec<Datum>) -> Result<Self> {
        check_unique(&datums)?;
        Ok(Self { datums })
    }

    #[must_use]
    pub fn datums(&self) -> &[Datum] {
        &self.datums
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.datums.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.datums.is_empty()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Datum> {
        self.datums.iter().find(|d| d.name == name)
    }

    /// Decompress every datum. `Ok(None)` if any datum asks to skip.
    ///
    /// # Errors
    /// Propagates the first decompress failure.
    pub fn decompress(&self) -> Result<Option<Vec<Datum>>> {
        let mut out = Vec::with_capacity(self.datums.len());
        for datum in &self.datums {
            match datum.decompress()? {
                Some(d) => out.push(d),
                None => return Ok(None),
            }
        }
        Ok(Some(out))
    }
}

impl<'a> IntoIterator for &'a Sample {
    type Item = &'a Datum;
    type IntoIter = std::slice::Iter<'a, Datum>;

    fn into_iter(self) -> Self::IntoIter {
        self.datums.iter()
    }
}

pub(crate) fn check_unique(datums: &[Datum]) -> Result<()> {
    let mut seen = HashSet::with_capacity(datums.len());
    for d in datums {
        if !seen.insert(d.name.as_str()) {
            return Err(DatasetError::DuplicateField(d.name.clone()).into());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_shape_must_match_data() {
        assert!(NdArray::new(vec![2, 3], vec![0.0; 6]).is_ok());
        assert!(NdArray::new(vec![2, 3], vec![0.0; 5]).is_err());
        assert!(NdArray::new(vec![], vec![1.0]).is_ok());
    }

    #[test]
    fn shape_repr_follows_tuple_notation() {
        let a = Value::Array(NdArray::new(vec![3, 4], vec![0.0; 12]).unwrap());
        assert_eq!(a.shape_repr(), "(3, 4)");
        assert_eq!(Value::Array(NdArray::from_vec(vec![1.0; 5])).shape_repr(), "(5,)");
        assert_eq!(Value::Float(1.0).shape_repr(), "[1]");
        assert_eq!(Value::Str("x".into()).shape_repr(), "None");
        assert_eq!(
            Value::Tuple(vec![Scalar::Int(1), Scalar::Float(2.0)]).shape_repr(),
            "(2,)"
        );
    }

    #[test]
    fn empty_name_is_rejected() {
        assert!(Datum::new("", 1i64).is_err());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let a = Datum::new("x", 1i64).unwrap();
        let b = Datum::new("x", 2i64).unwrap();
        let err = Sample::new(vec![a, b]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DatasetError>(),
            Some(DatasetError::DuplicateField(n)) if n == "x"
        ));
    }

    #[test]
    fn derive_keeps_name_and_encoder() {
        let d = Datum::new("img", "a.npy")
            .unwrap()
            .with_decompress(Decompress::LoadNpy)
            .with_encoder(Encoder::FloatArray);
        let derived = d.derive(Value::Int(3));
        assert_eq!(derived.name(), "img");
        assert!(matches!(derived.encoder(), Some(Encoder::FloatArray)));
        assert!(matches!(derived.decompressor(), Decompress::Identity));
    }
}
