//! Fixed-length decoding of records back into typed values.

use crate::datum::{NdArray, Scalar, Value};
use crate::error::DatasetError;
use crate::features::{Example, Feature};
use crate::schema::{read_schema, DecodeSpec, FeatureKind, FeatureSpec, ShapeMap};
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::Path;

/// A decoded record: field name → reconstructed value.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParsedSample {
    values: BTreeMap<String, Value>,
}

impl ParsedSample {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    #[must_use]
    pub fn array(&self, name: &str) -> Option<&NdArray> {
        self.get(name).and_then(Value::as_array)
    }

    #[must_use]
    pub fn str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    #[must_use]
    pub fn int(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_int)
    }

    #[must_use]
    pub fn float(&self, name: &str) -> Option<f32> {
        self.get(name).and_then(Value::as_float)
    }

    #[must_use]
    pub fn bytes(&self, name: &str) -> Option<&[u8]> {
        self.get(name).and_then(Value::as_bytes)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn into_inner(self) -> BTreeMap<String, Value> {
        self.values
    }
}

/// Decodes records according to a schema-derived plan.
#[derive(Clone, Debug)]
pub struct Parser {
    spec: DecodeSpec,
    shapes: ShapeMap,
}

impl Parser {
    #[must_use]
    pub const fn new(spec: DecodeSpec, shapes: ShapeMap) -> Self {
        Self { spec, shapes }
    }

    /// # Errors
    /// Fails if the schema cannot be read or contains a bad shape.
    pub fn from_schema_file(path: impl AsRef<Path>) -> Result<Self> {
        let (spec, shapes) = read_schema(path)?;
        Ok(Self::new(spec, shapes))
    }

    #[must_use]
    pub const fn spec(&self) -> &DecodeSpec {
        &self.spec
    }

    #[must_use]
    pub const fn shapes(&self) -> &ShapeMap {
        &self.shapes
    }

    /// Decode every field of the plan from `example`.
    ///
    /// Features in the record that the plan does not mention are ignored.
    ///
    /// # Errors
    /// Returns [`DatasetError::MissingFeature`], [`DatasetError::LengthMismatch`]
    /// or [`DatasetError::FeatureKind`] when the record does not fit the plan,
    /// or an error if a string field is not valid UTF-8.
    pub fn parse(&self, example: &Example) -> Result<ParsedSample> {
        let mut values = BTreeMap::new();
        for (name, spec) in &self.spec {
            let feature = example
                .get(name)
                .ok_or_else(|| DatasetError::MissingFeature(name.clone()))?;
            if feature.len() != spec.len {
                return Err(DatasetError::LengthMismatch {
                    field: name.clone(),
                    expected: spec.len,
                    found: feature.len(),
                }
                .into());
            }
            let value = match spec.kind {
                FeatureKind::Float => self.rebuild_numeric(name, spec, feature)?,
                FeatureKind::Bytes => rebuild_bytes(name, spec, feature)?,
            };
            values.insert(name.clone(), value);
        }
        Ok(ParsedSample { values })
    }

    #[allow(clippy::cast_possible_truncation)]
    fn rebuild_numeric(&self, name: &str, spec: &FeatureSpec, feature: &Feature) -> Result<Value> {
        // Int64 lists hold exact integers; do not route them through f32.
        if let Feature::Int64List(v) = feature {
            match spec.ty.as_str() {
                "int" => return Ok(Value::Int(first(name, v)?)),
                "tuple" => return Ok(Value::Tuple(v.iter().copied().map(Scalar::Int).collect())),
                _ => {}
            }
        }
        let data = feature.to_f32_vec().ok_or_else(|| DatasetError::FeatureKind {
            field: name.to_string(),
            expected: "float",
            found: feature.kind_name(),
        })?;
        let value = match spec.ty.as_str() {
            "int" => Value::Int(first(name, &data)?.round() as i64),
            "float" => Value::Float(first(name, &data)?),
            "tuple" => Value::Tuple(data.into_iter().map(Scalar::Float).collect()),
            _ => {
                let dims = self.shapes.get(name).cloned().unwrap_or_default();
                Value::Array(
                    NdArray::new(dims, data)
                        .with_context(|| format!("reshape feature `{name}`"))?,
                )
            }
        };
        Ok(value)
    }
}

/// The single element of a scalar field.
fn first<T: Copy>(name: &str, values: &[T]) -> Result<T> {
    values.first().copied().ok_or_else(|| {
        DatasetError::LengthMismatch {
            field: name.to_string(),
            expected: 1,
            found: 0,
        }
        .into()
    })
}

fn rebuild_bytes(name: &str, spec: &FeatureSpec, feature: &Feature) -> Result<Value> {
    let Feature::BytesList(items) = feature else {
        return Err(DatasetError::FeatureKind {
            field: name.to_string(),
            expected: "bytes",
            found: feature.kind_name(),
        }
        .into());
    };
    let raw = first_item(name, items)?;
    if spec.ty == "str" {
        let s = String::from_utf8(raw)
            .with_context(|| format!("feature `{name}` is not valid UTF-8"))?;
        Ok(Value::Str(s))
    } else {
        Ok(Value::Bytes(raw))
    }
}

fn first_item(name: &str, items: &[Vec<u8>]) -> Result<Vec<u8>> {
    items.first().cloned().ok_or_else(|| {
        DatasetError::LengthMismatch {
            field: name.to_string(),
            expected: 1,
            found: 0,
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldSchema, Schema};

    fn parser(fields: &[(&str, &str, &str)]) -> Parser {
        let mut schema = Schema::default();
        for (name, ty, shape) in fields {
            schema.fields.insert(
                (*name).to_string(),
                FieldSchema {
                    ty: (*ty).to_string(),
                    shape: (*shape).to_string(),
                },
            );
        }
        let (spec, shapes) = schema.decode_spec().unwrap();
        Parser::new(spec, shapes)
    }

    #[test]
    fn rebuilds_each_recorded_type() {
        let p = parser(&[
            ("img", "ndarray", "(2, 2)"),
            ("label", "str", "None"),
            ("n", "int", "[1]"),
            ("w", "float", "[1]"),
            ("t", "tuple", "(2,)"),
        ]);
        let ex: Example = [
            ("img".to_string(), Feature::FloatList(vec![1.0, 2.0, 3.0, 4.0])),
            ("label".to_string(), Feature::bytes("cat")),
            ("n".to_string(), Feature::Int64List(vec![7])),
            ("w".to_string(), Feature::float(0.5)),
            ("t".to_string(), Feature::FloatList(vec![1.0, 2.0])),
        ]
        .into_iter()
        .collect();

        let parsed = p.parse(&ex).unwrap();
        assert_eq!(parsed.array("img").unwrap().shape(), &[2, 2]);
        assert_eq!(parsed.str("label"), Some("cat"));
        assert_eq!(parsed.int("n"), Some(7));
        assert_eq!(parsed.float("w"), Some(0.5));
        assert_eq!(
            parsed.get("t"),
            Some(&Value::Tuple(vec![Scalar::Float(1.0), Scalar::Float(2.0)]))
        );
    }

    #[test]
    fn wrong_length_is_rejected() {
        let p = parser(&[("img", "ndarray", "(2, 2)")]);
        let mut ex = Example::new();
        ex.insert("img", Feature::FloatList(vec![1.0; 3]));
        let err = p.parse(&ex).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DatasetError>(),
            Some(DatasetError::LengthMismatch { expected: 4, found: 3, .. })
        ));
    }

    #[test]
    fn missing_and_mistyped_features_are_rejected() {
        let p = parser(&[("label", "str", "None")]);
        let err = p.parse(&Example::new()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DatasetError>(),
            Some(DatasetError::MissingFeature(n)) if n == "label"
        ));

        let mut ex = Example::new();
        ex.insert("label", Feature::float(1.0));
        let err = p.parse(&ex).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DatasetError>(),
            Some(DatasetError::FeatureKind { expected: "bytes", found: "float", .. })
        ));
    }

    #[test]
    fn zero_size_scalar_is_a_length_mismatch() {
        let p = parser(&[("n", "int", "[0]"), ("w", "float", "[0]")]);
        let mut ex = Example::new();
        ex.insert("n", Feature::Int64List(Vec::new()));
        ex.insert("w", Feature::FloatList(Vec::new()));
        let err = p.parse(&ex).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DatasetError>(),
            Some(DatasetError::LengthMismatch { expected: 1, found: 0, .. })
        ));
    }

    #[test]
    fn int_tuples_keep_integer_elements() {
        let p = parser(&[("ids", "tuple", "(3,)")]);
        let mut ex = Example::new();
        ex.insert("ids", Feature::Int64List(vec![(1 << 40) + 1, 0, -5]));
        let parsed = p.parse(&ex).unwrap();
        assert_eq!(
            parsed.get("ids"),
            Some(&Value::Tuple(vec![Scalar::Int((1 << 40) + 1), Scalar::Int(0), Scalar::Int(-5)]))
        );
    }
}
