//! Schema side-car documents.
//!
//! A schema records, for every field of one representative sample, the
//! runtime type and shape of its *decompressed* value. It is the only
//! contract between a write run and a later read run: readers build their
//! fixed-length decode plan from it and trust it unconditionally.
//!
//! ```text
//! {
//!   "image": { "type": "ndarray", "shape": "(3, 4)" },
//!   "label": { "type": "str",     "shape": "None"   },
//!   "score": { "type": "float",   "shape": "[1]"    }
//! }
//! ```

use crate::datum::{Datum, Sample};
use crate::error::DatasetError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// Recorded type and shape of one field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    #[serde(rename = "type")]
    pub ty: String,
    pub shape: String,
}

/// Field name → recorded type and shape.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema {
    pub fields: BTreeMap<String, FieldSchema>,
}

/// Container-level list kind a field decodes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureKind {
    Float,
    Bytes,
}

/// Fixed-length decode plan for one field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSpec {
    pub kind: FeatureKind,
    /// Number of list elements every record must carry.
    pub len: usize,
    /// Recorded runtime type, used to rebuild the value after decoding.
    pub ty: String,
}

/// Field name → fixed-length decode plan.
pub type DecodeSpec = BTreeMap<String, FeatureSpec>;

/// Field name → dimensions to reshape a decoded field into.
///
/// Empty for strings, blobs, and true scalars.
pub type ShapeMap = BTreeMap<String, Vec<usize>>;

impl Schema {
    /// Describe already-decompressed datums.
    #[must_use]
    pub fn from_datums(datums: &[Datum]) -> Self {
        let fields = datums
            .iter()
            .map(|d| {
                let field = FieldSchema {
                    ty: d.value().type_name().to_string(),
                    shape: d.value().shape_repr(),
                };
                (d.name().to_string(), field)
            })
            .collect();
        Self { fields }
    }

    /// Decompress every datum of `sample` and describe the results.
    ///
    /// # Errors
    /// Propagates decompress failures; a sample that asks to be skipped
    /// fails with [`DatasetError::SkippedSchemaSample`].
    pub fn from_sample(sample: &Sample) -> Result<Self> {
        let datums = sample
            .decompress()?
            .ok_or(DatasetError::SkippedSchemaSample)?;
        Ok(Self::from_datums(&datums))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.get(name)
    }

    /// Write as indented JSON.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created or written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let f = File::create(path).with_context(|| format!("create {}", path.display()))?;
        let mut w = BufWriter::new(f);
        serde_json::to_writer_pretty(&mut w, self)
            .with_context(|| format!("serialize schema to {}", path.display()))?;
        w.write_all(b"\n")?;
        w.flush()?;
        Ok(())
    }

    /// Read a schema document.
    ///
    /// # Errors
    /// Returns an error if the file is missing or is not a schema document.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let f = File::open(path).with_context(|| format!("open {}", path.display()))?;
        serde_json::from_reader(BufReader::new(f))
            .with_context(|| format!("parse schema {}", path.display()))
    }

    /// Build the decode plan and shape map.
    ///
    /// `str` and `bytes` fields decode as one byte string; every other field
    /// decodes as a flat float vector whose length is the product of its
    /// recorded dimensions (a scalar when there are none).
    ///
    /// # Errors
    /// Returns [`DatasetError::SchemaShape`] if a shape token is not an integer.
    pub fn decode_spec(&self) -> Result<(DecodeSpec, ShapeMap)> {
        let mut spec = DecodeSpec::new();
        let mut shapes = ShapeMap::new();
        for (name, field) in &self.fields {
            let (kind, dims) = if is_bytes_type(&field.ty) {
                (FeatureKind::Bytes, Vec::new())
            } else {
                (FeatureKind::Float, parse_shape(name, &field.shape)?)
            };
            // An empty product is 1, so scalars and blobs both land here.
            let len = dims.iter().product::<usize>();
            spec.insert(
                name.clone(),
                FeatureSpec {
                    kind,
                    len,
                    ty: field.ty.clone(),
                },
            );
            shapes.insert(name.clone(), dims);
        }
        Ok((spec, shapes))
    }

    /// Compare decompressed datums against this schema.
    ///
    /// The field sets must be identical and every field must have the
    /// recorded type and shape.
    ///
    /// # Errors
    /// Returns [`DatasetError::SchemaMismatch`] describing the first difference.
    pub fn check_sample(&self, datums: &[Datum]) -> Result<()> {
        if datums.len() != self.fields.len() {
            return Err(DatasetError::SchemaMismatch(format!(
                "expected {} fields, sample has {}",
                self.fields.len(),
                datums.len()
            ))
            .into());
        }
        for d in datums {
            let field = self.fields.get(d.name()).ok_or_else(|| {
                DatasetError::SchemaMismatch(format!("field `{}` is not in the schema", d.name()))
            })?;
            let (ty, shape) = (d.value().type_name(), d.value().shape_repr());
            if field.ty != ty || field.shape != shape {
                return Err(DatasetError::SchemaMismatch(format!(
                    "field `{}`: schema has {} {}, sample has {ty} {shape}",
                    d.name(),
                    field.ty,
                    field.shape
                ))
                .into());
            }
        }
        Ok(())
    }
}

fn is_bytes_type(ty: &str) -> bool {
    matches!(ty, "str" | "bytes")
}

/// Parse `"(3, 4)"`, `"[1]"`, `"(5,)"`, `"()"` or `"1"` into dimensions.
fn parse_shape(field: &str, raw: &str) -> Result<Vec<usize>> {
    raw.split(',')
        .map(|tok| tok.replace(['(', ')', '[', ']', ' '], ""))
        .filter(|tok| !tok.is_empty())
        .map(|tok| {
            tok.parse::<usize>().map_err(|_| {
                DatasetError::SchemaShape {
                    field: field.to_string(),
                    token: tok,
                }
                .into()
            })
        })
        .collect()
}

/// Derive the schema from `sample` and write it to `path`.
///
/// Conventionally called with the last sample of the dataset; every other
/// sample is expected to share its shapes.
///
/// # Errors
/// Propagates decompress failures and fails if `path` is not writable.
pub fn write_schema(sample: &Sample, path: impl AsRef<Path>) -> Result<Schema> {
    let schema = Schema::from_sample(sample)?;
    schema.save(path)?;
    Ok(schema)
}

/// Load a schema document and build its decode plan and shape map.
///
/// # Errors
/// Fails if the file is missing or unparsable, or a shape token is not an
/// integer.
pub fn read_schema(path: impl AsRef<Path>) -> Result<(DecodeSpec, ShapeMap)> {
    Schema::load(path)?.decode_spec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_strings_parse() {
        assert_eq!(parse_shape("a", "(3, 4)").unwrap(), vec![3, 4]);
        assert_eq!(parse_shape("a", "(5,)").unwrap(), vec![5]);
        assert_eq!(parse_shape("a", "[1]").unwrap(), vec![1]);
        assert_eq!(parse_shape("a", "1").unwrap(), vec![1]);
        assert!(parse_shape("a", "()").unwrap().is_empty());
    }

    #[test]
    fn bad_token_names_field_and_token() {
        let err = parse_shape("img", "(3, x)").unwrap_err();
        match err.downcast_ref::<DatasetError>() {
            Some(DatasetError::SchemaShape { field, token }) => {
                assert_eq!(field, "img");
                assert_eq!(token, "x");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn zero_dim_array_decodes_as_scalar() {
        let mut schema = Schema::default();
        schema.fields.insert(
            "z".into(),
            FieldSchema {
                ty: "ndarray".into(),
                shape: "()".into(),
            },
        );
        let (spec, shapes) = schema.decode_spec().unwrap();
        assert_eq!(spec["z"].len, 1);
        assert!(shapes["z"].is_empty());
    }
}
