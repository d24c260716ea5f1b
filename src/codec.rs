//! Per-field decompress and encode behavior.
//!
//! Each datum selects one [`Decompress`] (materialize a lightweight reference
//! such as a file path into a real value) and one [`Encoder`] (turn the
//! materialized value into a [`Feature`]). Both are closed enums of the
//! common cases plus a `Custom` variant for caller-defined behavior.
//!
//! Writers run on threads inside one process, so custom behavior only needs
//! to be `Send + Sync`; closures work directly:
//!
//! ```
//! use shardset::{Datum, Decompress, Value};
//!
//! // Skip every sample whose label is empty.
//! let skip_empty = Decompress::custom(|d: &Datum| {
//!     Ok(match d.value() {
//!         Value::Str(s) if s.is_empty() => None,
//!         _ => Some(d.clone()),
//!     })
//! });
//! let label = Datum::new("label", "")?.with_decompress(skip_empty);
//! assert!(label.decompress()?.is_none());
//! # Ok::<(), anyhow::Error>(())
//! ```

use crate::datum::{Datum, NdArray, Scalar, Value};
use crate::error::DatasetError;
use crate::features::Feature;
use anyhow::{Context, Result, bail};
use npyz::{DType, NpyFile, NpyWriter, Order, WriteOptions, WriterBuilder};
use std::fmt;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read};
use std::path::Path;
use std::sync::Arc;

/// Caller-defined decompress step. `Ok(None)` skips the whole sample.
pub trait DecompressFn: Send + Sync {
    /// # Errors
    /// Implementations return an error when the reference cannot be materialized.
    fn decompress(&self, datum: &Datum) -> Result<Option<Datum>>;
}

impl<F> DecompressFn for F
where
    F: Fn(&Datum) -> Result<Option<Datum>> + Send + Sync,
{
    fn decompress(&self, datum: &Datum) -> Result<Option<Datum>> {
        self(datum)
    }
}

/// Caller-defined encode step.
pub trait EncodeFn: Send + Sync {
    /// # Errors
    /// Implementations return an error when the value cannot be encoded.
    fn encode(&self, datum: &Datum) -> Result<Feature>;
}

impl<F> EncodeFn for F
where
    F: Fn(&Datum) -> Result<Feature> + Send + Sync,
{
    fn encode(&self, datum: &Datum) -> Result<Feature> {
        self(datum)
    }
}

/// How a datum is materialized before encoding.
#[derive(Clone, Default)]
pub enum Decompress {
    /// The value is already materialized.
    #[default]
    Identity,
    /// The value is a path to a `.npy` file; load it as an array.
    LoadNpy,
    /// The value is a path; load the file contents as an opaque blob.
    LoadBytes,
    Custom(Arc<dyn DecompressFn>),
}

impl Decompress {
    /// Wrap a closure. Types implementing [`DecompressFn`] directly can use
    /// `Decompress::Custom(Arc::new(..))`.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&Datum) -> Result<Option<Datum>> + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    /// # Errors
    /// Fails if the referenced file cannot be read or parsed, or if the value
    /// is not a path for the path-based variants.
    pub fn apply(&self, datum: &Datum) -> Result<Option<Datum>> {
        match self {
            Self::Identity => Ok(Some(datum.clone())),
            Self::LoadNpy => {
                let path = path_value(datum)?;
                let array = read_npy(path)?;
                Ok(Some(datum.derive(Value::Array(array))))
            }
            Self::LoadBytes => {
                let path = path_value(datum)?;
                let bytes = fs::read(path).with_context(|| format!("read {path}"))?;
                Ok(Some(datum.derive(Value::Bytes(bytes))))
            }
            Self::Custom(f) => f.decompress(datum),
        }
    }
}

impl fmt::Debug for Decompress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identity => f.write_str("Identity"),
            Self::LoadNpy => f.write_str("LoadNpy"),
            Self::LoadBytes => f.write_str("LoadBytes"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

fn path_value(datum: &Datum) -> Result<&str> {
    datum.value().as_str().ok_or_else(|| {
        DatasetError::Decompress {
            field: datum.name().to_string(),
            reason: format!("expected a path string, found {}", datum.value().type_name()),
        }
        .into()
    })
}

/// How a materialized datum becomes a container feature.
#[derive(Clone)]
pub enum Encoder {
    /// Flattened array or tuple as a float list.
    FloatArray,
    /// Numeric scalar as a one-element list: float list for floats, int64
    /// list for integers.
    FloatOrInt,
    /// Integer scalar or integer tuple as an int64 list.
    Int64,
    /// UTF-8 string as a one-element bytes list.
    String,
    /// Opaque blob as a one-element bytes list.
    Bytes,
    /// Array as a self-describing tensor blob (shape travels with the data).
    Tensor,
    Custom(Arc<dyn EncodeFn>),
}

impl Encoder {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&Datum) -> Result<Feature> + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    /// # Errors
    /// Returns [`DatasetError::Encode`] if the value kind does not fit the encoder.
    pub fn apply(&self, datum: &Datum) -> Result<Feature> {
        let feature = match (self, datum.value()) {
            (Self::FloatArray, Value::Array(a)) => Feature::FloatList(a.data().to_vec()),
            (Self::FloatArray, Value::Tuple(t)) => {
                Feature::FloatList(t.iter().map(|s| s.as_f32()).collect())
            }
            (Self::FloatOrInt, Value::Float(v)) => Feature::float(*v),
            // Integers wider than an f32 mantissa would lose precision in a float list.
            (Self::FloatOrInt | Self::Int64, Value::Int(v)) => Feature::Int64List(vec![*v]),
            (Self::Int64, Value::Tuple(t)) => Feature::Int64List(
                t.iter()
                    .map(|s| match s {
                        Scalar::Int(v) => Ok(*v),
                        Scalar::Float(_) => Err(encode_error(datum, "tuple holds a float")),
                    })
                    .collect::<Result<_>>()?,
            ),
            (Self::String, Value::Str(s)) => Feature::bytes(s.as_bytes()),
            (Self::Bytes, Value::Bytes(b)) => Feature::bytes(b.clone()),
            (Self::Tensor, Value::Array(a)) => Feature::bytes(a.to_tensor_bytes()),
            (Self::Custom(f), _) => return f.encode(datum),
            (encoder, value) => {
                return Err(encode_error(
                    datum,
                    &format!("{encoder:?} cannot encode a {} value", value.type_name()),
                ));
            }
        };
        Ok(feature)
    }
}

impl fmt::Debug for Encoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::FloatArray => "FloatArray",
            Self::FloatOrInt => "FloatOrInt",
            Self::Int64 => "Int64",
            Self::String => "String",
            Self::Bytes => "Bytes",
            Self::Tensor => "Tensor",
            Self::Custom(_) => "Custom(..)",
        };
        f.write_str(name)
    }
}

fn encode_error(datum: &Datum, reason: &str) -> anyhow::Error {
    DatasetError::Encode {
        field: datum.name().to_string(),
        reason: reason.to_string(),
    }
    .into()
}

// ============================================================================
// Tensor blobs
// ============================================================================

const TENSOR_MAGIC: &[u8; 4] = b"NDT1";

impl NdArray {
    /// Serialize as `NDT1 | rank: u32 | dims: u64 * rank | f32 data`, all little-endian.
    #[must_use]
    pub fn to_tensor_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + 8 * self.shape().len() + 4 * self.len());
        out.extend_from_slice(TENSOR_MAGIC);
        out.extend_from_slice(&(self.shape().len() as u32).to_le_bytes());
        for &d in self.shape() {
            out.extend_from_slice(&(d as u64).to_le_bytes());
        }
        for &v in self.data() {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }

    /// Inverse of [`NdArray::to_tensor_bytes`].
    ///
    /// # Errors
    /// Fails on a bad magic, a truncated blob, or trailing bytes.
    pub fn from_tensor_bytes(bytes: &[u8]) -> Result<Self> {
        let mut cur = Cursor::new(bytes);
        if cur.take(4)? != TENSOR_MAGIC {
            bail!("not a tensor blob");
        }
        let rank = u32::from_le_bytes(cur.take(4)?.try_into()?) as usize;
        if rank > cur.rest().len() / 8 {
            bail!("tensor blob declares rank {rank} but holds {} bytes", cur.rest().len());
        }
        let mut shape = Vec::with_capacity(rank);
        for _ in 0..rank {
            shape.push(usize::try_from(u64::from_le_bytes(cur.take(8)?.try_into()?))?);
        }
        let byte_len = shape
            .iter()
            .try_fold(4usize, |acc, &d| acc.checked_mul(d))
            .with_context(|| format!("tensor shape {shape:?} overflows"))?;
        let data = cur
            .take(byte_len)?
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        if !cur.rest().is_empty() {
            bail!("tensor blob has {} trailing bytes", cur.rest().len());
        }
        Self::new(shape, data)
    }
}

struct Cursor<'a> {
    buf: &'a [u8],
}

impl<'a> Cursor<'a> {
    const fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.buf.len() < n {
            bail!("unexpected end of data: need {n} bytes, have {}", self.buf.len());
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    const fn rest(&self) -> &'a [u8] {
        self.buf
    }
}

// ============================================================================
// .npy files
// ============================================================================

/// Load a C-ordered `.npy` array as `f32`.
///
/// Supported dtypes: `f4`, `f8`, `i1`, `i2`, `i4`, `i8`, `u1`, `u2`, `u4`, in
/// either byte order.
///
/// # Errors
/// Fails on I/O errors, malformed headers, Fortran-ordered data, and
/// unsupported dtypes.
pub fn read_npy(path: impl AsRef<Path>) -> Result<NdArray> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let npy = NpyFile::new(BufReader::new(file))
        .with_context(|| format!("read npy header of {}", path.display()))?;
    if matches!(npy.order(), Order::Fortran) {
        bail!("{}: Fortran-ordered arrays are not supported", path.display());
    }
    let shape = npy
        .shape()
        .iter()
        .map(|&d| usize::try_from(d))
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("{}: npy shape does not fit in memory", path.display()))?;
    let data = npy_values(npy).with_context(|| format!("read npy data of {}", path.display()))?;
    NdArray::new(shape, data)
}

#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
fn npy_values<R: Read>(npy: NpyFile<R>) -> Result<Vec<f32>> {
    let DType::Plain(ty) = npy.dtype() else {
        bail!("structured npy dtypes are not supported");
    };
    let descr = ty.to_string();
    let values = match descr.get(1..).unwrap_or_default() {
        "f4" => npy.into_vec::<f32>()?,
        "f8" => npy.into_vec::<f64>()?.into_iter().map(|v| v as f32).collect(),
        "i1" => npy.into_vec::<i8>()?.into_iter().map(f32::from).collect(),
        "i2" => npy.into_vec::<i16>()?.into_iter().map(f32::from).collect(),
        "i4" => npy.into_vec::<i32>()?.into_iter().map(|v| v as f32).collect(),
        "i8" => npy.into_vec::<i64>()?.into_iter().map(|v| v as f32).collect(),
        "u1" => npy.into_vec::<u8>()?.into_iter().map(f32::from).collect(),
        "u2" => npy.into_vec::<u16>()?.into_iter().map(f32::from).collect(),
        "u4" => npy.into_vec::<u32>()?.into_iter().map(|v| v as f32).collect(),
        _ => bail!("unsupported npy dtype {descr}"),
    };
    Ok(values)
}

/// Write `array` as a `<f4` `.npy` file.
///
/// # Errors
/// Returns any I/O error.
pub fn write_npy(path: impl AsRef<Path>, array: &NdArray) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
    let shape: Vec<u64> = array.shape().iter().map(|&d| d as u64).collect();
    let mut writer: NpyWriter<f32, BufWriter<File>> = WriteOptions::new()
        .default_dtype()
        .shape(&shape)
        .writer(BufWriter::new(file))
        .begin_nd()
        .with_context(|| format!("write npy header to {}", path.display()))?;
    writer.extend(array.data().iter().copied())?;
    writer
        .finish()
        .with_context(|| format!("finish {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tensor_blob_roundtrip() {
        let a = NdArray::new(vec![2, 3], (0..6).map(|x| x as f32).collect()).unwrap();
        let back = NdArray::from_tensor_bytes(&a.to_tensor_bytes()).unwrap();
        assert_eq!(back, a);
        assert!(NdArray::from_tensor_bytes(b"nope").is_err());
    }

    #[test]
    fn corrupt_tensor_header_is_an_error() {
        let mut huge_dims = TENSOR_MAGIC.to_vec();
        huge_dims.extend_from_slice(&2u32.to_le_bytes());
        huge_dims.extend_from_slice(&(u64::MAX / 2).to_le_bytes());
        huge_dims.extend_from_slice(&4u64.to_le_bytes());
        assert!(NdArray::from_tensor_bytes(&huge_dims).is_err());

        let mut huge_rank = TENSOR_MAGIC.to_vec();
        huge_rank.extend_from_slice(&u32::MAX.to_le_bytes());
        huge_rank.extend_from_slice(&[0; 16]);
        let err = NdArray::from_tensor_bytes(&huge_rank).unwrap_err();
        assert!(err.to_string().contains("rank"), "{err}");
    }

    #[test]
    fn npy_file_roundtrip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("a.npy");
        let a = NdArray::new(vec![3, 4], (0..12).map(|x| x as f32 * 0.5).collect())?;
        write_npy(&path, &a)?;
        assert_eq!(read_npy(&path)?, a);
        Ok(())
    }

    #[test]
    fn npy_integer_arrays_widen_to_f32() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("ids.npy");
        let mut writer: NpyWriter<i64, _> = WriteOptions::new()
            .default_dtype()
            .shape(&[2])
            .writer(BufWriter::new(File::create(&path)?))
            .begin_nd()?;
        writer.extend([7i64, -2])?;
        writer.finish()?;

        let a = read_npy(&path)?;
        assert_eq!(a.shape(), &[2]);
        assert_eq!(a.data(), &[7.0, -2.0]);
        Ok(())
    }

    #[test]
    fn npy_rejects_non_npy_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("bad.npy");
        fs::write(&path, b"not an array")?;
        assert!(read_npy(&path).is_err());
        Ok(())
    }

    #[test]
    fn encoder_rejects_wrong_kind() {
        let d = Datum::new("s", "text").unwrap();
        let err = Encoder::FloatArray.apply(&d).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DatasetError>(),
            Some(DatasetError::Encode { field, .. }) if field == "s"
        ));
    }

    #[test]
    fn load_bytes_reads_file_contents() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("img.png");
        fs::write(&path, [1u8, 2, 3])?;
        let d = Datum::new("img", path)?.with_decompress(Decompress::LoadBytes);
        let out = d.decompress()?.expect("not skipped");
        assert_eq!(out.value().as_bytes(), Some(&[1u8, 2, 3][..]));
        Ok(())
    }
}
