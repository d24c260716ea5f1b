//! Deterministic sample sets and file-damaging helpers.

use crate::codec::{Decompress, Encoder};
use crate::datum::{Datum, NdArray, Sample, Scalar, Value};
use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::path::Path;

/// Label string used by [`labeled_array`] for sample `i`.
#[must_use]
pub fn label_for(i: usize) -> String {
    format!("sample-{i:04}")
}

/// A `(2, 2)` float array filled with `i` and its string label.
///
/// # Errors
/// Never fails for valid indices; the signature follows [`Datum::new`].
#[allow(clippy::cast_precision_loss)]
pub fn labeled_array(i: usize) -> Result<Sample> {
    let image = NdArray::new(vec![2, 2], vec![i as f32; 4])?;
    Sample::new(vec![
        Datum::new("image", image)?.with_encoder(Encoder::FloatArray),
        Datum::new("label", label_for(i))?.with_encoder(Encoder::String),
    ])
}

/// `n` samples from [`labeled_array`].
///
/// # Errors
/// Propagates [`labeled_array`] failures.
pub fn labeled_arrays(n: usize) -> Result<Vec<Sample>> {
    (0..n).map(labeled_array).collect()
}

/// One field of every value kind, derived from `i`.
///
/// Fields: `array` `(2, 3)`, `count` int, `weight` float, `name` str,
/// `point` tuple of two, `blob` bytes.
///
/// # Errors
/// Never fails for valid indices; the signature follows [`Datum::new`].
#[allow(clippy::cast_precision_loss, clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
pub fn mixed_sample(i: usize) -> Result<Sample> {
    let base = i as f32;
    let array = NdArray::new(vec![2, 3], (0..6).map(|k| base + k as f32).collect())?;
    Sample::new(vec![
        Datum::new("array", array)?.with_encoder(Encoder::FloatArray),
        Datum::new("count", i as i64)?.with_encoder(Encoder::FloatOrInt),
        Datum::new("weight", base * 0.1)?.with_encoder(Encoder::FloatOrInt),
        Datum::new("name", label_for(i))?.with_encoder(Encoder::String),
        Datum::new(
            "point",
            Value::Tuple(vec![Scalar::Int(i as i64), Scalar::Float(base + 0.25)]),
        )?
        .with_encoder(Encoder::FloatArray),
        Datum::new("blob", Value::Bytes(vec![i as u8, 0xff, 0x00]))?.with_encoder(Encoder::Bytes),
    ])
}

/// `n` labeled arrays where every sample whose index is a multiple of
/// `every` asks to be skipped at write time.
///
/// # Errors
/// Propagates [`labeled_array`] failures.
pub fn with_skips(n: usize, every: usize) -> Result<Vec<Sample>> {
    (0..n)
        .map(|i| {
            let sample = labeled_array(i)?;
            if every == 0 || i % every != 0 {
                return Ok(sample);
            }
            let skip = Decompress::custom(|_: &Datum| Ok(None));
            let mut datums = sample.datums().to_vec();
            datums[1] = datums[1].clone().with_decompress(skip);
            Sample::new(datums)
        })
        .collect()
}

/// Overwrite one byte of `path` at `offset` with its bitwise complement.
///
/// # Errors
/// Fails if the file cannot be read or written, or `offset` is past its end.
pub fn flip_byte(path: impl AsRef<Path>, offset: usize) -> Result<()> {
    let path = path.as_ref();
    let mut bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let b = bytes
        .get_mut(offset)
        .with_context(|| format!("offset {offset} is past the end of {}", path.display()))?;
    *b = !*b;
    fs::write(path, bytes).with_context(|| format!("write {}", path.display()))
}

/// Drop the last `bytes` bytes of `path`.
///
/// # Errors
/// Fails if the file cannot be opened or resized.
pub fn truncate_tail(path: impl AsRef<Path>, bytes: u64) -> Result<()> {
    let path = path.as_ref();
    let f = OpenOptions::new()
        .write(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    let len = f.metadata()?.len();
    f.set_len(len.saturating_sub(bytes))
        .with_context(|| format!("truncate {}", path.display()))
}
