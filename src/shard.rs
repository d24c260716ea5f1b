//! Shard partitioning and file naming.
//!
//! Samples are split into `k` contiguous, order-preserving slices. With
//! `n` samples each shard gets `n / k` of them and the first `n % k` shards
//! get one extra, so shard sizes never differ by more than one.

use crate::io::compression::Compression;
use std::ops::Range;
use std::path::{Path, PathBuf};

/// File extension of an uncompressed shard.
pub const SHARD_EXTENSION: &str = "rec";

/// Index ranges of each shard over a list of `len` items.
///
/// `num_shards` of zero is treated as one. When `num_shards > len` the
/// trailing shards are empty.
#[must_use]
pub fn shard_ranges(len: usize, num_shards: usize) -> Vec<Range<usize>> {
    let k = num_shards.max(1);
    let base = len / k;
    let remainder = len % k;

    let mut ranges = Vec::with_capacity(k);
    let mut taken = 0;
    for i in 0..k {
        let next = taken + base + usize::from(i < remainder);
        ranges.push(taken..next);
        taken = next;
    }
    ranges
}

/// Split `items` into `num_shards` contiguous sub-slices.
#[must_use]
pub fn partition<T>(items: &[T], num_shards: usize) -> Vec<&[T]> {
    shard_ranges(items.len(), num_shards)
        .into_iter()
        .map(|r| &items[r])
        .collect()
}

/// Shared file-name prefix: `<dir>/record[_<id>...]_`.
#[must_use]
pub fn shard_prefix(output_dir: impl AsRef<Path>, extra_identifiers: &[String]) -> PathBuf {
    let mut name = String::from("record");
    for id in extra_identifiers {
        name.push('_');
        name.push_str(id);
    }
    name.push('_');
    output_dir.as_ref().join(name)
}

/// Path of shard `index`: `<prefix><index>.rec[.gz|.zst|...]`.
#[must_use]
pub fn shard_path(prefix: &Path, index: usize, compression: Compression) -> PathBuf {
    let mut name = prefix.as_os_str().to_owned();
    name.push(format!("{index}.{SHARD_EXTENSION}{}", compression.extension()));
    PathBuf::from(name)
}
