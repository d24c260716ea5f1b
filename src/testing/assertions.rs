//! Assertions for write summaries and read-back streams.

use crate::inspect::verify_shard;
use crate::writer::WriteSummary;
use std::fmt::Debug;
use std::path::Path;

/// Assert that two collections hold the same elements, ignoring order.
///
/// Interleaved reads have no global order, so compare them with this.
///
/// # Panics
///
/// Panics if the collections differ in length or content.
///
/// # Example
///
/// ```
/// use shardset::testing::assert_same_elements;
///
/// assert_same_elements(&["b", "a", "c"], &["a", "b", "c"]);
/// ```
pub fn assert_same_elements<T: Debug + Ord + Clone>(actual: &[T], expected: &[T]) {
    assert_eq!(
        actual.len(),
        expected.len(),
        "Collection length mismatch:\n  Expected length: {}\n  Actual length: {}\n  Expected: {expected:?}\n  Actual: {actual:?}",
        expected.len(),
        actual.len()
    );
    let mut a = actual.to_vec();
    let mut e = expected.to_vec();
    a.sort();
    e.sort();
    for (i, (x, y)) in a.iter().zip(e.iter()).enumerate() {
        assert_eq!(
            x, y,
            "Content mismatch at sorted position {i}:\n  Expected: {e:?}\n  Actual: {a:?}"
        );
    }
}

/// Assert that every shard succeeded and wrote exactly `expected[i]` records.
///
/// # Panics
///
/// Panics on a failed shard or a different shard count or size.
pub fn assert_shard_sizes(summary: &WriteSummary, expected: &[usize]) {
    let failed = summary.failed();
    assert!(failed.is_empty(), "Shards failed: {failed:?}");
    let sizes: Vec<usize> = summary.shards.iter().map(|s| s.written).collect();
    assert_eq!(sizes, expected, "Shard size mismatch");
}

/// Assert that every frame of every file passes its checksums.
///
/// # Panics
///
/// Panics if a file cannot be opened or holds a corrupt frame.
pub fn assert_shards_valid<P: AsRef<Path>>(paths: &[P]) {
    for p in paths {
        let p = p.as_ref();
        match verify_shard(p) {
            Ok(check) => assert!(
                check.is_ok(),
                "Corrupt shard {} after {} valid records: {}",
                p.display(),
                check.valid_records,
                check.error.unwrap_or_default()
            ),
            Err(e) => panic!("Cannot open shard {}: {e:#}", p.display()),
        }
    }
}
