//! Dataset inspection helpers.
//!
//! The stream helpers work over anything that yields `Result<T>`, which
//! includes an [`Interleave`](crate::reader::Interleave). The file helpers
//! look at raw frames without parsing them.

use crate::io::record::RecordReader;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::warn;

/// Run every processor on every element. Row `i` holds the outputs for element `i`.
///
/// # Errors
/// Returns the first error yielded by the stream.
pub fn analyse<T, R, I>(stream: I, processors: &[&dyn Fn(&T) -> R]) -> Result<Vec<Vec<R>>>
where
    I: IntoIterator<Item = Result<T>>,
{
    stream
        .into_iter()
        .map(|item| item.map(|x| processors.iter().map(|p| p(&x)).collect::<Vec<R>>()))
        .collect()
}

/// Collect the first `n` elements matching `criterion`.
///
/// Stops reading as soon as `n` matches were found; logs a warning when the
/// stream ends with fewer.
///
/// # Errors
/// Returns the first error yielded by the stream.
pub fn inspect<T, I, F>(stream: I, criterion: F, n: usize) -> Result<Vec<T>>
where
    I: IntoIterator<Item = Result<T>>,
    F: Fn(&T) -> bool,
{
    let mut found = Vec::with_capacity(n);
    if n == 0 {
        return Ok(found);
    }
    for item in stream {
        let x = item?;
        if criterion(&x) {
            found.push(x);
            if found.len() == n {
                return Ok(found);
            }
        }
    }
    warn!(requested = n, found = found.len(), "fewer matching elements than requested");
    Ok(found)
}

/// Whether every element passes every criterion. Stops at the first failure.
///
/// # Errors
/// Returns the first error yielded by the stream.
pub fn check<T, I>(stream: I, criteria: &[&dyn Fn(&T) -> bool]) -> Result<bool>
where
    I: IntoIterator<Item = Result<T>>,
{
    for item in stream {
        let x = item?;
        if !criteria.iter().all(|c| c(&x)) {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Read-throughput measurement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProfileReport {
    pub elements: usize,
    pub elapsed_secs: f64,
    pub elements_per_sec: f64,
}

impl ProfileReport {
    /// Write as indented JSON.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created or written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let f = File::create(path).with_context(|| format!("create {}", path.display()))?;
        let mut w = BufWriter::new(f);
        serde_json::to_writer_pretty(&mut w, self)?;
        w.write_all(b"\n")?;
        w.flush()?;
        Ok(())
    }
}

/// Consume up to `limit` elements (all when `None`) and time it.
///
/// # Errors
/// Returns the first error yielded by the stream.
#[allow(clippy::cast_precision_loss)]
pub fn profile<T, I>(stream: I, limit: Option<usize>) -> Result<ProfileReport>
where
    I: IntoIterator<Item = Result<T>>,
{
    let start = Instant::now();
    let mut elements = 0usize;
    for item in stream.into_iter().take(limit.unwrap_or(usize::MAX)) {
        item?;
        elements += 1;
    }
    let elapsed_secs = start.elapsed().as_secs_f64();
    let elements_per_sec = if elapsed_secs > 0.0 {
        elements as f64 / elapsed_secs
    } else {
        0.0
    };
    Ok(ProfileReport {
        elements,
        elapsed_secs,
        elements_per_sec,
    })
}

/// Number of frames in each file, in input order.
///
/// # Errors
/// Fails on the first unreadable or corrupt file.
pub fn count_records<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<(PathBuf, u64)>> {
    paths
        .iter()
        .map(|p| {
            let mut reader = RecordReader::open(p)?;
            let mut n = 0u64;
            while reader.next_raw()?.is_some() {
                n += 1;
            }
            Ok((p.as_ref().to_path_buf(), n))
        })
        .collect()
}

/// Result of checking every frame of one file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardCheck {
    pub path: PathBuf,
    /// Frames that passed before the first problem.
    pub valid_records: u64,
    pub error: Option<String>,
}

impl ShardCheck {
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Verify every frame checksum and payload of `path`.
///
/// Corruption is reported in the result; only failing to open the file is
/// an error.
///
/// # Errors
/// Returns an error if the file cannot be opened.
pub fn verify_shard(path: impl AsRef<Path>) -> Result<ShardCheck> {
    let path = path.as_ref();
    let reader = RecordReader::open(path)?;
    let mut valid_records = 0;
    let mut error = None;
    for record in reader {
        match record {
            Ok(_) => valid_records += 1,
            Err(e) => {
                error = Some(format!("{e:#}"));
                break;
            }
        }
    }
    Ok(ShardCheck {
        path: path.to_path_buf(),
        valid_records,
        error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbers(n: i32) -> impl Iterator<Item = Result<i32>> {
        (0..n).map(Ok)
    }

    #[test]
    fn analyse_runs_each_processor() {
        let double = |x: &i32| x * 2;
        let square = |x: &i32| x * x;
        let processors: [&dyn Fn(&i32) -> i32; 2] = [&double, &square];
        let rows = analyse(numbers(3), &processors).unwrap();
        assert_eq!(rows, vec![vec![0, 0], vec![2, 1], vec![4, 4]]);
    }

    #[test]
    fn inspect_stops_at_n() {
        let evens = inspect(numbers(100), |x| x % 2 == 0, 3).unwrap();
        assert_eq!(evens, vec![0, 2, 4]);
        let few = inspect(numbers(5), |x| *x > 3, 10).unwrap();
        assert_eq!(few, vec![4]);
    }

    #[test]
    fn check_fails_on_first_violation() {
        let small = |x: &i32| *x < 10;
        let criteria: [&dyn Fn(&i32) -> bool; 1] = [&small];
        assert!(check(numbers(10), &criteria).unwrap());
        assert!(!check(numbers(11), &criteria).unwrap());
    }

    #[test]
    fn stream_errors_propagate() {
        let items = vec![Ok(1), Err(anyhow::anyhow!("boom")), Ok(3)];
        assert!(profile(items, None).is_err());
    }

    #[test]
    fn profile_honours_limit() {
        let report = profile(numbers(50), Some(10)).unwrap();
        assert_eq!(report.elements, 10);
    }
}
