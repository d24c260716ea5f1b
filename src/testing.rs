//! Testing utilities for shardset datasets.
//!
//! Fixtures build small, deterministic samples of every value kind and help
//! damage shard files on purpose; assertions compare read-back streams and
//! write summaries with readable panic messages.
//!
//! ```
//! use shardset::testing::*;
//! use shardset::{write_dataset, WriteOptions};
//!
//! # fn main() -> anyhow::Result<()> {
//! let dir = tempfile::tempdir()?;
//! let samples = labeled_arrays(7)?;
//! let summary = write_dataset(&samples, dir.path(), &WriteOptions::default().with_shards(3))?;
//! assert_shard_sizes(&summary, &[3, 2, 2]);
//! # Ok(())
//! # }
//! ```

pub mod assertions;
pub mod fixtures;

pub use assertions::*;
pub use fixtures::*;
