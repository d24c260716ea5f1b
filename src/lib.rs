//! # shardset
//!
//! Write labeled in-memory samples into sharded, checksummed record files and
//! stream them back through an interleaved, prefetching reader.
//!
//! ## Key Features
//!
//! - **Typed samples** - [`Datum`]s carry a [`Value`] plus per-field
//!   decompress and encode behavior
//! - **Schema side-car** - one JSON document describes every field's type
//!   and shape; readers build their fixed-length decode plan from it
//! - **Parallel sharded writes** - balanced contiguous shards written on a
//!   dedicated thread pool, with a per-shard outcome report
//! - **Interleaved reads** - round-robin across `cycle_length` open files,
//!   `block_length` records per turn, prefetched on background threads
//! - **Integrity** - every record frame carries CRC32 checksums
//! - **Compression** - optional gzip, zstd, bzip2, and xz per shard file
//!
//! ## Quick Start
//!
//! ```no_run
//! use shardset::*;
//! # use anyhow::Result;
//!
//! # fn main() -> Result<()> {
//! let samples = vec![Sample::new(vec![
//!     Datum::new("image", NdArray::new(vec![2, 2], vec![0.0, 1.0, 2.0, 3.0])?)?
//!         .with_encoder(Encoder::FloatArray),
//!     Datum::new("label", "cat")?.with_encoder(Encoder::String),
//! ])?];
//!
//! // Describe the data, then write it.
//! write_schema(&samples[samples.len() - 1], "out/schema.json")?;
//! let opts = WriteOptions::default().with_shards(4).with_identifiers(["train"]);
//! write_dataset(&samples, "out", &opts)?.into_result()?;
//!
//! // Stream it back.
//! for sample in load_parsed("out/schema.json", "out", "record_train_*.rec", &ReadOptions::default())? {
//!     let sample = sample?;
//!     println!("{:?} {:?}", sample.str("label"), sample.array("image").map(NdArray::shape));
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Core Concepts
//!
//! ### Samples and datums
//!
//! A [`Sample`] is an ordered set of uniquely named [`Datum`]s and becomes one
//! record. Before encoding, each datum is *decompressed*: [`Decompress::LoadNpy`]
//! turns a path into an array, [`Decompress::Custom`] can do anything and may
//! ask to skip the whole sample by returning `Ok(None)`.
//!
//! ### Shards
//!
//! `n` samples split into `k` shards of `n / k`, with the first `n % k`
//! shards holding one extra. Files are named
//! `record[_<id>...]_<index>.rec[.gz|.zst|.bz2|.xz]`.
//!
//! ### Errors
//!
//! Every fallible function returns [`anyhow::Result`]. Failures a caller may
//! want to branch on are [`DatasetError`] values:
//!
//! ```
//! use shardset::{Datum, DatasetError, Sample};
//!
//! let a = Datum::new("x", 1i64).unwrap();
//! let err = Sample::new(vec![a.clone(), a]).unwrap_err();
//! assert!(matches!(err.downcast_ref::<DatasetError>(), Some(DatasetError::DuplicateField(_))));
//! ```
//!
//! ## Feature Flags
//!
//! - `compression-gzip`, `compression-zstd`, `compression-bzip2`,
//!   `compression-xz` (all on by default)

pub mod codec;
pub mod datum;
pub mod error;
pub mod features;
pub mod inspect;
pub mod io;
pub mod parse;
pub mod reader;
pub mod schema;
pub mod shard;
pub mod testing;
pub mod writer;

// General re-exports
pub use codec::{Decompress, Encoder, read_npy, write_npy};
pub use datum::{Datum, NdArray, Sample, Scalar, Value};
pub use error::DatasetError;
pub use features::{Example, Feature};
pub use inspect::{ProfileReport, ShardCheck, analyse, check, count_records, inspect, profile, verify_shard};
pub use io::compression::Compression;
pub use parse::{ParsedSample, Parser};
pub use reader::{Interleave, ReadOptions, load_dataset, load_parsed};
pub use schema::{DecodeSpec, FeatureKind, FeatureSpec, FieldSchema, Schema, ShapeMap, read_schema, write_schema};
pub use writer::{ShardReport, WriteOptions, WriteStrategy, WriteSummary, write_dataset};
