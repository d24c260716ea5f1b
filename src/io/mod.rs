//! Shard file I/O: record framing, compression, and discovery.

pub mod compression;
pub mod glob;
pub mod record;

pub use compression::Compression;
pub use record::{RecordReader, RecordWriter};
