//! Append-only framed record files.
//!
//! ## Frame layout
//! ```text
//! ┌────────────┬──────────────────┬───────────────┬───────────────────┐
//! │ len: u64LE │ crc32(len): u32LE│ payload (len) │ crc32(payload):u32│
//! └────────────┴──────────────────┴───────────────┴───────────────────┘
//! ```
//! Frames are concatenated with no file header, so a shard is just a
//! sequence of frames, optionally wrapped in a compression stream.
//! Reading is strictly sequential; there is no index.

use crate::error::DatasetError;
use crate::features::Example;
use crate::io::compression::{Compression, ShardSink, open_shard_reader};
use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

/// Bytes before the payload: length (8) + length CRC (4).
pub const FRAME_HEADER_SIZE: usize = 12;

/// Bytes after the payload: payload CRC (4).
pub const FRAME_FOOTER_SIZE: usize = 4;

fn crc32(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}

/// Writes frames to a single shard file.
///
/// The writer exclusively owns its file handle. Call [`RecordWriter::close`]
/// to finish the compression stream and surface flush errors.
pub struct RecordWriter {
    path: PathBuf,
    sink: ShardSink,
    records: u64,
}

impl RecordWriter {
    /// Create (or truncate) `path` and open it for appending frames.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created or the codec is unavailable.
    pub fn create(path: impl AsRef<Path>, compression: Compression) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .with_context(|| format!("create {}", path.display()))?;
        let sink = ShardSink::new(file, compression)
            .with_context(|| format!("setup compression for {}", path.display()))?;
        Ok(Self {
            path,
            sink,
            records: 0,
        })
    }

    /// Append one raw payload as a frame.
    ///
    /// # Errors
    /// Returns any I/O error from the underlying file.
    pub fn append_raw(&mut self, payload: &[u8]) -> Result<()> {
        let len = (payload.len() as u64).to_le_bytes();
        self.sink.write_all(&len)?;
        self.sink.write_all(&crc32(&len).to_le_bytes())?;
        self.sink.write_all(payload)?;
        self.sink.write_all(&crc32(payload).to_le_bytes())?;
        self.records += 1;
        Ok(())
    }

    /// Encode and append one example.
    ///
    /// # Errors
    /// Returns an error if serialization or the write fails.
    pub fn append(&mut self, example: &Example) -> Result<()> {
        let payload = example.to_bytes()?;
        self.append_raw(&payload)
            .with_context(|| format!("append record #{} to {}", self.records, self.path.display()))
    }

    /// Frames written so far.
    #[must_use]
    pub const fn records(&self) -> u64 {
        self.records
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Finish the stream and flush to disk. Returns the number of frames written.
    ///
    /// # Errors
    /// Returns an error if finishing or flushing fails.
    pub fn close(self) -> Result<u64> {
        let file = self
            .sink
            .finish()
            .with_context(|| format!("close {}", self.path.display()))?;
        file.sync_all()
            .with_context(|| format!("sync {}", self.path.display()))?;
        Ok(self.records)
    }
}

/// Sequentially reads frames from a single shard file.
pub struct RecordReader {
    path: PathBuf,
    inner: Box<dyn Read + Send>,
    index: u64,
    done: bool,
}

impl RecordReader {
    /// Open `path` for sequential reading, detecting compression.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).with_context(|| format!("open {}", path.display()))?;
        let inner = open_shard_reader(file, &path)
            .with_context(|| format!("setup decompression for {}", path.display()))?;
        Ok(Self {
            path,
            inner,
            index: 0,
            done: false,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn corrupt(&self, reason: impl Into<String>) -> anyhow::Error {
        DatasetError::CorruptRecord {
            path: self.path.clone(),
            index: self.index,
            reason: reason.into(),
        }
        .into()
    }

    /// Fill `buf` completely. `Ok(false)` on a clean end of stream before
    /// the first byte; a partial read is a truncation error.
    fn read_full(&mut self, buf: &mut [u8]) -> Result<bool> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) if filled == 0 => return Ok(false),
                Ok(0) => return Err(self.corrupt("truncated frame")),
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    return Err(anyhow::Error::new(e)
                        .context(format!("read {}", self.path.display())));
                }
            }
        }
        Ok(true)
    }

    /// Read the next raw payload, or `None` at end of file.
    ///
    /// # Errors
    /// Returns [`DatasetError::CorruptRecord`] on truncation or CRC mismatch.
    pub fn next_raw(&mut self) -> Result<Option<Vec<u8>>> {
        if self.done {
            return Ok(None);
        }
        let mut header = [0u8; FRAME_HEADER_SIZE];
        if !self.read_full(&mut header)? {
            self.done = true;
            return Ok(None);
        }
        let (len_bytes, len_crc) = header.split_at(8);
        if crc32(len_bytes) != u32::from_le_bytes(len_crc.try_into()?) {
            self.done = true;
            return Err(self.corrupt("length checksum mismatch"));
        }
        let len = usize::try_from(u64::from_le_bytes(len_bytes.try_into()?))
            .map_err(|_| self.corrupt("frame length does not fit in memory"))?;

        let mut payload = vec![0u8; len];
        let mut footer = [0u8; FRAME_FOOTER_SIZE];
        let complete = self.read_full(&mut payload)? && self.read_full(&mut footer)?;
        if !complete {
            self.done = true;
            return Err(self.corrupt("truncated frame"));
        }
        if crc32(&payload) != u32::from_le_bytes(footer) {
            self.done = true;
            return Err(self.corrupt("payload checksum mismatch"));
        }
        self.index += 1;
        Ok(Some(payload))
    }

    /// Read and decode the next example, or `None` at end of file.
    ///
    /// # Errors
    /// Returns an error on corruption or an undecodable payload.
    pub fn next_example(&mut self) -> Result<Option<Example>> {
        match self.next_raw()? {
            Some(payload) => {
                let example = Example::from_bytes(&payload).map_err(|e| {
                    anyhow::Error::from(DatasetError::CorruptRecord {
                        path: self.path.clone(),
                        index: self.index - 1,
                        reason: format!("undecodable payload: {e:#}"),
                    })
                })?;
                Ok(Some(example))
            }
            None => Ok(None),
        }
    }
}

impl Iterator for RecordReader {
    type Item = Result<Example>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_example().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::Feature;

    fn example(i: i64) -> Example {
        let mut ex = Example::new();
        ex.insert("id", Feature::Int64List(vec![i]));
        ex
    }

    #[test]
    fn frames_roundtrip_in_order() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("r.rec");
        let mut w = RecordWriter::create(&path, Compression::None)?;
        for i in 0..5 {
            w.append(&example(i))?;
        }
        assert_eq!(w.close()?, 5);

        let back: Vec<Example> = RecordReader::open(&path)?.collect::<Result<_>>()?;
        assert_eq!(back, (0..5).map(example).collect::<Vec<_>>());
        Ok(())
    }

    #[test]
    fn truncated_tail_is_reported() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("t.rec");
        let mut w = RecordWriter::create(&path, Compression::None)?;
        w.append(&example(1))?;
        w.append(&example(2))?;
        w.close()?;

        let bytes = std::fs::read(&path)?;
        std::fs::write(&path, &bytes[..bytes.len() - 3])?;

        let mut r = RecordReader::open(&path)?;
        assert!(r.next_example()?.is_some());
        let err = r.next_example().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DatasetError>(),
            Some(DatasetError::CorruptRecord { index: 1, .. })
        ));
        assert!(r.next_example()?.is_none());
        Ok(())
    }
}
