//! Optional per-shard compression.
//!
//! Each shard file is compressed independently, so shards stay readable on
//! their own and can be written in parallel.
//!
//! ## Codecs
//!
//! Codecs are compiled in via feature flags:
//! - **Gzip** (`.gz`) - via `flate2` (feature: `compression-gzip`)
//! - **Zstd** (`.zst`) - via `zstd` (feature: `compression-zstd`)
//! - **Bzip2** (`.bz2`) - via `bzip2` (feature: `compression-bzip2`)
//! - **Xz** (`.xz`) - via `xz2` (feature: `compression-xz`)
//!
//! Selecting a codec whose feature is disabled fails when the shard is opened.
//!
//! ## Detection on read
//! The file extension is checked first; unknown extensions fall back to magic
//! bytes, and finally to an uncompressed stream.

use crate::shard::SHARD_EXTENSION;
use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Compression applied to a whole shard file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Compression {
    #[default]
    None,
    Gzip,
    Zstd,
    Bzip2,
    Xz,
}

impl Compression {
    const ALL: [Self; 4] = [Self::Gzip, Self::Zstd, Self::Bzip2, Self::Xz];

    /// File-name suffix appended after the record extension (empty for `None`).
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::None => "",
            Self::Gzip => ".gz",
            Self::Zstd => ".zst",
            Self::Bzip2 => ".bz2",
            Self::Xz => ".xz",
        }
    }

    const fn magic(self) -> &'static [u8] {
        match self {
            Self::None => &[],
            Self::Gzip => &[0x1f, 0x8b],
            Self::Zstd => &[0x28, 0xb5, 0x2f, 0xfd],
            Self::Bzip2 => &[0x42, 0x5a, 0x68],
            Self::Xz => &[0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00],
        }
    }

    /// Whether support for this codec was compiled in.
    #[must_use]
    pub const fn is_available(self) -> bool {
        match self {
            Self::None => true,
            Self::Gzip => cfg!(feature = "compression-gzip"),
            Self::Zstd => cfg!(feature = "compression-zstd"),
            Self::Bzip2 => cfg!(feature = "compression-bzip2"),
            Self::Xz => cfg!(feature = "compression-xz"),
        }
    }

    /// Detect the codec from a path's extension (case-insensitive).
    #[must_use]
    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        let name = path.as_ref().to_string_lossy().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|c| name.ends_with(c.extension()))
    }

    fn from_magic<R: BufRead>(reader: &mut R) -> Option<Self> {
        let buf = reader.fill_buf().ok()?;
        Self::ALL
            .into_iter()
            .find(|c| buf.len() >= c.magic().len() && buf.starts_with(c.magic()))
    }
}

/// A buffered, possibly compressing, shard writer.
///
/// [`ShardSink::finish`] must be called to terminate the compressed stream;
/// dropping the sink flushes on a best-effort basis only.
pub enum ShardSink {
    Plain(BufWriter<File>),
    #[cfg(feature = "compression-gzip")]
    Gzip(flate2::write::GzEncoder<BufWriter<File>>),
    #[cfg(feature = "compression-zstd")]
    Zstd(zstd::stream::write::Encoder<'static, BufWriter<File>>),
    #[cfg(feature = "compression-bzip2")]
    Bzip2(bzip2::write::BzEncoder<BufWriter<File>>),
    #[cfg(feature = "compression-xz")]
    Xz(xz2::write::XzEncoder<BufWriter<File>>),
}

impl ShardSink {
    /// Wrap a freshly created file with the requested codec.
    ///
    /// # Errors
    /// Fails if the codec is not compiled in or the encoder cannot be set up.
    pub fn new(file: File, compression: Compression) -> Result<Self> {
        let inner = BufWriter::new(file);
        let sink = match compression {
            Compression::None => Self::Plain(inner),
            #[cfg(feature = "compression-gzip")]
            Compression::Gzip => Self::Gzip(flate2::write::GzEncoder::new(
                inner,
                flate2::Compression::default(),
            )),
            #[cfg(feature = "compression-zstd")]
            Compression::Zstd => Self::Zstd(zstd::stream::write::Encoder::new(inner, 3)?),
            #[cfg(feature = "compression-bzip2")]
            Compression::Bzip2 => Self::Bzip2(bzip2::write::BzEncoder::new(
                inner,
                bzip2::Compression::default(),
            )),
            #[cfg(feature = "compression-xz")]
            Compression::Xz => Self::Xz(xz2::write::XzEncoder::new(inner, 6)),
            #[allow(unreachable_patterns)]
            other => bail!("compression {other:?} is not enabled in this build"),
        };
        Ok(sink)
    }

    /// Terminate the compressed stream and flush everything to the file.
    ///
    /// # Errors
    /// Returns any I/O error raised while finishing or flushing.
    pub fn finish(self) -> io::Result<File> {
        let buffered = match self {
            Self::Plain(w) => w,
            #[cfg(feature = "compression-gzip")]
            Self::Gzip(w) => w.finish()?,
            #[cfg(feature = "compression-zstd")]
            Self::Zstd(w) => w.finish()?,
            #[cfg(feature = "compression-bzip2")]
            Self::Bzip2(w) => w.finish()?,
            #[cfg(feature = "compression-xz")]
            Self::Xz(w) => w.finish()?,
        };
        buffered.into_inner().map_err(io::IntoInnerError::into_error)
    }
}

impl Write for ShardSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Plain(w) => w.write(buf),
            #[cfg(feature = "compression-gzip")]
            Self::Gzip(w) => w.write(buf),
            #[cfg(feature = "compression-zstd")]
            Self::Zstd(w) => w.write(buf),
            #[cfg(feature = "compression-bzip2")]
            Self::Bzip2(w) => w.write(buf),
            #[cfg(feature = "compression-xz")]
            Self::Xz(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(w) => w.flush(),
            #[cfg(feature = "compression-gzip")]
            Self::Gzip(w) => w.flush(),
            #[cfg(feature = "compression-zstd")]
            Self::Zstd(w) => w.flush(),
            #[cfg(feature = "compression-bzip2")]
            Self::Bzip2(w) => w.flush(),
            #[cfg(feature = "compression-xz")]
            Self::Xz(w) => w.flush(),
        }
    }
}

/// Open a shard for reading, transparently decompressing it.
///
/// Detection strategy:
/// 1. Check the path extension (a bare `.rec` is uncompressed)
/// 2. Fall back to magic bytes
/// 3. Return the plain buffered stream
///
/// # Errors
/// Fails if a detected codec is not compiled in or its decoder cannot start.
pub fn open_shard_reader(file: File, path: impl AsRef<Path>) -> Result<Box<dyn Read + Send>> {
    let path = path.as_ref();
    let mut reader = BufReader::new(file);
    // A bare `.rec` shard is never sniffed: its first bytes are a frame length.
    let codec = match Compression::from_path(path) {
        Some(c) => c,
        None if path.extension().is_some_and(|e| e == SHARD_EXTENSION) => Compression::None,
        None => Compression::from_magic(&mut reader).unwrap_or_default(),
    };
    wrap_reader(reader, codec)
}

fn wrap_reader(reader: BufReader<File>, compression: Compression) -> Result<Box<dyn Read + Send>> {
    let boxed: Box<dyn Read + Send> = match compression {
        Compression::None => Box::new(reader),
        #[cfg(feature = "compression-gzip")]
        Compression::Gzip => Box::new(flate2::read::GzDecoder::new(reader)),
        #[cfg(feature = "compression-zstd")]
        Compression::Zstd => Box::new(zstd::stream::read::Decoder::with_buffer(reader)?),
        #[cfg(feature = "compression-bzip2")]
        Compression::Bzip2 => Box::new(bzip2::read::BzDecoder::new(reader)),
        #[cfg(feature = "compression-xz")]
        Compression::Xz => Box::new(xz2::read::XzDecoder::new(reader)),
        #[allow(unreachable_patterns)]
        other => bail!("compression {other:?} is not enabled in this build"),
    };
    Ok(boxed)
}
