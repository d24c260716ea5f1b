//! Interleaved streaming reader.
//!
//! [`load_dataset`] resolves a glob to a list of shard files and returns an
//! [`Interleave`] iterator over parsed records. Up to `cycle_length` files
//! are open at once; the iterator takes `block_length` consecutive records
//! from one file, then moves to the next open file. A file that runs out is
//! replaced by the next unopened file, which is read on that slot's next turn.
//!
//! Every open file has a prefetch thread that reads frames, decodes them and
//! runs the parse function ahead of the consumer, bounded by
//! [`ReadOptions::prefetch`]. Prefetching never changes the output order:
//! that depends only on the file order, `cycle_length` and `block_length`.

use crate::error::DatasetError;
use crate::features::Example;
use crate::io::glob::expand_glob;
use crate::io::record::RecordReader;
use crate::parse::{ParsedSample, Parser};
use anyhow::{Context, Result, anyhow};
use crossbeam::channel::{Receiver, Sender, bounded, never};
use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

/// Read-side configuration.
#[derive(Clone, Debug)]
pub struct ReadOptions {
    /// Permute the file order before reading. Records inside a file keep
    /// their order.
    pub shuffle: bool,
    /// Shuffle seed; derived from the clock when `None`.
    pub seed: Option<u64>,
    /// Files open at the same time. Must be at least 1.
    pub cycle_length: usize,
    /// Consecutive records taken from one file per turn. Must be at least 1.
    pub block_length: usize,
    /// Parsed records buffered ahead per open file. Must be at least 1.
    pub prefetch: usize,
    /// 1 logs the number of matched files, 2 also lists them.
    pub verbosity: u8,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            shuffle: false,
            seed: None,
            cycle_length: num_cpus::get(),
            block_length: 1,
            prefetch: 16,
            verbosity: 0,
        }
    }
}

impl ReadOptions {
    #[must_use]
    pub const fn with_shuffle(mut self, seed: Option<u64>) -> Self {
        self.shuffle = true;
        self.seed = seed;
        self
    }

    #[must_use]
    pub const fn with_cycle_length(mut self, cycle_length: usize) -> Self {
        self.cycle_length = cycle_length;
        self
    }

    #[must_use]
    pub const fn with_block_length(mut self, block_length: usize) -> Self {
        self.block_length = block_length;
        self
    }

    #[must_use]
    pub const fn with_prefetch(mut self, prefetch: usize) -> Self {
        self.prefetch = prefetch;
        self
    }

    #[must_use]
    pub const fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("cycle_length", self.cycle_length),
            ("block_length", self.block_length),
            ("prefetch", self.prefetch),
        ] {
            if value == 0 {
                return Err(DatasetError::InvalidOptions(format!("{name} must be at least 1")).into());
            }
        }
        Ok(())
    }
}

/// Caller-supplied record decoder.
pub type ParseFn<T> = Arc<dyn Fn(Example) -> Result<T> + Send + Sync>;

// ============================================================================
// Shuffling
// ============================================================================

#[derive(Clone, Copy, Debug)]
struct SplitMix64 {
    state: u64,
}

impl SplitMix64 {
    const fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    #[inline]
    const fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    /// Uniform index in `0..bound`.
    #[allow(clippy::cast_possible_truncation)]
    fn below(&mut self, bound: usize) -> usize {
        (self.next_u64() % bound as u64) as usize
    }
}

/// Fisher–Yates shuffle.
fn shuffle_files(files: &mut [PathBuf], seed: u64) {
    let mut rng = SplitMix64::new(seed);
    for i in (1..files.len()).rev() {
        let j = rng.below(i + 1);
        files.swap(i, j);
    }
}

#[allow(clippy::cast_possible_truncation)]
fn clock_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default()
}

// ============================================================================
// Prefetching slots
// ============================================================================

/// One open file: its prefetch thread and the channel it fills.
///
/// Dropping a slot disconnects the channel, which stops the thread at its
/// next send, and then joins it.
struct Slot<T> {
    path: PathBuf,
    rx: Receiver<Result<T>>,
    handle: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> Slot<T> {
    fn open(path: PathBuf, parse: ParseFn<T>, prefetch: usize) -> Result<Self> {
        let (tx, rx) = bounded(prefetch);
        let thread_path = path.clone();
        let handle = std::thread::Builder::new()
            .name("shardset-prefetch".into())
            .spawn(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    prefetch_file(&thread_path, &*parse, &tx);
                }));
                if let Err(payload) = outcome {
                    let _ = tx.send(Err(panic_error(&thread_path, &*payload)));
                }
            })
            .with_context(|| format!("spawn prefetch thread for {}", path.display()))?;
        Ok(Self {
            path,
            rx,
            handle: Some(handle),
        })
    }
}

impl<T> Drop for Slot<T> {
    fn drop(&mut self) {
        self.rx = never();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// A panic while reading or parsing becomes an `Err` item, so the records
/// left in the file are not silently dropped.
fn panic_error(path: &Path, payload: &(dyn Any + Send)) -> anyhow::Error {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    anyhow!("prefetch of {} panicked: {message}", path.display())
}

fn prefetch_file<T>(
    path: &Path,
    parse: &(dyn Fn(Example) -> Result<T> + Send + Sync),
    tx: &Sender<Result<T>>,
) {
    let reader = match RecordReader::open(path) {
        Ok(r) => r,
        Err(e) => {
            let _ = tx.send(Err(e));
            return;
        }
    };
    for record in reader {
        let item = record.and_then(|ex| {
            parse(ex).with_context(|| format!("parse record from {}", path.display()))
        });
        let failed = item.is_err();
        // A send error means the consumer is gone.
        if tx.send(item).is_err() || failed {
            return;
        }
    }
}

// ============================================================================
// Interleave
// ============================================================================

/// Lazy iterator over parsed records from many shard files.
///
/// Errors (unreadable file, corrupt frame, parse failure) are yielded as
/// `Err` items; the offending file is closed and the others keep going.
pub struct Interleave<T> {
    files: Vec<PathBuf>,
    pending: VecDeque<PathBuf>,
    slots: Vec<Option<Slot<T>>>,
    parse: ParseFn<T>,
    current: usize,
    taken: usize,
    block_length: usize,
    prefetch: usize,
    started: bool,
}

impl<T: Send + 'static> Interleave<T> {
    fn new(files: Vec<PathBuf>, parse: ParseFn<T>, opts: &ReadOptions) -> Self {
        let open = opts.cycle_length.min(files.len());
        Self {
            pending: files.iter().cloned().collect(),
            files,
            slots: (0..open).map(|_| None).collect(),
            parse,
            current: 0,
            taken: 0,
            block_length: opts.block_length,
            prefetch: opts.prefetch,
            started: false,
        }
    }

    /// Matched files in the order they will be opened.
    #[must_use]
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Number of files currently open.
    #[must_use]
    pub fn open_files(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Put the next pending file into slot `i`.
    fn fill(&mut self, i: usize) -> Option<Result<()>> {
        let path = self.pending.pop_front()?;
        debug!(path = %path.display(), slot = i, "opening shard");
        Some(Slot::open(path, Arc::clone(&self.parse), self.prefetch).map(|slot| {
            self.slots[i] = Some(slot);
        }))
    }

    fn advance(&mut self) {
        self.current = (self.current + 1) % self.slots.len();
        self.taken = 0;
    }

    /// Close slot `current` and replace its file.
    fn retire_current(&mut self) -> Option<anyhow::Error> {
        self.slots[self.current] = None;
        let i = self.current;
        self.advance();
        self.fill(i).and_then(Result::err)
    }
}

impl<T: Send + 'static> Iterator for Interleave<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.started {
            self.started = true;
            for i in 0..self.slots.len() {
                if let Some(Err(e)) = self.fill(i) {
                    return Some(Err(e));
                }
            }
        }
        loop {
            if self.slots.iter().all(Option::is_none) {
                // Slots that failed to open leave files behind; retry them.
                if self.pending.is_empty() {
                    return None;
                }
                let i = self.current;
                if let Some(Err(e)) = self.fill(i) {
                    return Some(Err(e));
                }
                continue;
            }
            let Some(slot) = &self.slots[self.current] else {
                self.advance();
                continue;
            };
            match slot.rx.recv() {
                Ok(Ok(item)) => {
                    self.taken += 1;
                    if self.taken >= self.block_length {
                        self.advance();
                    }
                    return Some(Ok(item));
                }
                Ok(Err(e)) => {
                    debug!(path = %slot.path.display(), error = %e, "closing shard after error");
                    let _ = self.retire_current();
                    return Some(Err(e));
                }
                Err(_) => {
                    if let Some(e) = self.retire_current() {
                        return Some(Err(e));
                    }
                }
            }
        }
    }
}

/// Stream parsed records from every file matching `file_glob` under `data_dir`.
///
/// Nothing is opened until the first call to `next`. A pattern matching no
/// files yields an empty stream.
///
/// # Errors
/// Fails on invalid options or an invalid glob pattern.
pub fn load_dataset<T, F>(
    parse_fn: F,
    data_dir: impl AsRef<Path>,
    file_glob: &str,
    opts: &ReadOptions,
) -> Result<Interleave<T>>
where
    T: Send + 'static,
    F: Fn(Example) -> Result<T> + Send + Sync + 'static,
{
    opts.validate()?;
    let data_dir = data_dir.as_ref();
    let mut files = expand_glob(data_dir, file_glob)?;
    if opts.shuffle {
        shuffle_files(&mut files, opts.seed.unwrap_or_else(clock_seed));
    }

    if opts.verbosity >= 1 {
        info!(
            files = files.len(),
            dir = %data_dir.display(),
            pattern = file_glob,
            "matched shard files"
        );
    }
    if opts.verbosity >= 2 {
        for f in &files {
            info!(path = %f.display(), "shard file");
        }
    }

    Ok(Interleave::new(files, Arc::new(parse_fn), opts))
}

/// [`load_dataset`] with a parser built from the schema at `schema_path`.
///
/// # Errors
/// Fails if the schema cannot be read, plus everything [`load_dataset`] fails on.
pub fn load_parsed(
    schema_path: impl AsRef<Path>,
    data_dir: impl AsRef<Path>,
    file_glob: &str,
    opts: &ReadOptions,
) -> Result<Interleave<ParsedSample>> {
    let parser = Parser::from_schema_file(schema_path)?;
    load_dataset(move |ex| parser.parse(&ex), data_dir, file_glob, opts)
}
