//! Sharded parallel writer.
//!
//! [`write_dataset`] splits the samples into contiguous shards
//! ([`crate::shard::partition`]) and writes each shard to its own record file
//! on a dedicated rayon pool. Two strategies are available:
//!
//! - [`WriteStrategy::PerShard`]: one pool task per shard does everything for
//!   its samples, in order, and owns the file handle.
//! - [`WriteStrategy::Queued`]: one writer thread per shard owns the file and
//!   drains a bounded channel; the pool decompresses and encodes samples of
//!   all shards concurrently. Records within a shard land in completion order.
//!
//! A failing shard never aborts its siblings. The outcome of every shard is
//! reported in the returned [`WriteSummary`].

use crate::datum::Sample;
use crate::error::DatasetError;
use crate::features::Example;
use crate::io::compression::Compression;
use crate::io::record::RecordWriter;
use crate::schema::Schema;
use crate::shard::{partition, shard_path, shard_prefix};
use anyhow::{Context, Result, bail};
use crossbeam::channel::{Receiver, Sender, bounded};
use rayon::prelude::*;
use std::fs::create_dir_all;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::{debug, info, warn};

/// How shard files are fed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WriteStrategy {
    #[default]
    PerShard,
    /// Dedicated writer thread per shard behind a channel of `queue_depth`
    /// encoded records.
    Queued { queue_depth: usize },
}

/// Write-side configuration.
#[derive(Clone, Debug)]
pub struct WriteOptions {
    /// Number of output files. Must be at least 1.
    pub num_shards: usize,
    /// Upper bound on pool threads; the pool never exceeds `num_shards`.
    pub num_workers: usize,
    /// Inserted into file names: `record_<id>_..._<index>.rec`.
    pub extra_identifiers: Vec<String>,
    /// 0 silent, 1 per-shard progress, 2 per-sample progress.
    pub verbosity: u8,
    pub strategy: WriteStrategy,
    pub compression: Compression,
    /// When set, every decompressed sample must match this schema.
    pub consistency_check: Option<Schema>,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            num_shards: 1,
            num_workers: num_cpus::get(),
            extra_identifiers: Vec::new(),
            verbosity: 0,
            strategy: WriteStrategy::PerShard,
            compression: Compression::None,
            consistency_check: None,
        }
    }
}

impl WriteOptions {
    #[must_use]
    pub fn with_shards(mut self, num_shards: usize) -> Self {
        self.num_shards = num_shards;
        self
    }

    #[must_use]
    pub fn with_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    #[must_use]
    pub fn with_identifiers<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_identifiers = ids.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub const fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    #[must_use]
    pub const fn with_strategy(mut self, strategy: WriteStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    #[must_use]
    pub const fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    #[must_use]
    pub fn with_consistency_check(mut self, schema: Schema) -> Self {
        self.consistency_check = Some(schema);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.num_shards == 0 {
            return Err(DatasetError::InvalidOptions("num_shards must be at least 1".into()).into());
        }
        if self.num_workers == 0 {
            return Err(DatasetError::InvalidOptions("num_workers must be at least 1".into()).into());
        }
        if let WriteStrategy::Queued { queue_depth: 0 } = self.strategy {
            return Err(DatasetError::InvalidOptions("queue_depth must be at least 1".into()).into());
        }
        if !self.compression.is_available() {
            return Err(DatasetError::InvalidOptions(format!(
                "{:?} support is not compiled in",
                self.compression
            ))
            .into());
        }
        Ok(())
    }
}

/// Outcome of one shard.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShardReport {
    pub index: usize,
    pub path: PathBuf,
    /// Samples partitioned into this shard.
    pub assigned: usize,
    /// Records actually appended.
    pub written: usize,
    /// Samples omitted because a datum asked to skip.
    pub skipped: usize,
    /// First failure; the shard stopped there and its file is partial.
    pub error: Option<String>,
}

impl ShardReport {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Per-shard outcomes of a [`write_dataset`] call, in shard order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub shards: Vec<ShardReport>,
}

impl WriteSummary {
    #[must_use]
    pub fn total_written(&self) -> usize {
        self.shards.iter().map(|s| s.written).sum()
    }

    #[must_use]
    pub fn total_skipped(&self) -> usize {
        self.shards.iter().map(|s| s.skipped).sum()
    }

    #[must_use]
    pub fn failed(&self) -> Vec<&ShardReport> {
        self.shards.iter().filter(|s| !s.is_success()).collect()
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.shards.iter().all(ShardReport::is_success)
    }

    #[must_use]
    pub fn paths(&self) -> Vec<&Path> {
        self.shards.iter().map(|s| s.path.as_path()).collect()
    }

    /// Turn any shard failure into an error.
    ///
    /// # Errors
    /// Fails listing every failed shard when at least one shard failed.
    pub fn into_result(self) -> Result<Self> {
        let failed = self.failed();
        if failed.is_empty() {
            return Ok(self);
        }
        let detail: Vec<String> = failed
            .iter()
            .map(|s| {
                format!(
                    "shard {} ({}): {}",
                    s.index,
                    s.path.display(),
                    s.error.as_deref().unwrap_or_default()
                )
            })
            .collect();
        bail!("{} of {} shards failed: {}", failed.len(), self.shards.len(), detail.join("; "))
    }

    /// Delete the partial files of failed shards. Returns how many were removed.
    ///
    /// # Errors
    /// Returns an error if an existing partial file cannot be removed.
    pub fn remove_failed(&self) -> Result<usize> {
        let mut removed = 0;
        for s in self.failed() {
            if s.path.exists() {
                std::fs::remove_file(&s.path)
                    .with_context(|| format!("remove partial shard {}", s.path.display()))?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Write `samples` into `num_shards` record files under `output_dir`.
///
/// Blocks until every shard is finished. Per-shard failures are reported in
/// the summary, not returned as `Err`.
///
/// # Errors
/// Fails up front on invalid options, if `output_dir` cannot be created, or
/// if the worker pool cannot be started.
pub fn write_dataset(
    samples: &[Sample],
    output_dir: impl AsRef<Path>,
    opts: &WriteOptions,
) -> Result<WriteSummary> {
    opts.validate()?;
    let output_dir = output_dir.as_ref();
    create_dir_all(output_dir).with_context(|| format!("mkdir -p {}", output_dir.display()))?;

    let parts = partition(samples, opts.num_shards);
    let prefix = shard_prefix(output_dir, &opts.extra_identifiers);
    let paths: Vec<PathBuf> = (0..parts.len())
        .map(|i| shard_path(&prefix, i, opts.compression))
        .collect();

    let threads = opts.num_workers.min(opts.num_shards);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("shardset-write-{i}"))
        .build()
        .context("build writer pool")?;

    if opts.verbosity >= 1 {
        info!(
            samples = samples.len(),
            shards = parts.len(),
            threads,
            dir = %output_dir.display(),
            "writing dataset"
        );
    }

    let shards: Vec<ShardReport> = match opts.strategy {
        WriteStrategy::PerShard => pool.install(|| {
            parts
                .par_iter()
                .zip(paths.par_iter())
                .enumerate()
                .map(|(i, (part, path))| write_shard(i, path, part, opts))
                .collect()
        }),
        WriteStrategy::Queued { queue_depth } => {
            write_queued(&pool, &parts, &paths, queue_depth, opts)
        }
    };

    let summary = WriteSummary { shards };
    for s in summary.failed() {
        warn!(
            shard = s.index,
            path = %s.path.display(),
            written = s.written,
            error = s.error.as_deref().unwrap_or_default(),
            "shard failed"
        );
    }
    Ok(summary)
}

/// Decompress, check and encode one sample. `Ok(None)` means skip.
fn encode_sample(sample: &Sample, opts: &WriteOptions) -> Result<Option<Example>> {
    let Some(datums) = sample.decompress()? else {
        return Ok(None);
    };
    if let Some(schema) = &opts.consistency_check {
        schema.check_sample(&datums)?;
    }
    let mut example = Example::new();
    for datum in &datums {
        example.insert(datum.name(), datum.encode()?);
    }
    Ok(Some(example))
}

fn log_shard_done(report: &ShardReport, opts: &WriteOptions) {
    if opts.verbosity >= 1 && report.is_success() {
        info!(
            shard = report.index,
            path = %report.path.display(),
            written = report.written,
            skipped = report.skipped,
            "shard complete"
        );
    }
}

// ============================================================================
// Per-shard strategy
// ============================================================================

fn write_shard(index: usize, path: &Path, part: &[Sample], opts: &WriteOptions) -> ShardReport {
    let mut report = ShardReport {
        index,
        path: path.to_path_buf(),
        assigned: part.len(),
        written: 0,
        skipped: 0,
        error: None,
    };
    if let Err(e) = fill_shard(&mut report, part, opts) {
        report.error = Some(format!("{e:#}"));
    }
    log_shard_done(&report, opts);
    report
}

fn fill_shard(report: &mut ShardReport, part: &[Sample], opts: &WriteOptions) -> Result<()> {
    let mut writer = RecordWriter::create(&report.path, opts.compression)?;
    for (pos, sample) in part.iter().enumerate() {
        let encoded = encode_sample(sample, opts).with_context(|| {
            format!("sample #{pos} of shard {}", report.index)
        });
        match encoded {
            Ok(Some(example)) => {
                writer.append(&example)?;
                report.written += 1;
                if opts.verbosity >= 2 {
                    debug!(shard = report.index, sample = pos, "wrote sample");
                }
            }
            Ok(None) => report.skipped += 1,
            Err(e) => {
                // Keep what was written so far on disk; the sample error wins.
                if let Err(close) = writer.close() {
                    warn!(shard = report.index, error = %format!("{close:#}"), "closing partial shard failed");
                }
                return Err(e);
            }
        }
    }
    writer.close()?;
    Ok(())
}

// ============================================================================
// Queued strategy
// ============================================================================

#[derive(Default)]
struct QueueState {
    skipped: AtomicUsize,
    failed: AtomicBool,
    error: Mutex<Option<String>>,
}

impl QueueState {
    fn fail(&self, message: String) {
        self.failed.store(true, Ordering::SeqCst);
        if let Ok(mut slot) = self.error.lock()
            && slot.is_none()
        {
            *slot = Some(message);
        }
    }

    fn take_error(&self) -> Option<String> {
        self.error.lock().ok().and_then(|mut slot| slot.take())
    }
}

fn write_queued(
    pool: &rayon::ThreadPool,
    parts: &[&[Sample]],
    paths: &[PathBuf],
    queue_depth: usize,
    opts: &WriteOptions,
) -> Vec<ShardReport> {
    let states: Vec<QueueState> = parts.iter().map(|_| QueueState::default()).collect();

    std::thread::scope(|scope| {
        let mut senders = Vec::with_capacity(parts.len());
        let mut handles = Vec::with_capacity(parts.len());
        for (i, path) in paths.iter().enumerate() {
            let (tx, rx) = bounded::<(usize, Example)>(queue_depth);
            let state = &states[i];
            handles.push(scope.spawn(move || drain_queue(i, path, &rx, state, opts)));
            senders.push(tx);
        }

        let jobs: Vec<(usize, usize, &Sample)> = parts
            .iter()
            .enumerate()
            .flat_map(|(i, part)| part.iter().enumerate().map(move |(pos, s)| (i, pos, s)))
            .collect();

        pool.install(|| {
            jobs.par_iter()
                .for_each(|&(i, pos, sample)| enqueue(i, pos, sample, &senders[i], &states[i], opts));
        });
        // Disconnect so writer threads see the end of their queues.
        drop(senders);

        handles
            .into_iter()
            .enumerate()
            .map(|(i, h)| {
                let written = h.join().unwrap_or_else(|_| {
                    states[i].fail("writer thread panicked".into());
                    0
                });
                let report = ShardReport {
                    index: i,
                    path: paths[i].clone(),
                    assigned: parts[i].len(),
                    written,
                    skipped: states[i].skipped.load(Ordering::SeqCst),
                    error: states[i].take_error(),
                };
                log_shard_done(&report, opts);
                report
            })
            .collect()
    })
}

fn enqueue(
    index: usize,
    pos: usize,
    sample: &Sample,
    tx: &Sender<(usize, Example)>,
    state: &QueueState,
    opts: &WriteOptions,
) {
    if state.failed.load(Ordering::SeqCst) {
        return;
    }
    match encode_sample(sample, opts) {
        Ok(Some(example)) => {
            // A closed queue means the writer already failed.
            let _ = tx.send((pos, example));
        }
        Ok(None) => {
            state.skipped.fetch_add(1, Ordering::SeqCst);
        }
        Err(e) => state.fail(format!("sample #{pos} of shard {index}: {e:#}")),
    }
}

/// Writer thread body: owns the shard file. Returns the number of records written.
fn drain_queue(
    index: usize,
    path: &Path,
    rx: &Receiver<(usize, Example)>,
    state: &QueueState,
    opts: &WriteOptions,
) -> usize {
    let mut writer = match RecordWriter::create(path, opts.compression) {
        Ok(w) => w,
        Err(e) => {
            state.fail(format!("{e:#}"));
            return 0;
        }
    };
    let mut written = 0;
    for (pos, example) in rx {
        if state.failed.load(Ordering::SeqCst) {
            break;
        }
        if let Err(e) = writer.append(&example) {
            state.fail(format!("{e:#}"));
            break;
        }
        written += 1;
        if opts.verbosity >= 2 {
            debug!(shard = index, sample = pos, "wrote sample");
        }
    }
    if let Err(e) = writer.close() {
        state.fail(format!("{e:#}"));
    }
    written
}
