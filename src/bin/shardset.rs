//! shardset command-line tool
//!
//! Inspects schema documents and shard files without writing any code.

use anyhow::Result;
use clap::{Parser, Subcommand};
use shardset::io::glob::expand_glob_required;
use shardset::{Schema, count_records, verify_shard};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, fmt};

/// Inspect sharded record datasets
#[derive(Parser, Debug)]
#[command(name = "shardset")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a schema document and the decode plan derived from it
    Schema {
        /// Path to the schema JSON file
        path: PathBuf,
    },
    /// Count records in every matching shard
    Count {
        /// Directory holding the shards
        dir: PathBuf,
        /// Glob pattern relative to the directory
        #[arg(default_value = "record_*.rec*")]
        pattern: String,
    },
    /// Check every frame checksum of every matching shard
    Verify {
        /// Directory holding the shards
        dir: PathBuf,
        /// Glob pattern relative to the directory
        #[arg(default_value = "record_*.rec*")]
        pattern: String,
    },
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(false).init();

    match Args::parse().command {
        Command::Schema { path } => {
            let schema = Schema::load(&path)?;
            let (spec, shapes) = schema.decode_spec()?;
            println!("{}", serde_json::to_string_pretty(&schema)?);
            for (name, field) in &spec {
                println!(
                    "{name}: {:?} x {} ({}) -> {:?}",
                    field.kind,
                    field.len,
                    field.ty,
                    shapes.get(name).map(Vec::as_slice).unwrap_or_default()
                );
            }
        }
        Command::Count { dir, pattern } => {
            let files = expand_glob_required(&dir, &pattern)?;
            let counts = count_records(&files)?;
            let mut total = 0;
            for (path, n) in &counts {
                println!("{n:>10}  {}", path.display());
                total += n;
            }
            println!("{total:>10}  total ({} files)", counts.len());
        }
        Command::Verify { dir, pattern } => {
            let files = expand_glob_required(&dir, &pattern)?;
            let mut bad = 0usize;
            for path in &files {
                let check = verify_shard(path)?;
                match &check.error {
                    None => println!("ok       {}  ({} records)", path.display(), check.valid_records),
                    Some(e) => {
                        bad += 1;
                        tracing::error!(path = %path.display(), valid = check.valid_records, "{e}");
                        println!("CORRUPT  {}  after {} records", path.display(), check.valid_records);
                    }
                }
            }
            if bad > 0 {
                anyhow::bail!("{bad} of {} shards are corrupt", files.len());
            }
        }
    }
    Ok(())
}
