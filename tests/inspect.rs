use anyhow::Result;
use shardset::io::glob::expand_glob;
use shardset::testing::*;
use shardset::*;
use tempfile::tempdir;

fn dataset(n: usize, shards: usize) -> Result<tempfile::TempDir> {
    let dir = tempdir()?;
    let samples = labeled_arrays(n)?;
    write_schema(&samples[n - 1], dir.path().join("schema.json"))?;
    write_dataset(&samples, dir.path(), &WriteOptions::default().with_shards(shards))?.into_result()?;
    Ok(dir)
}

fn stream(dir: &tempfile::TempDir) -> Result<Interleave<ParsedSample>> {
    load_parsed(
        dir.path().join("schema.json"),
        dir.path(),
        "record_*.rec",
        &ReadOptions::default().with_verbosity(2),
    )
}

#[test]
fn frame_counts_match_the_partition() -> Result<()> {
    let dir = dataset(7, 3)?;
    let files = expand_glob(dir.path(), "record_*.rec")?;
    let counts: Vec<u64> = count_records(&files)?.into_iter().map(|(_, n)| n).collect();
    assert_eq!(counts, vec![3, 2, 2]);
    assert_shards_valid(&files);
    Ok(())
}

#[test]
fn inspect_finds_matching_samples() -> Result<()> {
    let dir = dataset(10, 2)?;
    let high = inspect(stream(&dir)?, |s| s.array("image").is_some_and(|a| a.data()[0] >= 7.0), 2)?;
    assert_eq!(high.len(), 2);
    assert!(high.iter().all(|s| s.array("image").is_some_and(|a| a.data()[0] >= 7.0)));

    let none = inspect(stream(&dir)?, |s| s.str("label") == Some("missing"), 3)?;
    assert!(none.is_empty());
    Ok(())
}

#[test]
fn check_and_analyse_over_a_stream() -> Result<()> {
    let dir = dataset(6, 3)?;
    let square = |s: &ParsedSample| s.array("image").is_some_and(|a| a.shape() == [2, 2]);
    let labeled = |s: &ParsedSample| s.str("label").is_some_and(|l| l.starts_with("sample-"));
    let criteria: [&dyn Fn(&ParsedSample) -> bool; 2] = [&square, &labeled];
    assert!(check(stream(&dir)?, &criteria)?);

    let tiny = |s: &ParsedSample| s.array("image").is_some_and(|a| a.data()[0] < 3.0);
    let strict: [&dyn Fn(&ParsedSample) -> bool; 1] = [&tiny];
    assert!(!check(stream(&dir)?, &strict)?);

    let sum = |s: &ParsedSample| s.array("image").map_or(0.0, |a| a.data().iter().sum::<f32>());
    let processors: [&dyn Fn(&ParsedSample) -> f32; 1] = [&sum];
    let rows = analyse(stream(&dir)?, &processors)?;
    let total: f32 = rows.iter().map(|r| r[0]).sum();
    // 4 * (0 + 1 + ... + 5)
    assert!((total - 60.0).abs() < f32::EPSILON);
    Ok(())
}

#[test]
fn profile_report_is_saved_as_json() -> Result<()> {
    let dir = dataset(9, 3)?;
    let report = profile(stream(&dir)?, Some(5))?;
    assert_eq!(report.elements, 5);

    let path = dir.path().join("profile.json");
    report.save(&path)?;
    let back: ProfileReport = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
    assert_eq!(back.elements, 5);

    let all = profile(stream(&dir)?, None)?;
    assert_eq!(all.elements, 9);
    Ok(())
}
