use anyhow::{Result, bail};
use shardset::*;
use std::fs;
use tempfile::tempdir;

#[test]
fn npy_paths_are_loaded_at_write_time() -> Result<()> {
    let dir = tempdir()?;
    let data_dir = dir.path().join("arrays");
    let out_dir = dir.path().join("out");
    fs::create_dir_all(&data_dir)?;

    let mut samples = Vec::new();
    let mut originals = Vec::new();
    for i in 0..4u8 {
        let array = NdArray::new(vec![3, 2], (0..6).map(|k| f32::from(i * 10 + k)).collect())?;
        let path = data_dir.join(format!("a{i}.npy"));
        write_npy(&path, &array)?;
        originals.push(array);
        samples.push(Sample::new(vec![
            Datum::new("features", path)?
                .with_decompress(Decompress::LoadNpy)
                .with_encoder(Encoder::FloatArray),
            Datum::new("id", i64::from(i))?.with_encoder(Encoder::Int64),
        ])?);
    }

    fs::create_dir_all(&out_dir)?;
    let schema = write_schema(&samples[3], out_dir.join("schema.json"))?;
    assert_eq!(schema.get("features").map(|f| f.shape.as_str()), Some("(3, 2)"));
    assert_eq!(schema.get("id").map(|f| f.ty.as_str()), Some("int"));

    write_dataset(&samples, &out_dir, &WriteOptions::default().with_shards(2))?.into_result()?;

    let mut parsed: Vec<ParsedSample> =
        load_parsed(out_dir.join("schema.json"), &out_dir, "record_*.rec", &ReadOptions::default())?
            .collect::<Result<_>>()?;
    parsed.sort_by_key(|s| s.int("id"));
    for (s, original) in parsed.iter().zip(&originals) {
        assert_eq!(s.array("features"), Some(original));
    }
    Ok(())
}

#[test]
fn missing_npy_file_fails_its_shard() -> Result<()> {
    let dir = tempdir()?;
    let sample = Sample::new(vec![
        Datum::new("features", dir.path().join("absent.npy"))?
            .with_decompress(Decompress::LoadNpy)
            .with_encoder(Encoder::FloatArray),
    ])?;
    let summary = write_dataset(&[sample], dir.path(), &WriteOptions::default())?;
    assert!(!summary.is_success());
    assert_eq!(summary.shards[0].written, 0);
    Ok(())
}

#[test]
fn raw_files_travel_as_bytes() -> Result<()> {
    let dir = tempdir()?;
    let blob_path = dir.path().join("photo.jpg");
    let blob = vec![0xff, 0xd8, 0xff, 0xe0, 0x00, 0x10];
    fs::write(&blob_path, &blob)?;

    let sample = Sample::new(vec![
        Datum::new("photo", blob_path)?
            .with_decompress(Decompress::LoadBytes)
            .with_encoder(Encoder::Bytes),
    ])?;
    let out = dir.path().join("out");
    fs::create_dir_all(&out)?;
    write_schema(&sample, out.join("schema.json"))?;
    write_dataset(&[sample], &out, &WriteOptions::default())?.into_result()?;

    let parsed: Vec<ParsedSample> =
        load_parsed(out.join("schema.json"), &out, "record_*.rec", &ReadOptions::default())?
            .collect::<Result<_>>()?;
    assert_eq!(parsed.len(), 1);
    assert_eq!(parsed[0].bytes("photo"), Some(blob.as_slice()));
    Ok(())
}

#[test]
fn tensor_blobs_keep_their_shape() -> Result<()> {
    let dir = tempdir()?;
    let array = NdArray::new(vec![2, 1, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0])?;
    let sample = Sample::new(vec![
        Datum::new("t", array.clone())?.with_encoder(Encoder::Tensor),
    ])?;
    write_dataset(&[sample], dir.path(), &WriteOptions::default())?.into_result()?;

    let decoded: Vec<NdArray> = load_dataset(
        |ex: Example| match ex.get("t") {
            Some(Feature::BytesList(items)) if items.len() == 1 => NdArray::from_tensor_bytes(&items[0]),
            other => bail!("unexpected feature {other:?}"),
        },
        dir.path(),
        "record_*.rec",
        &ReadOptions::default(),
    )?
    .collect::<Result<_>>()?;
    assert_eq!(decoded, vec![array]);
    Ok(())
}

#[test]
fn custom_codecs_run_in_order() -> Result<()> {
    let dir = tempdir()?;
    let upper = Decompress::custom(|d: &Datum| {
        let s = d.value().as_str().unwrap_or_default().to_uppercase();
        Ok(Some(d.derive(Value::Str(s))))
    });
    let reversed = Encoder::custom(|d: &Datum| {
        let s: String = d.value().as_str().unwrap_or_default().chars().rev().collect();
        Ok(Feature::bytes(s))
    });
    let sample = Sample::new(vec![
        Datum::new("word", "shard")?
            .with_decompress(upper)
            .with_encoder(reversed),
    ])?;
    write_dataset(&[sample], dir.path(), &WriteOptions::default())?.into_result()?;

    let words: Vec<Example> =
        load_dataset(Ok, dir.path(), "record_*.rec", &ReadOptions::default())?.collect::<Result<_>>()?;
    assert_eq!(words[0].get("word"), Some(&Feature::bytes("DRAHS")));
    Ok(())
}

#[test]
fn wrong_encoder_kind_is_an_encode_error() -> Result<()> {
    let d = Datum::new("label", "cat")?.with_encoder(Encoder::FloatArray);
    let err = d.encode().unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DatasetError>(),
        Some(DatasetError::Encode { field, .. }) if field == "label"
    ));
    Ok(())
}
