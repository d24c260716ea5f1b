use anyhow::Result;
use shardset::testing::*;
use shardset::*;
use std::fs;
use std::io::ErrorKind;
use tempfile::tempdir;

#[test]
fn schema_document_is_indented_json() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("schema.json");
    let schema = write_schema(&labeled_array(0)?, &path)?;
    assert_eq!(schema.len(), 2);

    let text = fs::read_to_string(&path)?;
    assert!(text.contains("\n  \"image\": {\n    \"type\": \"ndarray\",\n    \"shape\": \"(2, 2)\"\n  }"));
    assert!(text.contains("\"label\": {\n    \"type\": \"str\",\n    \"shape\": \"None\"\n  }"));
    assert_eq!(Schema::load(&path)?, schema);
    Ok(())
}

#[test]
fn decode_plan_follows_recorded_types() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("schema.json");
    write_schema(&labeled_array(3)?, &path)?;

    let (spec, shapes) = read_schema(&path)?;
    assert_eq!(spec["image"].kind, FeatureKind::Float);
    assert_eq!(spec["image"].len, 4);
    assert_eq!(spec["label"].kind, FeatureKind::Bytes);
    assert_eq!(spec["label"].len, 1);
    assert_eq!(shapes["image"], vec![2, 2]);
    assert!(shapes["label"].is_empty());
    Ok(())
}

#[test]
fn shapes_survive_a_schema_roundtrip() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("schema.json");
    let sample = mixed_sample(2)?;
    write_schema(&sample, &path)?;

    let (spec, shapes) = read_schema(&path)?;
    let expected: [(&str, &[usize], usize); 6] = [
        ("array", &[2, 3], 6),
        ("count", &[1], 1),
        ("weight", &[1], 1),
        ("name", &[], 1),
        ("point", &[2], 2),
        ("blob", &[], 1),
    ];
    for (name, dims, len) in expected {
        assert_eq!(shapes[name], dims, "shape of {name}");
        assert_eq!(spec[name].len, len, "length of {name}");
    }
    Ok(())
}

#[test]
fn missing_schema_is_not_found() {
    let dir = tempdir().unwrap();
    let err = read_schema(dir.path().join("nope.json")).unwrap_err();
    assert!(err.chain().any(|cause| {
        cause
            .downcast_ref::<std::io::Error>()
            .is_some_and(|e| e.kind() == ErrorKind::NotFound)
    }));
}

#[test]
fn unwritable_schema_path_fails() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("missing_parent").join("schema.json");
    assert!(write_schema(&labeled_array(0)?, &path).is_err());
    Ok(())
}

#[test]
fn non_integer_shape_token_is_reported() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("schema.json");
    fs::write(&path, r#"{ "image": { "type": "ndarray", "shape": "(3, n)" } }"#)?;

    let err = read_schema(&path).unwrap_err();
    match err.downcast_ref::<DatasetError>() {
        Some(DatasetError::SchemaShape { field, token }) => {
            assert_eq!(field, "image");
            assert_eq!(token, "n");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    Ok(())
}

#[test]
fn legacy_scalar_shape_is_accepted() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("schema.json");
    fs::write(&path, r#"{ "n": { "type": "int", "shape": "1" } }"#)?;
    let (spec, shapes) = read_schema(&path)?;
    assert_eq!(spec["n"].len, 1);
    assert_eq!(shapes["n"], vec![1]);
    Ok(())
}

#[test]
fn consistency_check_rejects_a_different_shape() -> Result<()> {
    let dir = tempdir()?;
    let mut samples = labeled_arrays(4)?;
    samples.push(Sample::new(vec![
        Datum::new("image", NdArray::from_vec(vec![0.0; 4]))?.with_encoder(Encoder::FloatArray),
        Datum::new("label", "odd one out")?.with_encoder(Encoder::String),
    ])?);

    let schema = Schema::from_sample(&samples[0])?;
    let opts = WriteOptions::default().with_shards(1).with_consistency_check(schema);
    let summary = write_dataset(&samples, dir.path(), &opts)?;

    assert!(!summary.is_success());
    let failed = summary.failed();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].written, 4);
    assert!(failed[0].error.as_deref().is_some_and(|e| e.contains("does not match schema")));

    // Without the check the same samples are written silently.
    let unchecked = tempdir()?;
    let summary = write_dataset(&samples, unchecked.path(), &WriteOptions::default())?;
    assert_shard_sizes(&summary, &[5]);
    Ok(())
}
