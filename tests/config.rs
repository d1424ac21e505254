use std::fs;
use std::path::PathBuf;

use assert_matches::assert_matches;

use kira_ena_pipeline::config::{ConfigLoader, ConfigOverrides};
use kira_ena_pipeline::error::KiraError;

#[test]
fn file_values_lose_to_overrides() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("kira-ep.json");
    fs::write(
        &path,
        r#"{
            "project": "PRJEB1",
            "workers": 8,
            "java_mem": "16G",
            "read_group": {"library": "Lib7", "platform": "ILLUMINA", "platform_unit": "tile", "center": "LAB"}
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(
        Some(&path),
        ConfigOverrides {
            project: Some("PRJEB19970".to_string()),
            workers: Some(2),
            ..ConfigOverrides::default()
        },
    )
    .unwrap();

    assert_eq!(resolved.require_project().unwrap().as_str(), "PRJEB19970");
    assert_eq!(resolved.workers, 2);
    assert_eq!(resolved.java_mem, "16G");
    assert_eq!(resolved.read_group.library, "Lib7");
    assert_eq!(resolved.raw_dir, PathBuf::from("data/raw_data"));
}

#[test]
fn explicit_missing_file_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("nope.json");
    let err = ConfigLoader::resolve(Some(&path), ConfigOverrides::default()).unwrap_err();
    assert_matches!(err, KiraError::ConfigRead(_));
}

#[test]
fn malformed_file_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("kira-ep.json");
    fs::write(&path, "{ not json").unwrap();
    let err = ConfigLoader::resolve(Some(&path), ConfigOverrides::default()).unwrap_err();
    assert_matches!(err, KiraError::ConfigParse(_));
}

#[test]
fn zero_workers_is_raised_to_one() {
    let resolved = ConfigLoader::resolve_config(
        Default::default(),
        ConfigOverrides {
            workers: Some(0),
            ..ConfigOverrides::default()
        },
    )
    .unwrap();
    assert_eq!(resolved.workers, 1);
}

#[test]
fn bad_project_accession_is_rejected() {
    let err = ConfigLoader::resolve_config(
        Default::default(),
        ConfigOverrides {
            project: Some("PRJ EB/1".to_string()),
            ..ConfigOverrides::default()
        },
    )
    .unwrap_err();
    assert_matches!(err, KiraError::InvalidAccession(_));
}

#[test]
fn missing_project_is_reported_on_demand() {
    let resolved =
        ConfigLoader::resolve_config(Default::default(), ConfigOverrides::default()).unwrap();
    assert_matches!(resolved.require_project(), Err(KiraError::InvalidAccession(_)));
}
