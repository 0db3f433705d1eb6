//! Integration tests for the ETL engine.

mod from_file;
mod pipeline;
mod registry;
mod writer;

use std::fs;
use std::path::{Path, PathBuf};

use etl_engine::{EngineConfig, Progress, ProgressEvent, run_once};

/// Returns the absolute path to a test fixture file in `tests/data/`.
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join(name)
}

/// Copies the three dataset fixtures into `<root>/data`.
pub fn seed_datasets(root: &Path) -> PathBuf {
    let data_dir = root.join("data");
    fs::create_dir_all(&data_dir).expect("failed to create data dir");
    for name in [
        "Bank_Price_Data_China new.csv",
        "final_dataset_tata_motors.csv",
        "pool_swaps.csv",
    ] {
        fs::copy(fixture_path(name), data_dir.join(name)).expect("failed to copy fixture");
    }
    data_dir
}

#[test]
fn no_sources_produce_no_progress() {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig {
        sources: Vec::new(),
        ..EngineConfig::rooted_at(dir.path())
    };

    let mut events: Vec<(String, ProgressEvent)> = Vec::new();
    run_once(config, |stage, event| events.push((stage.to_string(), event))).unwrap();

    assert!(events.is_empty(), "expected no progress events");
}

#[test]
fn default_sources_process_the_three_datasets() {
    let dir = tempfile::tempdir().unwrap();
    seed_datasets(dir.path());
    let config = EngineConfig {
        chunk_size: 2,
        ..EngineConfig::rooted_at(dir.path())
    };

    let mut finished = Vec::new();
    run_once(config, |stage, event| {
        if let Progress::Finished { rows, .. } = event.progress {
            finished.push((stage.to_string(), rows));
        }
    })
    .unwrap();

    assert_eq!(
        finished,
        [
            ("bank_prices".to_string(), 3),
            ("tata_motors".to_string(), 3),
            ("pool_swaps".to_string(), 3),
        ]
    );
}
