//! Integration tests against the actual crate binary, reading the dataset files and writing the
//! processed tables and the run record: the full E2E path.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use etl_engine::{RunRecord, RunStatus};

use crate::{fixture_path, seed_datasets};

fn run_binary(root: &Path, files: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_etl-engine"))
        .arg("--data-dir")
        .arg(root.join("data"))
        .arg("--output-dir")
        .arg(root.join("processed"))
        .arg("--runs-dir")
        .arg(root.join("runs"))
        .args(["--chunk-size", "2"])
        .args(files)
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to execute binary")
}

fn parse_record(output: &Output) -> RunRecord {
    let stdout = String::from_utf8(output.stdout.clone()).expect("binary output was not valid UTF-8");
    serde_json::from_str(&stdout).expect("binary output was not a run record")
}

#[test]
fn processes_the_datasets_and_prints_the_run_record() {
    let dir = tempfile::tempdir().unwrap();
    seed_datasets(dir.path());

    let output = run_binary(dir.path(), &["pool_swaps.csv"]);

    assert!(
        output.status.success(),
        "binary exited with non-zero status.\nstderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let record = parse_record(&output);
    assert_eq!(record.status, RunStatus::Finished);
    assert_eq!(record.files, ["pool_swaps.csv"]);
    assert_eq!(
        record.stages.keys().collect::<Vec<_>>(),
        ["bank_prices", "pool_swaps", "tata_motors"]
    );

    for expected in [
        "Bank_Price_Data_China_new",
        "final_dataset_tata_motors",
        "pool_swaps",
    ] {
        let actual = fs::read_to_string(
            dir.path()
                .join("processed")
                .join(format!("{expected}.processed.csv")),
        )
        .expect("missing processed output");
        let wanted = fs::read_to_string(fixture_path(&format!("{expected}.expected.csv")))
            .expect("failed to read expected output fixture");
        assert_eq!(actual, wanted, "{expected}");
    }
    assert!(
        dir.path()
            .join("processed")
            .join("pool_swaps.processed.sample.csv")
            .exists()
    );

    let persisted = fs::read(dir.path().join("runs").join(format!("{}.json", record.run_id)))
        .expect("missing persisted run record");
    let persisted: RunRecord = serde_json::from_slice(&persisted).unwrap();
    assert_eq!(persisted, record);
}

#[test]
fn missing_dataset_fails_the_run() {
    let dir = tempfile::tempdir().unwrap();
    seed_datasets(dir.path());
    fs::remove_file(dir.path().join("data").join("final_dataset_tata_motors.csv")).unwrap();

    let output = run_binary(dir.path(), &[]);

    assert!(!output.status.success(), "binary should exit with failure");
    let record = parse_record(&output);
    assert_eq!(record.status, RunStatus::Failed);
    assert_eq!(record.errors[0].stage.as_deref(), Some("tata_motors"));
    assert!(!record.stages.contains_key("pool_swaps"));
    assert!(
        dir.path()
            .join("processed")
            .join("Bank_Price_Data_China_new.processed.csv")
            .exists()
    );
}
