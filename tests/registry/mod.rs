//! Integration tests of the run registry through the public API.

use std::fs;

use etl_engine::{EngineConfig, Error, RunId, RunRecord, RunRegistry, RunStatus};

use crate::seed_datasets;

fn registry(root: &std::path::Path) -> RunRegistry {
    seed_datasets(root);
    RunRegistry::open(EngineConfig {
        chunk_size: 2,
        sample_seed: Some(3),
        ..EngineConfig::rooted_at(root)
    })
    .unwrap()
}

#[test]
fn run_lifecycle_from_queued_to_finished() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry(dir.path());

    let run_id = registry.create(vec!["pool_swaps.csv".into()]).unwrap();
    let queued = registry.get(&run_id).unwrap();
    assert_eq!(queued.status, RunStatus::Queued);
    assert!(queued.started_at.is_none() && queued.finished_at.is_none());

    registry.start(&run_id).unwrap().join().unwrap();

    let finished = registry.get(&run_id).unwrap();
    assert_eq!(finished.status, RunStatus::Finished);
    assert!(finished.started_at.is_some() && finished.finished_at.is_some());
    assert_eq!(finished.stats.len(), 3);
    assert_eq!(registry.list().unwrap(), [run_id]);
}

#[test]
fn persisted_record_is_stable_under_reserialization() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry(dir.path());
    let run_id = registry.create(vec!["pool_swaps.csv".into()]).unwrap();
    registry.start(&run_id).unwrap().join().unwrap();

    let path = registry
        .engine()
        .config()
        .runs_dir
        .join(format!("{run_id}.json"));
    let original = fs::read(&path).unwrap();
    let record: RunRecord = serde_json::from_slice(&original).unwrap();
    let reserialized = serde_json::to_vec_pretty(&record).unwrap();

    assert_eq!(reserialized, original);
}

#[test]
fn registries_on_distinct_roots_run_side_by_side() {
    let dirs: Vec<_> = (0..3).map(|_| tempfile::tempdir().unwrap()).collect();
    let registries: Vec<_> = dirs.iter().map(|d| registry(d.path())).collect();

    let runs: Vec<(&RunRegistry, RunId)> = registries
        .iter()
        .map(|r| (r, r.create(Vec::new()).unwrap()))
        .collect();
    let handles: Vec<_> = runs.iter().map(|(r, id)| r.start(id).unwrap()).collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for (registry, id) in &runs {
        let record = registry.get(id).unwrap();
        assert_eq!(record.status, RunStatus::Finished);
        assert_eq!(registry.list().unwrap(), [id.clone()]);
    }
}

#[test]
fn unknown_run_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry(dir.path());

    let err = registry.get(&RunId::from("does-not-exist")).unwrap_err();

    assert!(matches!(err, Error::RunNotFound(_)));
}
