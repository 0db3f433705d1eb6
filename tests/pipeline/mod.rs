//! Integration tests of the engine on generated streams.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use etl_engine::{
    Engine, EngineConfig, Progress, ProgressEvent, ProgressSink, RuleSet, RunId, SourceConfig,
    SourceStats,
};
use rstest::rstest;

/// Collects progress and statistics of a run.
#[derive(Default)]
struct Recorder {
    events: Vec<(String, Progress)>,
    stats: Vec<(String, SourceStats)>,
}

impl ProgressSink for Recorder {
    fn on_progress(&mut self, _: &RunId, stage: &str, event: ProgressEvent) {
        self.events.push((stage.to_string(), event.progress));
    }

    fn on_source_stats(&mut self, _: &RunId, stage: &str, stats: &SourceStats) {
        self.stats.push((stage.to_string(), stats.clone()));
    }
}

fn write_stream(data_dir: &Path, rows: usize) {
    fs::create_dir_all(data_dir).unwrap();
    let mut csv = String::with_capacity(rows * 24);
    csv.push_str("id,price,volume\n");
    for i in 0..rows {
        // deterministic but irregular values
        let price = 100.0 + ((i * 7919) % 1000) as f64 / 10.0;
        let volume = (i * 31) % 977;
        writeln!(csv, "{i},{price},{volume}").unwrap();
    }
    fs::write(data_dir.join("stream.csv"), csv).unwrap();
}

fn run(root: &Path, source: SourceConfig, reservoir_capacity: usize) -> Recorder {
    let config = EngineConfig {
        sources: vec![source],
        reservoir_capacity,
        sample_seed: Some(42),
        ..EngineConfig::rooted_at(root)
    };
    let mut recorder = Recorder::default();
    Engine::new(config)
        .unwrap()
        .run(&RunId::generate(), &mut recorder)
        .unwrap();
    recorder
}

#[test]
fn quarter_million_rows_in_fifty_thousand_row_batches() {
    let dir = tempfile::tempdir().unwrap();
    write_stream(&dir.path().join("data"), 250_000);

    let recorder = run(
        dir.path(),
        SourceConfig::new("stream", "stream.csv", RuleSet::default()).chunked(Some(50_000)),
        1_000,
    );

    let totals: Vec<u64> = recorder
        .events
        .iter()
        .filter_map(|(_, p)| match p {
            Progress::ChunkProcessed { total_rows, .. } => Some(*total_rows),
            _ => None,
        })
        .collect();
    assert_eq!(totals, [50_000, 100_000, 150_000, 200_000, 250_000]);

    let (_, stats) = &recorder.stats[0];
    let sample = stats.sample.as_ref().unwrap();
    assert_eq!(sample.rows, 1_000);
    let sample_lines = fs::read_to_string(&sample.path).unwrap().lines().count();
    assert_eq!(sample_lines, 1_001);

    let output = dir.path().join("data/processed/stream.processed.csv");
    let content = fs::read_to_string(output).unwrap();
    assert_eq!(content.lines().count(), 250_001);
    assert_eq!(content.matches("id,price,volume").count(), 1);
}

#[rstest]
#[case(1)]
#[case(7)]
#[case(64)]
#[case(1_000)]
fn streamed_statistics_match_the_full_load(#[case] chunk_size: usize) {
    let dir = tempfile::tempdir().unwrap();
    write_stream(&dir.path().join("data"), 1_000);

    let full = run(
        dir.path(),
        SourceConfig::new("full", "stream.csv", RuleSet::default()).with_output("full.csv"),
        10,
    );
    let chunked = run(
        dir.path(),
        SourceConfig::new("chunked", "stream.csv", RuleSet::default())
            .chunked(Some(chunk_size))
            .with_output("chunked.csv"),
        10,
    );

    let full = &full.stats[0].1;
    let chunked = &chunked.stats[0].1;
    assert_eq!(full.rows, chunked.rows);
    for column in ["id", "price", "volume"] {
        let (a, b) = (&full.columns[column], &chunked.columns[column]);
        assert_eq!(a.count, b.count);
        assert_eq!(a.min, b.min);
        assert_eq!(a.max, b.max);
        let mean = a.mean.unwrap();
        let variance = a.variance.unwrap();
        assert!((mean - b.mean.unwrap()).abs() <= 1e-9 * mean.abs().max(1.0), "{column}");
        assert!(
            (variance - b.variance.unwrap()).abs() <= 1e-9 * variance.abs().max(1.0),
            "{column}"
        );
    }

    let out = dir.path().join("data/processed");
    assert_eq!(
        fs::read(out.join("full.csv")).unwrap(),
        fs::read(out.join("chunked.csv")).unwrap()
    );
}
