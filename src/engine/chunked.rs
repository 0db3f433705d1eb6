//! Streaming path for sources too large to materialize: one bounded batch at a time through
//! transform, statistics, reservoir sampling and append-mode writes.

use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, error, warn};

use crate::config::{EngineConfig, PartialOutputPolicy, SourceConfig};
use crate::domain::{Progress, ProgressEvent, RawTable, RunId, SampleInfo, Table};
use crate::engine::{ProgressSink, SourceOutcome, SourceStats};
use crate::error::Error;
use crate::input::BatchReader;
use crate::output::{WriteMode, write_table};
use crate::stats::{ColumnStats, IqrSummary, Reservoir};

/// Streams `source` into its output file. Memory use is bounded by one batch plus the
/// reservoir, independent of the size of the source.
pub(super) fn process(
    config: &EngineConfig,
    source: &SourceConfig,
    run_id: &RunId,
    sink: &mut impl ProgressSink,
) -> Result<SourceOutcome, Error> {
    let output = config.output_path(source);
    let sample = sample_path(&output);

    let result = stream(config, source, &output, &sample, run_id, sink);
    if result.is_err() && config.partial_output == PartialOutputPolicy::Delete {
        for path in [&output, &sample] {
            discard(path);
        }
    }
    result
}

fn stream(
    config: &EngineConfig,
    source: &SourceConfig,
    output: &Path,
    sample_output: &Path,
    run_id: &RunId,
    sink: &mut impl ProgressSink,
) -> Result<SourceOutcome, Error> {
    let reader = BatchReader::open(&config.source_path(source), config.chunk_size_for(source))?;
    let input_columns = reader.columns().to_vec();

    let mut stats = ColumnStats::default();
    let mut reservoir = match config.sample_seed {
        Some(seed) => Reservoir::seeded(config.reservoir_capacity, seed),
        None => Reservoir::new(config.reservoir_capacity),
    };
    let mut output_columns: Option<Vec<String>> = None;
    let mut total_rows = 0u64;
    let mut chunk_index = 0u64;

    for batch in reader {
        let raw = batch?;
        let table = source.rules.apply(&source.name, &raw)?;
        drop(raw);

        chunk_index += 1;
        let chunk_rows = table.len() as u64;
        total_rows += chunk_rows;

        stats.observe(&table);
        let mode = if chunk_index == 1 {
            WriteMode::Overwrite
        } else {
            WriteMode::Append
        };
        write_table(&table, output, mode)?;
        debug!(chunk_index, chunk_rows, total_rows, "chunk processed");

        if output_columns.is_none() {
            output_columns = Some(table.columns().to_vec());
        }
        reservoir.offer_all(table.into_rows());

        sink.on_progress(
            run_id,
            &source.name,
            ProgressEvent::now(Progress::ChunkProcessed {
                chunk_index,
                chunk_rows,
                total_rows,
            }),
        );
    }

    let columns = match output_columns {
        Some(columns) => columns,
        None => {
            // header-only source: still produce an output with the transformed schema
            let empty = source
                .rules
                .apply(&source.name, &RawTable::new(input_columns, Vec::new()))?;
            write_table(&empty, output, WriteMode::Overwrite)?;
            empty.columns().to_vec()
        }
    };

    let sample = Table::with_rows(columns, reservoir.into_items());
    write_table(&sample, sample_output, WriteMode::Overwrite)?;

    let mut snapshots = stats.snapshots();
    for (name, iqr) in IqrSummary::per_column(&sample) {
        if let Some(snapshot) = snapshots.get_mut(&name) {
            snapshot.iqr = Some(iqr);
        }
    }

    Ok(SourceOutcome {
        output: output.to_path_buf(),
        stats: SourceStats {
            rows: total_rows,
            columns: snapshots,
            sample: Some(SampleInfo {
                path: sample_output.to_path_buf(),
                rows: sample.len() as u64,
            }),
        },
    })
}

/// `pool_swaps.processed.csv` → `pool_swaps.processed.sample.csv`
pub(super) fn sample_path(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match output.extension() {
        Some(ext) => format!("{stem}.sample.{}", ext.to_string_lossy()),
        None => format!("{stem}.sample"),
    };
    output.with_file_name(name)
}

fn discard(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => warn!(path = %path.display(), "removed partial output"),
        Err(e) if e.kind() == IoErrorKind::NotFound => {}
        Err(e) => error!(path = %path.display(), "failed to remove partial output: {e}"),
    }
}
