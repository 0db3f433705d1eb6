mod config;
mod domain;
mod engine;
mod error;
mod input;
mod output;
mod registry;
mod stats;
mod telemetry;
mod transform;

pub use config::{
    DEFAULT_CHUNK_SIZE, DEFAULT_RESERVOIR_CAPACITY, EngineConfig, PartialOutputPolicy,
    SourceConfig, Strategy, default_sources, load_config,
};
pub use domain::{
    Cell, FailureRecord, Progress, ProgressEvent, RawTable, RunId, RunRecord, RunStatus,
    SampleInfo, Table,
};
pub use engine::{Engine, ProgressSink, SourceOutcome, SourceStats};
pub use error::{Error, ErrorKind};
pub use input::{BatchReader, read_full};
pub use output::{OutputFormat, WriteMode, write_table};
pub use registry::RunRegistry;
pub use stats::{ColumnStats, IqrSummary, Reservoir, RunningStats, StatsSnapshot};
pub use telemetry::{LogFormat, setup_logging};
pub use transform::{
    DateConvention, NumericColumns, RuleSet, ScaledRule, TemporalRule, clean_numeric,
    parse_temporal,
};

/// Runs the configured ETL sources once, in the foreground, without a run registry.
///
/// Every source is extracted, cleaned by its transform rules and written to the output directory,
/// one after the other. Progress notifications are handed to `on_progress` as they happen. The
/// first failing source aborts the run and its error is returned, tagged with the source name.
///
/// Use [`RunRegistry`] instead to run in the background with a persisted, queryable run record.
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use etl_engine::{EngineConfig, Error, ProgressEvent, RunId, run_once};
///
/// let config = EngineConfig::rooted_at(Path::new("."));
/// run_once(config, |stage: &str, event: ProgressEvent| {
///     println!("{stage}: {}", serde_json::to_string(&event).unwrap());
/// })?;
/// # Ok::<(), Error>(())
/// ```
pub fn run_once(
    config: EngineConfig,
    mut on_progress: impl FnMut(&str, ProgressEvent),
) -> Result<RunId, Error> {
    let engine = Engine::new(config)?;
    let run_id = RunId::generate();
    engine.run(&run_id, &mut |_: &RunId, stage: &str, event: ProgressEvent| {
        on_progress(stage, event)
    })?;
    Ok(run_id)
}
