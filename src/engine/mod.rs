//! Module for the ETL orchestration: every configured source is extracted, transformed and loaded
//! in order, either in one piece or as a stream of bounded batches.

mod chunked;

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{info, info_span};

use crate::config::{EngineConfig, SourceConfig, Strategy};
use crate::domain::{Progress, ProgressEvent, RunId, SampleInfo};
use crate::error::Error;
use crate::input;
use crate::output::{WriteMode, write_table};
use crate::stats::{ColumnStats, IqrSummary, StatsSnapshot};


/// Receiver of the notifications emitted while a run executes.
///
/// Implemented for any `FnMut(&RunId, &str, ProgressEvent)` closure, which ignores statistics.
pub trait ProgressSink {
    fn on_progress(&mut self, run_id: &RunId, stage: &str, event: ProgressEvent);

    /// Final statistics of a source, delivered right before its `finished` event.
    fn on_source_stats(&mut self, _run_id: &RunId, _stage: &str, _stats: &SourceStats) {}
}

impl<F> ProgressSink for F
where
    F: FnMut(&RunId, &str, ProgressEvent),
{
    fn on_progress(&mut self, run_id: &RunId, stage: &str, event: ProgressEvent) {
        self(run_id, stage, event)
    }
}

/// Summary of one processed source, folded into the run statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceStats {
    pub rows: u64,
    pub columns: BTreeMap<String, StatsSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample: Option<SampleInfo>,
}

/// Outcome of one source.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceOutcome {
    pub output: PathBuf,
    pub stats: SourceStats,
}

/// Runs the configured sources. Holds no state between runs.
#[derive(Debug, Clone)]
pub struct Engine {
    config: EngineConfig,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Processes every source in configuration order. The first failing source aborts the run;
    /// its error is returned tagged with the stage name and nothing is retried.
    pub fn run(&self, run_id: &RunId, sink: &mut impl ProgressSink) -> Result<(), Error> {
        fs::create_dir_all(&self.config.output_dir)?;
        for source in &self.config.sources {
            let _span = info_span!("stage", stage = %source.name).entered();
            self.run_source(run_id, source, sink)
                .map_err(|e| e.in_stage(&source.name))?;
        }
        Ok(())
    }

    fn run_source(
        &self,
        run_id: &RunId,
        source: &SourceConfig,
        sink: &mut impl ProgressSink,
    ) -> Result<SourceOutcome, Error> {
        sink.on_progress(run_id, &source.name, ProgressEvent::now(Progress::Started));

        let outcome = match source.strategy {
            Strategy::Full => self.run_full(source)?,
            Strategy::Chunked { .. } => chunked::process(&self.config, source, run_id, sink)?,
        };
        info!(
            output = %outcome.output.display(),
            rows = outcome.stats.rows,
            "source processed"
        );

        sink.on_source_stats(run_id, &source.name, &outcome.stats);
        sink.on_progress(
            run_id,
            &source.name,
            ProgressEvent::now(Progress::Finished {
                output: outcome.output.clone(),
                rows: outcome.stats.rows,
                sample: outcome.stats.sample.clone(),
            }),
        );
        Ok(outcome)
    }

    fn run_full(&self, source: &SourceConfig) -> Result<SourceOutcome, Error> {
        let raw = input::read_full(&self.config.source_path(source))?;
        let table = source.rules.apply(&source.name, &raw)?;
        drop(raw);

        let mut stats = ColumnStats::default();
        stats.observe(&table);
        let mut columns = stats.snapshots();
        for (name, iqr) in IqrSummary::per_column(&table) {
            if let Some(snapshot) = columns.get_mut(&name) {
                snapshot.iqr = Some(iqr);
            }
        }

        let output = write_table(
            &table,
            &self.config.output_path(source),
            WriteMode::Overwrite,
        )?;
        Ok(SourceOutcome {
            output,
            stats: SourceStats {
                rows: table.len() as u64,
                columns,
                sample: None,
            },
        })
    }
}
