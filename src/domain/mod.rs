//! Module for the types shared by the stages of the engine: tables and run records.

mod run;
mod table;

pub use run::{FailureRecord, Progress, ProgressEvent, RunId, RunRecord, RunStatus, SampleInfo};
pub use table::{Cell, RawTable, Table};
