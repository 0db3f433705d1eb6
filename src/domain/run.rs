//! Module defining the run record, its lifecycle states and the progress events it accumulates

use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, ErrorKind};

/// Opaque identifier of a run
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RunId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RunId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    Finished,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Finished | RunStatus::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Finished => "finished",
            RunStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Stage-specific payload of a progress event, tagged by its `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Progress {
    Started,
    ChunkProcessed {
        chunk_index: u64,
        chunk_rows: u64,
        total_rows: u64,
    },
    Finished {
        output: PathBuf,
        rows: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sample: Option<SampleInfo>,
    },
}

/// Location and size of the reservoir sample written for a streamed source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleInfo {
    pub path: PathBuf,
    pub rows: u64,
}

/// Immutable record of one progress notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub progress: Progress,
}

impl ProgressEvent {
    pub fn now(progress: Progress) -> Self {
        Self {
            ts: Utc::now(),
            progress,
        }
    }
}

/// Diagnostic description of an error that ended a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub kind: ErrorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<String>,
}

impl FailureRecord {
    pub fn from_error(error: &Error) -> Self {
        let mut causes = Vec::new();
        let mut source = StdError::source(error);
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }
        Self {
            kind: error.kind(),
            stage: error.stage().map(str::to_string),
            message: error.to_string(),
            causes,
        }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Runtime,
            stage: None,
            message: message.into(),
            causes: Vec::new(),
        }
    }
}

/// The observable state of one ETL execution.
///
/// `started_at` is set iff the status is not `queued`, `finished_at` iff the status is terminal.
/// Mutations go through the transition methods below, which keep these invariants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub files: Vec<String>,
    pub stages: BTreeMap<String, Vec<ProgressEvent>>,
    pub errors: Vec<FailureRecord>,
    pub stats: BTreeMap<String, serde_json::Value>,
}

impl RunRecord {
    pub fn new(run_id: RunId, files: Vec<String>) -> Self {
        Self {
            run_id,
            status: RunStatus::Queued,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            files,
            stages: BTreeMap::new(),
            errors: Vec::new(),
            stats: BTreeMap::new(),
        }
    }

    pub(crate) fn mark_running(&mut self) -> Result<(), Error> {
        self.ensure_status(RunStatus::Queued, RunStatus::Running)?;
        self.status = RunStatus::Running;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    pub(crate) fn mark_finished(&mut self) -> Result<(), Error> {
        self.ensure_status(RunStatus::Running, RunStatus::Finished)?;
        self.status = RunStatus::Finished;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Records the failure and finalizes the run. A queued run that fails before starting gets
    /// its start time too, so that the timestamp invariants hold.
    pub(crate) fn mark_failed(&mut self, failure: FailureRecord) {
        let now = Utc::now();
        self.errors.push(failure);
        if self.status.is_terminal() {
            return;
        }
        self.started_at.get_or_insert(now);
        self.status = RunStatus::Failed;
        self.finished_at = Some(now);
    }

    pub(crate) fn push_event(&mut self, stage: &str, event: ProgressEvent) {
        self.stages.entry(stage.to_string()).or_default().push(event);
    }

    fn ensure_status(&self, expected: RunStatus, to: RunStatus) -> Result<(), Error> {
        if self.status == expected {
            Ok(())
        } else {
            Err(Error::InvalidTransition {
                run_id: self.run_id.clone(),
                from: self.status,
                to,
            })
        }
    }
}
