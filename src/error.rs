//! Module defining the errors which are exposed to the users of the crate

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::domain::{RunId, RunStatus};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed CSV input (ragged rows, invalid UTF-8, ...)
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A run record could not be (de)serialized
    #[error("run record serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("arrow error: {0}")]
    Arrow(#[from] arrow_schema::ArrowError),

    #[error("configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// A column required by the transform rules of a source is absent from its input
    #[error("structural error in source {source_name}: required column '{column}' is missing")]
    MissingColumn { source_name: String, column: String },

    /// The destination format cannot be appended to
    #[error("append mode is not supported for {}", path.display())]
    UnsupportedAppend { path: PathBuf },

    /// An error raised while processing one source, tagged with its stage name
    #[error("stage {stage} failed: {source}")]
    Stage { stage: String, source: Box<Error> },

    #[error("invalid setting: {0}")]
    InvalidSetting(String),

    #[error("run {0} not found")]
    RunNotFound(RunId),

    #[error("run {run_id} cannot move from {from} to {to}")]
    InvalidTransition {
        run_id: RunId,
        from: RunStatus,
        to: RunStatus,
    },
}

/// Coarse classification of an [`Error`], recorded on failed runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The input or configuration does not have the expected shape
    Structural,
    /// Everything else: I/O failures, encoding problems, panics
    Runtime,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Stage { source, .. } => source.kind(),
            Error::MissingColumn { .. }
            | Error::UnsupportedAppend { .. }
            | Error::InvalidSetting(_)
            | Error::Config(_) => ErrorKind::Structural,
            _ => ErrorKind::Runtime,
        }
    }

    /// Name of the stage the error was raised in, if known.
    pub fn stage(&self) -> Option<&str> {
        match self {
            Error::Stage { stage, .. } => Some(stage),
            _ => None,
        }
    }

    pub(crate) fn in_stage(self, stage: &str) -> Self {
        match self {
            Error::Stage { .. } => self,
            other => Error::Stage {
                stage: stage.to_string(),
                source: Box::new(other),
            },
        }
    }
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Error::Config(Box::new(err))
    }
}

pub(crate) fn missing_column(source_name: impl Into<String>, column: impl Into<String>) -> Error {
    Error::MissingColumn {
        source_name: source_name.into(),
        column: column.into(),
    }
}

pub(crate) fn invalid_setting(message: impl Into<String>) -> Error {
    Error::InvalidSetting(message.into())
}
