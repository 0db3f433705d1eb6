//! Durable storage of run records: one pretty-printed JSON document per run under `runs_dir`.

use std::fs;
use std::io::{ErrorKind as IoErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::domain::{RunId, RunRecord};
use crate::error::Error;
use crate::output::replace_with;

const EXTENSION: &str = "json";

#[derive(Debug, Clone)]
pub(crate) struct RunStore {
    dir: PathBuf,
}

impl RunStore {
    pub(crate) fn open(dir: &Path) -> Result<Self, Error> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    /// `None` for identifiers that cannot name a file inside the store.
    pub(crate) fn path(&self, run_id: &RunId) -> Option<PathBuf> {
        let id = run_id.as_str();
        is_valid_id(id).then(|| self.dir.join(format!("{id}.{EXTENSION}")))
    }

    pub(crate) fn encode(record: &RunRecord) -> Result<Vec<u8>, Error> {
        Ok(serde_json::to_vec_pretty(record)?)
    }

    /// Replaces the stored document of `run_id` with `bytes`. Readers see either the previous
    /// document or the new one, never a mix.
    pub(crate) fn write(&self, run_id: &RunId, bytes: &[u8]) -> Result<(), Error> {
        let path = self
            .path(run_id)
            .ok_or_else(|| Error::RunNotFound(run_id.clone()))?;
        replace_with(&path, |file| {
            let mut file = file;
            file.write_all(bytes)?;
            Ok(())
        })
    }

    pub(crate) fn save(&self, record: &RunRecord) -> Result<(), Error> {
        self.write(&record.run_id, &Self::encode(record)?)
    }

    pub(crate) fn load(&self, run_id: &RunId) -> Result<Option<RunRecord>, Error> {
        let Some(path) = self.path(run_id) else {
            return Ok(None);
        };
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Identifiers of every stored run, in no particular order. Temporary files of in-flight
    /// writes are skipped.
    pub(crate) fn ids(&self) -> Result<Vec<RunId>, Error> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_none_or(|ext| ext != EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if !is_valid_id(stem) {
                continue;
            }
            ids.push(RunId::from(stem));
        }
        Ok(ids)
    }
}

/// Ids name files in the store directory, so only `[A-Za-z0-9_-]` is accepted.
fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
