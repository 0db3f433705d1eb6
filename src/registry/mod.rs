//! Module for the run registry: the lifecycle of every ETL run, its durable record and the single
//! error boundary around the background execution.

mod store;

use std::any::Any;
use std::collections::{BTreeSet, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, JoinHandle};

use tracing::{error, info, info_span, warn};

use crate::config::EngineConfig;
use crate::domain::{FailureRecord, ProgressEvent, RunId, RunRecord, RunStatus};
use crate::engine::{Engine, ProgressSink, SourceStats};
use crate::error::Error;

pub(crate) use store::RunStore;


type SharedRecord = Arc<Mutex<RunRecord>>;

/// Creates, starts and tracks runs. Cheap to clone; clones share the same run table.
///
/// Every mutation of a run is persisted before the mutating call returns. The persisted records,
/// not the in-memory table, are the state a restarted process recovers from.
#[derive(Debug, Clone)]
pub struct RunRegistry {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    engine: Engine,
    store: RunStore,
    runs: RwLock<HashMap<RunId, SharedRecord>>,
}

impl RunRegistry {
    pub fn open(config: EngineConfig) -> Result<Self, Error> {
        let store = RunStore::open(&config.runs_dir)?;
        let engine = Engine::new(config)?;
        Ok(Self {
            inner: Arc::new(Inner {
                engine,
                store,
                runs: RwLock::new(HashMap::new()),
            }),
        })
    }

    pub fn engine(&self) -> &Engine {
        &self.inner.engine
    }

    /// Registers a new `queued` run for `files` and persists it.
    pub fn create(&self, files: Vec<String>) -> Result<RunId, Error> {
        let run_id = RunId::generate();
        let record = RunRecord::new(run_id.clone(), files);
        self.inner.store.save(&record)?;
        self.inner
            .runs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(run_id.clone(), Arc::new(Mutex::new(record)));
        info!(%run_id, "run created");
        Ok(run_id)
    }

    /// Moves a queued run to `running` and executes it on its own thread. Returns as soon as the
    /// transition is persisted; the handle may be joined or dropped.
    pub fn start(&self, run_id: &RunId) -> Result<JoinHandle<()>, Error> {
        let record = self.inner.shared(run_id)?;
        {
            let mut guard = lock(&record);
            guard.mark_running()?;
            self.inner.store.save(&guard)?;
        }

        let inner = Arc::clone(&self.inner);
        let thread_run_id = run_id.clone();
        let thread_record = Arc::clone(&record);
        let spawned = thread::Builder::new()
            .name(format!("etl-run-{run_id}"))
            .spawn(move || inner.execute(&thread_run_id, &thread_record));
        match spawned {
            Ok(handle) => Ok(handle),
            Err(e) => {
                let error = Error::from(e);
                let mut guard = lock(&record);
                guard.mark_failed(FailureRecord::from_error(&error));
                self.inner.persist(&guard);
                Err(error)
            }
        }
    }

    /// The current record of `run_id`, from memory or else from durable storage.
    ///
    /// A stored record still marked `running` that this registry does not own was left behind by
    /// a process that died mid-run; it is finalized as `failed` on load.
    pub fn get(&self, run_id: &RunId) -> Result<RunRecord, Error> {
        if let Some(record) = self.inner.in_memory(run_id) {
            return Ok(lock(&record).clone());
        }
        let mut record = self
            .inner
            .store
            .load(run_id)?
            .ok_or_else(|| Error::RunNotFound(run_id.clone()))?;
        if record.status == RunStatus::Running {
            warn!(%run_id, "stored run was interrupted, marking it failed");
            record.mark_failed(FailureRecord::runtime(
                "interrupted: the process executing the run stopped before it completed",
            ));
            self.inner.store.save(&record)?;
        }
        Ok(record)
    }

    /// Identifiers of all known runs, in memory or persisted, sorted.
    pub fn list(&self) -> Result<Vec<RunId>, Error> {
        let mut ids: BTreeSet<RunId> = self.inner.store.ids()?.into_iter().collect();
        ids.extend(
            self.inner
                .runs
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .keys()
                .cloned(),
        );
        Ok(ids.into_iter().collect())
    }
}

impl Inner {
    fn in_memory(&self, run_id: &RunId) -> Option<SharedRecord> {
        self.runs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(run_id)
            .cloned()
    }

    /// The in-memory record of `run_id`, adopting a stored one if this registry has not seen it.
    fn shared(&self, run_id: &RunId) -> Result<SharedRecord, Error> {
        if let Some(record) = self.in_memory(run_id) {
            return Ok(record);
        }
        let record = self
            .store
            .load(run_id)?
            .ok_or_else(|| Error::RunNotFound(run_id.clone()))?;
        let mut runs = self.runs.write().unwrap_or_else(PoisonError::into_inner);
        Ok(Arc::clone(
            runs.entry(run_id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(record))),
        ))
    }

    fn execute(&self, run_id: &RunId, record: &Mutex<RunRecord>) {
        let _span = info_span!("run", %run_id).entered();
        info!("run started");

        let mut sink = RecordSink {
            record,
            store: &self.store,
        };
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.engine.run(run_id, &mut sink)
        }));

        let mut guard = lock(record);
        finalize(&mut guard, outcome);
        self.persist(&guard);
    }

    /// Persists `record`, logging instead of propagating a failure. Used where the caller has no
    /// way to report one.
    fn persist(&self, record: &RunRecord) {
        if let Err(e) = self.store.save(record) {
            error!(run_id = %record.run_id, "failed to persist run record: {e}");
        }
    }
}

/// Moves a running record to its terminal state according to the outcome of the engine.
fn finalize(record: &mut RunRecord, outcome: thread::Result<Result<(), Error>>) {
    match outcome {
        Ok(Ok(())) => match record.mark_finished() {
            Ok(()) => info!("run finished"),
            Err(e) => record.mark_failed(FailureRecord::from_error(&e)),
        },
        Ok(Err(e)) => {
            error!("run failed: {e}");
            record.mark_failed(FailureRecord::from_error(&e));
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!("run panicked: {message}");
            record.mark_failed(FailureRecord::runtime(format!("panic: {message}")));
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// A panic while holding a record leaves it consistent: every mutation is a single push or
/// assignment.
fn lock(record: &Mutex<RunRecord>) -> MutexGuard<'_, RunRecord> {
    record.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Appends the engine's notifications to the run record and persists it after each one.
struct RecordSink<'a> {
    record: &'a Mutex<RunRecord>,
    store: &'a RunStore,
}

impl RecordSink<'_> {
    fn update(&self, mutate: impl FnOnce(&mut RunRecord)) {
        let (run_id, bytes) = {
            let mut guard = lock(self.record);
            mutate(&mut guard);
            (guard.run_id.clone(), RunStore::encode(&guard))
        };
        if let Err(e) = bytes.and_then(|bytes| self.store.write(&run_id, &bytes)) {
            error!(%run_id, "failed to persist run record: {e}");
        }
    }
}

impl ProgressSink for RecordSink<'_> {
    fn on_progress(&mut self, _run_id: &RunId, stage: &str, event: ProgressEvent) {
        self.update(|record| record.push_event(stage, event));
    }

    fn on_source_stats(&mut self, _run_id: &RunId, stage: &str, stats: &SourceStats) {
        match serde_json::to_value(stats) {
            Ok(value) => self.update(|record| {
                record.stats.insert(stage.to_string(), value);
            }),
            Err(e) => error!(stage, "failed to encode source statistics: {e}"),
        }
    }
}
