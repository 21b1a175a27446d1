//! Task driver: scan → build → extract → record.
//!
//! One task at a time. A task that fails in any phase goes straight back to
//! idle without a ledger row, so the next task resumes from the same
//! watermark.

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{Local, Utc};

use super::collaborator::{ScanCollaborator, ScanError, ScanRequest};
use super::watermark::resume_point;
use crate::config::Config;
use crate::control::{ControlClient, ControlError, TaskId, WorkerId};
use crate::db::ledger::JobLedger;
use crate::db::DatabaseError;
use crate::models::{ObjectId, TaskRecord, STATUS_SUCCESS};
use crate::workdir::WorkDir;

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Worker {0} has not connected")]
    NotConnected(WorkerId),

    #[error("Ledger error: {0}")]
    Ledger(#[from] DatabaseError),

    #[error("Cannot create data directory {path}: {source}")]
    DataDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Scan failed: {0}")]
    Scan(#[from] ScanError),

    #[error("{worker} failed: {source}")]
    Worker {
        worker: WorkerId,
        #[source]
        source: ControlError,
    },

    #[error("Internal lock poisoned")]
    LockPoisoned,
}

/// Where a task is in its run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPhase {
    Idle,
    Scanning,
    Building,
    Extracting,
    Recording,
}

impl fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Scanning => "scanning",
            Self::Building => "building",
            Self::Extracting => "extracting",
            Self::Recording => "recording",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The scan found nothing new; no record written.
    NoChanges { task_id: TaskId },
    /// Every phase succeeded and the task was recorded.
    Recorded(TaskRecord),
}

// ═══════════════════════════════════════════════════════════
// Worker seam
// ═══════════════════════════════════════════════════════════

/// How the orchestrator drives its workers.
pub trait WorkerControl: Send + Sync {
    /// Run `worker`'s phase for `task_id`, returning its result count.
    fn run(&self, worker: WorkerId, task_id: TaskId, timeout: Duration) -> Result<u64, ControlError>;

    fn terminate(&self, worker: WorkerId) -> Result<(), ControlError>;
}

/// Workers reached over the control protocol.
pub struct RemoteWorkers {
    builder: ControlClient,
    extractor: ControlClient,
}

impl RemoteWorkers {
    pub fn new(builder: ControlClient, extractor: ControlClient) -> Self {
        Self { builder, extractor }
    }

    /// Must not be called from inside an async task.
    pub fn from_config(config: &Config) -> Result<Self, ControlError> {
        Ok(Self::new(
            ControlClient::new(&Config::control_url(&config.builder.addr))?,
            ControlClient::new(&Config::control_url(&config.extractor.addr))?,
        ))
    }

    fn client(&self, worker: WorkerId) -> Result<&ControlClient, ControlError> {
        match worker {
            WorkerId::Builder => Ok(&self.builder),
            WorkerId::Extractor => Ok(&self.extractor),
            WorkerId::Unknown => Err(ControlError::Internal(
                "no control address for unknown worker".into(),
            )),
        }
    }
}

impl WorkerControl for RemoteWorkers {
    fn run(&self, worker: WorkerId, task_id: TaskId, timeout: Duration) -> Result<u64, ControlError> {
        self.client(worker)?.run(task_id, timeout)
    }

    fn terminate(&self, worker: WorkerId) -> Result<(), ControlError> {
        self.client(worker)?.terminate()
    }
}

// ═══════════════════════════════════════════════════════════
// Orchestrator
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub workdir: WorkDir,
    pub first_oid: ObjectId,
    pub rpc_timeout: Duration,
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            workdir: WorkDir::new(&config.workdir),
            first_oid: config.first_oid,
            rpc_timeout: config.rpc_timeout(),
        }
    }
}

/// Last handed-out task id and phase stamp.
#[derive(Debug, Default)]
struct TaskClock {
    last_task: u64,
    last_stamp: i64,
}

pub struct Orchestrator {
    settings: OrchestratorSettings,
    ledger: Mutex<JobLedger>,
    scanner: Box<dyn ScanCollaborator>,
    workers: Box<dyn WorkerControl>,
    connected: Mutex<HashSet<WorkerId>>,
    clock: Mutex<TaskClock>,
    /// Held for the whole of a task.
    running: Mutex<()>,
}

impl Orchestrator {
    pub fn new(
        settings: OrchestratorSettings,
        ledger: JobLedger,
        scanner: Box<dyn ScanCollaborator>,
        workers: Box<dyn WorkerControl>,
    ) -> Self {
        Self {
            settings,
            ledger: Mutex::new(ledger),
            scanner,
            workers,
            connected: Mutex::new(HashSet::new()),
            clock: Mutex::new(TaskClock::default()),
            running: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Note that `worker` has come up. Unknown ids are ignored.
    pub fn mark_connected(&self, worker: WorkerId) -> Result<(), TaskError> {
        if worker == WorkerId::Unknown {
            tracing::warn!("Connect from unknown worker ignored");
            return Ok(());
        }
        let newly = self
            .connected
            .lock()
            .map_err(|_| TaskError::LockPoisoned)?
            .insert(worker);
        if newly {
            tracing::info!(%worker, "Worker connected");
        } else {
            tracing::info!(%worker, "Worker reconnected");
        }
        Ok(())
    }

    /// Workers seen since startup, builder first.
    pub fn connected_workers(&self) -> Vec<WorkerId> {
        let Ok(connected) = self.connected.lock() else {
            return Vec::new();
        };
        [WorkerId::Builder, WorkerId::Extractor]
            .into_iter()
            .filter(|w| connected.contains(w))
            .collect()
    }

    fn require_workers(&self) -> Result<(), TaskError> {
        let connected = self.connected.lock().map_err(|_| TaskError::LockPoisoned)?;
        for worker in [WorkerId::Builder, WorkerId::Extractor] {
            if !connected.contains(&worker) {
                return Err(TaskError::NotConnected(worker));
            }
        }
        Ok(())
    }

    /// Launch-time id, bumped past the previous one when launched in the
    /// same second.
    fn next_task_id(&self) -> Result<TaskId, TaskError> {
        let mut clock = self.clock.lock().map_err(|_| TaskError::LockPoisoned)?;
        let now = TaskId::now().as_secs();
        clock.last_task = now.max(clock.last_task + 1);
        Ok(TaskId::new(clock.last_task))
    }

    /// Phase timestamp that never goes backwards.
    fn stamp(&self) -> Result<i64, TaskError> {
        let mut clock = self.clock.lock().map_err(|_| TaskError::LockPoisoned)?;
        clock.last_stamp = clock.last_stamp.max(Utc::now().timestamp());
        Ok(clock.last_stamp)
    }

    fn ledger(&self) -> Result<MutexGuard<'_, JobLedger>, TaskError> {
        self.ledger.lock().map_err(|_| TaskError::LockPoisoned)
    }

    /// Run one full task. Blocks for the length of every phase.
    pub fn run_task(&self) -> Result<TaskOutcome, TaskError> {
        let _running = self.running.lock().map_err(|_| TaskError::LockPoisoned)?;
        let task_id = self.next_task_id()?;
        let span = tracing::info_span!("task", task_id = %task_id);
        let _enter = span.enter();

        let mut phase = TaskPhase::Idle;
        let result = self.drive(task_id, &mut phase);
        match &result {
            Ok(TaskOutcome::Recorded(record)) => tracing::info!(
                n_scanned = record.n_scanned,
                n_deleted = record.n_deleted,
                n_indexed = record.n_indexed,
                n_extracted = record.n_extracted,
                "Task recorded"
            ),
            Ok(TaskOutcome::NoChanges { .. }) => {
                tracing::info!("No changes since last scan, nothing recorded")
            }
            Err(e) => tracing::error!(%phase, error = %e, "Task failed, nothing recorded"),
        }
        result
    }

    fn enter(phase: &mut TaskPhase, next: TaskPhase) {
        *phase = next;
        tracing::info!(phase = %next, "Task phase");
    }

    fn drive(&self, task_id: TaskId, phase: &mut TaskPhase) -> Result<TaskOutcome, TaskError> {
        self.require_workers()?;

        let watermark = resume_point(&*self.ledger()?, self.settings.first_oid, &Local::now())?;
        let outdir = self
            .settings
            .workdir
            .ensure_data_dir(task_id)
            .map_err(|source| TaskError::DataDir {
                path: self.settings.workdir.data_dir(task_id),
                source,
            })?;

        Self::enter(phase, TaskPhase::Scanning);
        let scanner_start = self.stamp()?;
        let report = self.scanner.scan(&ScanRequest {
            watermark: watermark.oid,
            from_date: watermark.from_date,
            outdir,
            task_id,
        })?;
        tracing::info!(
            oid_start = report.oid_start,
            oid_end = report.oid_end,
            n_scanned = report.n_scanned,
            n_deleted = report.n_deleted,
            "Scan finished"
        );
        if report.is_empty() {
            *phase = TaskPhase::Idle;
            return Ok(TaskOutcome::NoChanges { task_id });
        }

        Self::enter(phase, TaskPhase::Building);
        let builder_start = self.stamp()?;
        let n_indexed = self.run_worker(WorkerId::Builder, task_id)?;

        Self::enter(phase, TaskPhase::Extracting);
        let extractor_start = self.stamp()?;
        let n_extracted = self.run_worker(WorkerId::Extractor, task_id)?;
        let extractor_end = self.stamp()?;

        Self::enter(phase, TaskPhase::Recording);
        let record = TaskRecord {
            task_id: task_id.as_secs(),
            oid_start: report.oid_start,
            oid_end: report.oid_end,
            scanner_start,
            builder_start,
            extractor_start,
            extractor_end,
            n_scanned: report.n_scanned,
            n_deleted: report.n_deleted,
            n_indexed,
            n_extracted,
            status: STATUS_SUCCESS,
        };
        self.ledger()?.record(&record)?;

        *phase = TaskPhase::Idle;
        Ok(TaskOutcome::Recorded(record))
    }

    fn run_worker(&self, worker: WorkerId, task_id: TaskId) -> Result<u64, TaskError> {
        let count = self
            .workers
            .run(worker, task_id, self.settings.rpc_timeout)
            .map_err(|source| TaskError::Worker { worker, source })?;
        tracing::info!(%worker, count, "Worker phase finished");
        Ok(count)
    }

    /// Ask every worker seen since startup to exit. Failures are logged.
    pub fn terminate_workers(&self) {
        for worker in self.connected_workers() {
            match self.workers.terminate(worker) {
                Ok(()) => tracing::info!(%worker, "Worker terminated"),
                Err(e) => tracing::warn!(%worker, error = %e, "Failed to terminate worker"),
            }
        }
    }
}
