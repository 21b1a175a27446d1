//! Builder and extractor daemons.
//!
//! Both serve the same session type; only the phase behind `run` differs.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;

use super::DaemonError;
use crate::config::Config;
use crate::control::client::connect_with_retry;
use crate::control::{
    start_control_server, Admission, ControlClient, ControlError, ControlHandler, ControlRequest,
    ControlResponse, SingleFlight, TaskId, WorkerId,
};
use crate::pipeline::builder::{Builder, BuilderSettings};
use crate::pipeline::extractor::{Extractor, ExtractorSettings, TikaClient};
use crate::workdir::WorkDir;

/// Attempts at announcing a worker to the scanner before giving up.
pub const CONNECT_ATTEMPTS: u32 = 5;
const CONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// The phase a worker runs for a task.
pub trait PhaseRunner: Send + Sync + 'static {
    fn worker(&self) -> WorkerId;

    /// Run the phase for `task_id`; returns indexed or extracted files.
    fn run_phase(&self, task_id: TaskId) -> Result<u64, ControlError>;
}

pub struct BuilderPhase {
    builder: Builder,
    workdir: WorkDir,
}

impl BuilderPhase {
    pub fn new(builder: Builder, workdir: WorkDir) -> Self {
        Self { builder, workdir }
    }
}

impl PhaseRunner for BuilderPhase {
    fn worker(&self) -> WorkerId {
        WorkerId::Builder
    }

    fn run_phase(&self, task_id: TaskId) -> Result<u64, ControlError> {
        self.builder
            .run(&self.workdir.data_dir(task_id), task_id)
            .map(|summary| summary.n_indexed)
            .map_err(|e| ControlError::TaskFailed {
                task_id,
                reason: e.to_string(),
            })
    }
}

pub struct ExtractorPhase {
    extractor: Extractor<TikaClient>,
    workdir: WorkDir,
}

impl ExtractorPhase {
    pub fn new(extractor: Extractor<TikaClient>, workdir: WorkDir) -> Self {
        Self { extractor, workdir }
    }
}

impl PhaseRunner for ExtractorPhase {
    fn worker(&self) -> WorkerId {
        WorkerId::Extractor
    }

    fn run_phase(&self, task_id: TaskId) -> Result<u64, ControlError> {
        let nthreads = self.extractor.settings().nthreads;
        self.extractor
            .run(&self.workdir.work_queue_path(task_id), nthreads)
            .map(|summary| summary.n_extracted)
            .map_err(|e| ControlError::TaskFailed {
                task_id,
                reason: e.to_string(),
            })
    }
}

// ═══════════════════════════════════════════════════════════
// Session
// ═══════════════════════════════════════════════════════════

/// Per-process worker state shared with the control endpoint.
pub struct WorkerSession {
    runner: Box<dyn PhaseRunner>,
    flight: SingleFlight,
    shutdown: watch::Sender<bool>,
}

impl WorkerSession {
    pub fn new(runner: Box<dyn PhaseRunner>, shutdown: watch::Sender<bool>) -> Self {
        Self {
            runner,
            flight: SingleFlight::new(),
            shutdown,
        }
    }

    fn run(&self, task_id: TaskId) -> Result<ControlResponse, ControlError> {
        let guard = match self.flight.begin(task_id)? {
            Admission::Duplicate { task_id, count } => {
                return Ok(ControlResponse::Duplicate { task_id, count })
            }
            Admission::Proceed(guard) => guard,
        };

        let worker = self.runner.worker();
        let span = tracing::info_span!("phase", %worker, task_id = %task_id);
        let _enter = span.enter();
        tracing::info!("Phase started");
        let started = Instant::now();

        match self.runner.run_phase(task_id) {
            Ok(count) => {
                guard.complete(count);
                tracing::info!(count, elapsed_secs = started.elapsed().as_secs(), "Phase finished");
                Ok(ControlResponse::Completed { count })
            }
            Err(e) => {
                tracing::error!(error = %e, "Phase failed");
                Err(e)
            }
        }
    }
}

impl ControlHandler for WorkerSession {
    fn role(&self) -> &'static str {
        match self.runner.worker() {
            WorkerId::Builder => "builder",
            WorkerId::Extractor => "extractor",
            WorkerId::Unknown => "worker",
        }
    }

    fn handle(&self, request: ControlRequest) -> Result<ControlResponse, ControlError> {
        match request {
            ControlRequest::Run { task_id } => self.run(task_id),
            ControlRequest::Connect { .. } => Err(ControlError::Unsupported {
                role: self.role(),
                op: "connect",
            }),
            ControlRequest::Alive => Ok(ControlResponse::Ok),
            ControlRequest::Terminate => {
                tracing::info!(role = self.role(), "Terminate requested");
                self.shutdown.send_replace(true);
                Ok(ControlResponse::Ok)
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Daemon
// ═══════════════════════════════════════════════════════════

fn build_runner(config: &Config, worker: WorkerId) -> Result<Box<dyn PhaseRunner>, DaemonError> {
    let workdir = WorkDir::new(&config.workdir);
    match worker {
        WorkerId::Builder => Ok(Box::new(BuilderPhase::new(
            Builder::new(BuilderSettings::from_config(config)),
            workdir,
        ))),
        WorkerId::Extractor => {
            let tika = TikaClient::new(&config.tika.url, config.tika.timeout_secs)
                .map_err(|e| DaemonError::Startup(e.to_string()))?;
            Ok(Box::new(ExtractorPhase::new(
                Extractor::new(ExtractorSettings::from_config(config), tika),
                workdir,
            )))
        }
        WorkerId::Unknown => Err(DaemonError::Startup("unknown worker role".into())),
    }
}

fn control_addr(config: &Config, worker: WorkerId) -> &str {
    match worker {
        WorkerId::Extractor => &config.extractor.addr,
        _ => &config.builder.addr,
    }
}

/// Serve `worker`'s role until terminated.
pub async fn run_worker(config: Config, worker: WorkerId) -> Result<(), DaemonError> {
    let runner = {
        let config = config.clone();
        tokio::task::spawn_blocking(move || build_runner(&config, worker)).await??
    };

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let session = Arc::new(WorkerSession::new(runner, shutdown_tx));
    let addr = control_addr(&config, worker).to_string();
    let server = start_control_server(&addr, session)
        .await
        .map_err(|source| DaemonError::Bind { addr, source })?;

    let scanner_url = Config::control_url(&config.scanner.addr);
    let announced = tokio::task::spawn_blocking(move || {
        let client = ControlClient::new(&scanner_url)?;
        connect_with_retry(&client, worker, CONNECT_ATTEMPTS, CONNECT_BACKOFF)
    })
    .await?;
    if let Err(e) = announced {
        tracing::error!(%worker, error = %e, "Could not reach scanner");
        server.stop().await;
        return Err(e.into());
    }

    let mut term = signal(SignalKind::terminate()).map_err(DaemonError::Signal)?;
    tokio::select! {
        _ = shutdown_rx.changed() => {}
        _ = term.recv() => tracing::info!(%worker, "SIGTERM received"),
        _ = tokio::signal::ctrl_c() => tracing::info!(%worker, "Interrupt received"),
    }

    tracing::info!(%worker, "Worker shutting down");
    server.stop().await;
    Ok(())
}
