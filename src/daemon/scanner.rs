//! Scanner daemon: arms the daily timer and runs tasks on demand.

use std::sync::Arc;

use chrono::{DateTime, Local, NaiveTime, TimeDelta};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;

use super::DaemonError;
use crate::config::Config;
use crate::control::{
    start_control_server, ControlError, ControlHandler, ControlRequest, ControlResponse,
};
use crate::db::ledger::JobLedger;
use crate::scanner::schedule::next_occurrence;
use crate::scanner::{Orchestrator, OrchestratorSettings, ProcessScanner, RemoteWorkers, TaskOutcome};

/// Requests forwarded from the control endpoint to the main flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScannerEvent {
    Trigger,
    Terminate,
}

pub struct ScannerHandler {
    orchestrator: Arc<Orchestrator>,
    events: mpsc::UnboundedSender<ScannerEvent>,
}

impl ScannerHandler {
    pub fn new(orchestrator: Arc<Orchestrator>, events: mpsc::UnboundedSender<ScannerEvent>) -> Self {
        Self {
            orchestrator,
            events,
        }
    }

    fn forward(&self, event: ScannerEvent) -> Result<(), ControlError> {
        self.events
            .send(event)
            .map_err(|_| ControlError::Internal("scanner main loop has exited".into()))
    }
}

impl ControlHandler for ScannerHandler {
    fn role(&self) -> &'static str {
        "scanner"
    }

    fn handle(&self, request: ControlRequest) -> Result<ControlResponse, ControlError> {
        match request {
            ControlRequest::Connect { worker } => {
                self.orchestrator
                    .mark_connected(worker)
                    .map_err(|e| ControlError::Internal(e.to_string()))?;
                Ok(ControlResponse::Ok)
            }
            ControlRequest::Run { task_id } => {
                // The scanner allocates its own id; the caller's is only logged
                tracing::info!(requested = %task_id, "Manual task trigger");
                self.forward(ScannerEvent::Trigger)?;
                Ok(ControlResponse::Accepted)
            }
            ControlRequest::Alive => Ok(ControlResponse::Ok),
            ControlRequest::Terminate => {
                tracing::info!("Terminate requested over control endpoint");
                self.forward(ScannerEvent::Terminate)?;
                Ok(ControlResponse::Ok)
            }
        }
    }
}

fn build_orchestrator(config: &Config) -> Result<Orchestrator, DaemonError> {
    let settings = OrchestratorSettings::from_config(config);
    let root = settings.workdir.root().to_path_buf();
    std::fs::create_dir_all(&root).map_err(|source| DaemonError::WorkDir { path: root, source })?;

    let ledger = JobLedger::open(&settings.workdir.ledger_path(), config.busy_timeout())?;
    let scanner = ProcessScanner::new(config.scanner.command.clone());
    let workers = RemoteWorkers::from_config(config)?;
    Ok(Orchestrator::new(
        settings,
        ledger,
        Box::new(scanner),
        Box::new(workers),
    ))
}

/// Sleep length until `deadline`, zero if it has passed.
fn until(deadline: &DateTime<Local>) -> std::time::Duration {
    (*deadline - Local::now()).to_std().unwrap_or_default()
}

/// Next scheduled launch strictly after a launch that fired at `fired`.
fn rearm(fired: &DateTime<Local>, at: NaiveTime) -> DateTime<Local> {
    next_occurrence(&(*fired + TimeDelta::seconds(1)), at)
}

/// Discard triggers that queued up while a task ran, so a burst of
/// requests yields a single task. Returns whether a terminate was pending.
fn drain_triggers(events: &mut mpsc::UnboundedReceiver<ScannerEvent>) -> bool {
    let mut skipped = 0u32;
    while let Ok(event) = events.try_recv() {
        match event {
            ScannerEvent::Trigger => skipped += 1,
            ScannerEvent::Terminate => return true,
        }
    }
    if skipped > 0 {
        tracing::info!(skipped, "Coalesced triggers received during the task");
    }
    false
}

/// Serve the scanner role until terminated.
pub async fn run_scanner(config: Config) -> Result<(), DaemonError> {
    let at = config.schedule_time()?;

    let orchestrator = {
        let config = config.clone();
        Arc::new(tokio::task::spawn_blocking(move || build_orchestrator(&config)).await??)
    };

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let handler = Arc::new(ScannerHandler::new(orchestrator.clone(), events_tx));
    let server = start_control_server(&config.scanner.addr, handler)
        .await
        .map_err(|source| DaemonError::Bind {
            addr: config.scanner.addr.clone(),
            source,
        })?;

    let mut usr1 = signal(SignalKind::user_defined1()).map_err(DaemonError::Signal)?;
    let mut hup = signal(SignalKind::hangup()).map_err(DaemonError::Signal)?;
    let mut term = signal(SignalKind::terminate()).map_err(DaemonError::Signal)?;

    let mut deadline = next_occurrence(&Local::now(), at);
    tracing::info!(next = %deadline.format("%Y-%m-%d %H:%M:%S"), "Scanner ready");

    loop {
        let trigger = tokio::select! {
            _ = tokio::time::sleep(until(&deadline)) => {
                let fired = deadline;
                deadline = rearm(&fired, at);
                "schedule"
            }
            _ = usr1.recv() => "SIGUSR1",
            Some(event) = events_rx.recv() => match event {
                ScannerEvent::Trigger => "control",
                ScannerEvent::Terminate => break,
            },
            _ = hup.recv() => {
                tracing::info!("SIGHUP received; configuration is only read at startup");
                continue;
            }
            _ = term.recv() => {
                tracing::info!("SIGTERM received");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupt received");
                break;
            }
        };

        tracing::info!(trigger, "Starting task");
        let orch = orchestrator.clone();
        match tokio::task::spawn_blocking(move || orch.run_task()).await {
            Ok(Ok(TaskOutcome::Recorded(record))) => {
                tracing::info!(task_id = record.task_id, "Task complete")
            }
            Ok(Ok(TaskOutcome::NoChanges { task_id })) => {
                tracing::info!(task_id = %task_id, "Task complete, nothing to index")
            }
            // Already logged with task id and phase
            Ok(Err(_)) => {}
            Err(e) => tracing::error!(error = %e, "Task panicked"),
        }
        if drain_triggers(&mut events_rx) {
            break;
        }
        tracing::info!(next = %deadline.format("%Y-%m-%d %H:%M:%S"), "Next scheduled task");
    }

    tracing::info!("Scanner shutting down");
    let orch = orchestrator.clone();
    tokio::task::spawn_blocking(move || orch.terminate_workers()).await?;
    server.stop().await;
    Ok(())
}
