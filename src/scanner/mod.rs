//! Orchestrator: schedules tasks and drives them through the workers.

pub mod collaborator;
pub mod orchestrator;
pub mod schedule;
pub mod watermark;

pub use collaborator::{ProcessScanner, ScanCollaborator, ScanError, ScanReport, ScanRequest};
pub use orchestrator::{
    Orchestrator, OrchestratorSettings, RemoteWorkers, TaskError, TaskOutcome, TaskPhase,
    WorkerControl,
};
