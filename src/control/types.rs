//! Control protocol messages.
//!
//! Every daemon answers the same closed request set on `POST /control`;
//! what a request does depends on the role serving it. Only small scalars
//! travel here. Bulk data moves through the shared work directory and
//! the primary store.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Task identifier: the task's launch time in unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(u64);

impl TaskId {
    pub const fn new(secs: u64) -> Self {
        Self(secs)
    }

    pub fn as_secs(self) -> u64 {
        self.0
    }

    /// Task id for a launch at the current wall-clock second.
    pub fn now() -> Self {
        Self(chrono::Utc::now().timestamp().max(0) as u64)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

/// Worker roles that register with the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerId {
    Builder,
    Extractor,
    /// Any id this scanner does not know; logged and otherwise ignored.
    #[serde(other)]
    Unknown,
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Builder => write!(f, "builder"),
            Self::Extractor => write!(f, "extractor"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ControlRequest {
    /// A worker announces itself to the scanner after startup.
    Connect { worker: WorkerId },
    /// Run the serving role's phase for a task.
    Run { task_id: TaskId },
    /// Liveness probe.
    Alive,
    /// Stop serving and exit.
    Terminate,
}

impl ControlRequest {
    pub fn op_name(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect",
            Self::Run { .. } => "run",
            Self::Alive => "alive",
            Self::Terminate => "terminate",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ControlResponse {
    Ok,
    /// Phase finished; `count` is indexed (builder) or extracted (extractor) files.
    Completed { count: u64 },
    /// The task was already running or already ran here; not re-executed.
    /// `count` is its result if it has finished.
    Duplicate { task_id: TaskId, count: Option<u64> },
    /// Scanner accepted a manual trigger; the task runs asynchronously.
    Accepted,
}
