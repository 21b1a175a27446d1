use serde::{Deserialize, Serialize};

use super::ObjectId;

/// Ledger status code of a completed task. Only successful tasks are
/// ever recorded, so this is the only value written today.
pub const STATUS_SUCCESS: i64 = 0;

/// One fully completed scan → build → extract cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Launch timestamp (unix seconds) identifying the task.
    pub task_id: u64,
    pub oid_start: ObjectId,
    pub oid_end: ObjectId,
    pub scanner_start: i64,
    pub builder_start: i64,
    pub extractor_start: i64,
    pub extractor_end: i64,
    pub n_scanned: u64,
    pub n_deleted: u64,
    pub n_indexed: u64,
    pub n_extracted: u64,
    pub status: i64,
}

impl TaskRecord {
    pub fn is_success(&self) -> bool {
        self.status == STATUS_SUCCESS
    }
}

/// Resumption point derived from the latest successful task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastStatus {
    pub oid_end: ObjectId,
    pub scanner_start: i64,
}
