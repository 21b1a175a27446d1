//! Task-scoped work queue of content-extraction candidates.
//!
//! One SQLite file per task (`builder.<task>.db`), written once by the
//! builder and then read concurrently by extractor threads, each through its
//! own read-only connection. Entries are consumed by position range and
//! never removed, so a queue can be dispatched again.

use std::path::Path;
use std::time::Duration;

use rusqlite::{params, Connection, OpenFlags};
use serde::{Deserialize, Serialize};

use super::DatabaseError;
use crate::models::ObjectId;

const QUEUE_SCHEMA: &str = "
CREATE TABLE work_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    oid INTEGER NOT NULL,
    path TEXT NOT NULL
);";

/// A file to extract, as appended by the builder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub oid: ObjectId,
    pub path: String,
}

/// A stored queue entry with its insertion id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkQueueEntry {
    pub id: i64,
    pub oid: ObjectId,
    pub path: String,
}

pub struct WorkQueue {
    conn: Connection,
}

impl WorkQueue {
    /// Create a fresh, empty queue at `path`, replacing any previous file.
    pub fn create(path: &Path) -> Result<Self, DatabaseError> {
        match std::fs::remove_file(path) {
            Ok(()) => tracing::warn!(path = %path.display(), "Replacing existing work queue"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(QUEUE_SCHEMA)?;
        Ok(Self { conn })
    }

    /// Open an existing queue for reading. Fails if the file is missing.
    pub fn open_read(path: &Path, busy_timeout: Duration) -> Result<Self, DatabaseError> {
        if !path.exists() {
            return Err(DatabaseError::NotFound {
                entity_type: "work queue".into(),
                id: path.display().to_string(),
            });
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(busy_timeout)?;
        Ok(Self { conn })
    }

    /// In-memory queue (for testing).
    pub fn create_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(QUEUE_SCHEMA)?;
        Ok(Self { conn })
    }

    /// Append a batch in insertion order, atomically.
    pub fn append(&mut self, items: &[WorkItem]) -> Result<usize, DatabaseError> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare("INSERT INTO work_queue (oid, path) VALUES (?1, ?2)")?;
            for item in items {
                stmt.execute(params![item.oid, item.path])?;
            }
        }
        tx.commit()?;
        Ok(items.len())
    }

    pub fn total_count(&self) -> Result<u64, DatabaseError> {
        let n = self
            .conn
            .query_row("SELECT COUNT(*) FROM work_queue", [], |row| row.get(0))?;
        Ok(n)
    }

    /// Entries at positions `[offset, offset + count)` in insertion order.
    pub fn fetch(&self, offset: u64, count: u64) -> Result<Vec<WorkQueueEntry>, DatabaseError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, oid, path FROM work_queue ORDER BY id ASC LIMIT ?1 OFFSET ?2",
        )?;
        let entries = stmt
            .query_map(params![count, offset], |row| {
                Ok(WorkQueueEntry {
                    id: row.get(0)?,
                    oid: row.get(1)?,
                    path: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}
