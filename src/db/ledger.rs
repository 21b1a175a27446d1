//! Job ledger: append-only record of completed tasks.
//!
//! Separate SQLite file at `<workdir>/ledger.db`, owned by the scanner.
//! Only fully successful tasks are written, once each, so the highest
//! recorded `oid_end` is the resumption watermark for the next scan.
//! Rows are never updated or deleted.

use std::path::Path;
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};

use super::sqlite::{apply_migrations, configure_pragmas, Migrations, DEFAULT_BUSY_TIMEOUT};
use super::DatabaseError;
use crate::models::{LastStatus, ObjectId, TaskRecord, STATUS_SUCCESS};

const LEDGER_MIGRATIONS: &Migrations = &[
    (1, include_str!("../../resources/ledger_migrations/001_task_ledger.sql")),
];

pub struct JobLedger {
    conn: Connection,
}

impl JobLedger {
    /// Open (or create) the ledger file and run migrations.
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self, DatabaseError> {
        let conn = Connection::open(path)?;
        configure_pragmas(&conn, busy_timeout)?;
        apply_migrations(&conn, LEDGER_MIGRATIONS)?;
        Ok(Self { conn })
    }

    /// Open an in-memory ledger (for testing).
    pub fn open_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        configure_pragmas(&conn, DEFAULT_BUSY_TIMEOUT)?;
        apply_migrations(&conn, LEDGER_MIGRATIONS)?;
        Ok(Self { conn })
    }

    /// Highest `oid_end` among successful tasks, `None` if there are none.
    pub fn latest_oid_end(&self) -> Result<Option<ObjectId>, DatabaseError> {
        let oid = self.conn.query_row(
            "SELECT MAX(oid_end) FROM task_record WHERE status = ?1",
            params![STATUS_SUCCESS],
            |row| row.get::<_, Option<ObjectId>>(0),
        )?;
        Ok(oid)
    }

    /// `oid_end` and `scanner_start` of the most recent successful task.
    pub fn last_status(&self) -> Result<Option<LastStatus>, DatabaseError> {
        let status = self
            .conn
            .query_row(
                "SELECT oid_end, scanner_start FROM task_record
                 WHERE status = ?1 ORDER BY id DESC LIMIT 1",
                params![STATUS_SUCCESS],
                |row| {
                    Ok(LastStatus {
                        oid_end: row.get(0)?,
                        scanner_start: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(status)
    }

    /// Page of history, newest first.
    pub fn fetch_history(&self, offset: u64, count: u64) -> Result<Vec<TaskRecord>, DatabaseError> {
        let mut stmt = self.conn.prepare(
            "SELECT task_id, oid_start, oid_end,
             scanner_start, builder_start, extractor_start, extractor_end,
             n_scanned, n_deleted, n_indexed, n_extracted, status
             FROM task_record ORDER BY id DESC LIMIT ?1 OFFSET ?2",
        )?;
        let records = stmt
            .query_map(params![count, offset], |row| {
                Ok(TaskRecord {
                    task_id: row.get(0)?,
                    oid_start: row.get(1)?,
                    oid_end: row.get(2)?,
                    scanner_start: row.get(3)?,
                    builder_start: row.get(4)?,
                    extractor_start: row.get(5)?,
                    extractor_end: row.get(6)?,
                    n_scanned: row.get(7)?,
                    n_deleted: row.get(8)?,
                    n_indexed: row.get(9)?,
                    n_extracted: row.get(10)?,
                    status: row.get(11)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub fn count(&self) -> Result<u64, DatabaseError> {
        let n = self
            .conn
            .query_row("SELECT COUNT(*) FROM task_record", [], |row| row.get(0))?;
        Ok(n)
    }

    /// Append one completed task. Rejects records whose oid range or phase
    /// timestamps are out of order, and a second record for the same task.
    pub fn record(&self, task: &TaskRecord) -> Result<(), DatabaseError> {
        if task.oid_start > task.oid_end {
            return Err(DatabaseError::ConstraintViolation(format!(
                "task {}: oid_start {} > oid_end {}",
                task.task_id, task.oid_start, task.oid_end
            )));
        }
        let stamps = [
            task.scanner_start,
            task.builder_start,
            task.extractor_start,
            task.extractor_end,
        ];
        if stamps.windows(2).any(|w| w[0] > w[1]) {
            return Err(DatabaseError::ConstraintViolation(format!(
                "task {}: phase timestamps out of order {stamps:?}",
                task.task_id
            )));
        }

        self.conn.execute(
            "INSERT INTO task_record (task_id, oid_start, oid_end,
             scanner_start, builder_start, extractor_start, extractor_end,
             n_scanned, n_deleted, n_indexed, n_extracted, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                task.task_id,
                task.oid_start,
                task.oid_end,
                task.scanner_start,
                task.builder_start,
                task.extractor_start,
                task.extractor_end,
                task.n_scanned,
                task.n_deleted,
                task.n_indexed,
                task.n_extracted,
                task.status,
            ],
        )?;
        tracing::info!(
            task_id = task.task_id,
            oid_end = task.oid_end,
            n_indexed = task.n_indexed,
            n_extracted = task.n_extracted,
            "Task recorded in ledger"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(task_id: u64, oid_start: u64, oid_end: u64) -> TaskRecord {
        let t = task_id as i64;
        TaskRecord {
            task_id,
            oid_start,
            oid_end,
            scanner_start: t,
            builder_start: t + 10,
            extractor_start: t + 20,
            extractor_end: t + 30,
            n_scanned: 5,
            n_deleted: 1,
            n_indexed: 5,
            n_extracted: 2,
            status: STATUS_SUCCESS,
        }
    }

    #[test]
    fn empty_ledger_has_no_watermark() {
        let ledger = JobLedger::open_memory().unwrap();
        assert_eq!(ledger.latest_oid_end().unwrap(), None);
        assert_eq!(ledger.last_status().unwrap(), None);
        assert!(ledger.fetch_history(0, 10).unwrap().is_empty());
    }

    #[test]
    fn watermark_tracks_latest_success() {
        let ledger = JobLedger::open_memory().unwrap();
        ledger.record(&record(1000, 0, 500)).unwrap();
        ledger.record(&record(2000, 500, 900)).unwrap();

        assert_eq!(ledger.latest_oid_end().unwrap(), Some(900));
        assert_eq!(
            ledger.last_status().unwrap(),
            Some(LastStatus {
                oid_end: 900,
                scanner_start: 2000
            })
        );
    }

    #[test]
    fn failed_rows_ignored_by_watermark() {
        let ledger = JobLedger::open_memory().unwrap();
        ledger.record(&record(1000, 0, 500)).unwrap();
        let mut failed = record(2000, 500, 9000);
        failed.status = 1;
        ledger.record(&failed).unwrap();

        assert_eq!(ledger.latest_oid_end().unwrap(), Some(500));
        assert_eq!(ledger.last_status().unwrap().unwrap().scanner_start, 1000);
    }

    #[test]
    fn duplicate_task_rejected() {
        let ledger = JobLedger::open_memory().unwrap();
        ledger.record(&record(1000, 0, 500)).unwrap();
        assert!(ledger.record(&record(1000, 0, 500)).is_err());
        assert_eq!(ledger.count().unwrap(), 1);
    }

    #[test]
    fn inverted_oid_range_rejected() {
        let ledger = JobLedger::open_memory().unwrap();
        let err = ledger.record(&record(1000, 600, 500)).unwrap_err();
        assert!(matches!(err, DatabaseError::ConstraintViolation(_)));
        assert_eq!(ledger.count().unwrap(), 0);
    }

    #[test]
    fn unordered_timestamps_rejected() {
        let ledger = JobLedger::open_memory().unwrap();
        let mut bad = record(1000, 0, 500);
        bad.extractor_start = bad.extractor_end + 1;
        assert!(matches!(
            ledger.record(&bad),
            Err(DatabaseError::ConstraintViolation(_))
        ));
    }

    #[test]
    fn history_pages_are_contiguous_newest_first() {
        let ledger = JobLedger::open_memory().unwrap();
        for i in 0..25u64 {
            ledger.record(&record(1000 + i, i * 10, i * 10 + 10)).unwrap();
        }

        let first = ledger.fetch_history(0, 10).unwrap();
        let second = ledger.fetch_history(10, 10).unwrap();
        let whole = ledger.fetch_history(0, 20).unwrap();

        assert_eq!(first.len(), 10);
        assert_eq!(second.len(), 10);
        assert_eq!(first[0].task_id, 1024);
        let joined: Vec<_> = first.into_iter().chain(second).collect();
        assert_eq!(joined, whole);
        assert!(whole.windows(2).all(|w| w[0].task_id > w[1].task_id));
    }

    #[test]
    fn history_past_end_is_empty() {
        let ledger = JobLedger::open_memory().unwrap();
        ledger.record(&record(1000, 0, 1)).unwrap();
        assert!(ledger.fetch_history(5, 10).unwrap().is_empty());
    }

    #[test]
    fn ledger_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        {
            let ledger = JobLedger::open(&path, DEFAULT_BUSY_TIMEOUT).unwrap();
            ledger.record(&record(1000, 0, 77)).unwrap();
        }
        let ledger = JobLedger::open(&path, DEFAULT_BUSY_TIMEOUT).unwrap();
        assert_eq!(ledger.latest_oid_end().unwrap(), Some(77));
    }
}
