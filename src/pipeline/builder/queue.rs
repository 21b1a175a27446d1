//! Work-queue fill, run after the ingestion transaction commits.
//!
//! This step is outside the ingestion transaction. A crash between commit
//! and the end of the fill leaves the store updated but the queue short,
//! and the scanner will still record the task once the extractor drains
//! whatever was queued. Re-running the same task id rebuilds the queue
//! from scratch.

use std::path::Path;

use rusqlite::{params, Connection};

use super::error::BuildError;
use crate::db::work_queue::{WorkItem, WorkQueue};
use crate::extfilter::ExtensionFilter;
use crate::models::{S_IFMT, S_IFREG};

/// Objects staged by this run that are worth extracting: valid, non-empty
/// regular files no larger than `max_file_size` with an allowed extension.
pub fn select_candidates(
    conn: &Connection,
    filter: &ExtensionFilter,
    max_file_size: u64,
) -> Result<Vec<WorkItem>, BuildError> {
    let mut stmt = conn.prepare(
        "SELECT o.oid, p.path FROM temp.staged_object s
         JOIN indexed_object o ON o.oid = s.oid
         JOIN object_path p ON p.oid = o.oid
         WHERE o.valid = 1
           AND o.st_size > 0
           AND o.st_size <= ?1
           AND (o.st_mode & ?2) = ?3
         ORDER BY o.oid",
    )?;
    let rows = stmt.query_map(params![max_file_size, S_IFMT, S_IFREG], |row| {
        Ok(WorkItem {
            oid: row.get(0)?,
            path: row.get(1)?,
        })
    })?;

    let mut items = Vec::new();
    for row in rows {
        let item = row?;
        if filter.matches_path(&item.path) {
            items.push(item);
        }
    }
    Ok(items)
}

/// Write a fresh work queue at `queue_path` holding this run's candidates.
pub fn fill_work_queue(
    conn: &Connection,
    queue_path: &Path,
    filter: &ExtensionFilter,
    max_file_size: u64,
) -> Result<u64, BuildError> {
    let items = select_candidates(conn, filter, max_file_size)?;
    let mut queue = WorkQueue::create(queue_path)?;
    let n = queue.append(&items)? as u64;
    tracing::info!(n_queued = n, queue = %queue_path.display(), "Work queue written");
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_database;
    use std::time::Duration;

    fn seed(conn: &Connection) {
        // oid, mode, size, valid, path
        let rows: &[(u64, u32, u64, bool, &str)] = &[
            (1, S_IFREG | 0o644, 2048, true, "/p/report.pdf"),
            (2, S_IFREG | 0o644, 0, true, "/p/empty.pdf"),
            (3, S_IFREG | 0o644, 2048, false, "/p/gone.pdf"),
            (4, S_IFREG | 0o644, 2048, true, "/p/image.raw"),
            (5, 0o040755, 512, true, "/p/dir.pdf"),
            (6, S_IFREG | 0o644, 10_000, true, "/p/huge.pdf"),
            (7, S_IFREG | 0o644, 10, true, "/p/Notes.TXT"),
        ];
        conn.execute_batch("CREATE TEMP TABLE staged_object (oid INTEGER PRIMARY KEY);")
            .unwrap();
        for &(oid, mode, size, valid, path) in rows {
            conn.execute(
                "INSERT INTO indexed_object (oid, st_dev, st_mode, st_nlink, st_uid, st_gid,
                 st_rdev, st_size, st_blksize, st_blocks, st_atime, st_mtime, st_ctime, valid)
                 VALUES (?1, 44, ?2, 1, 0, 0, 0, ?3, 512, 0, 0, 0, 0, ?4)",
                params![oid, mode, size, valid],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO object_path (oid, path) VALUES (?1, ?2)",
                params![oid, path],
            )
            .unwrap();
            conn.execute("INSERT INTO temp.staged_object (oid) VALUES (?1)", params![oid])
                .unwrap();
        }
        // Object not staged in this run never qualifies
        conn.execute(
            "INSERT INTO indexed_object (oid, st_dev, st_mode, st_nlink, st_uid, st_gid,
             st_rdev, st_size, st_blksize, st_blocks, st_atime, st_mtime, st_ctime)
             VALUES (8, 44, ?1, 1, 0, 0, 0, 100, 512, 1, 0, 0, 0)",
            params![S_IFREG | 0o644],
        )
        .unwrap();
        conn.execute("INSERT INTO object_path (oid, path) VALUES (8, '/p/old.pdf')", [])
            .unwrap();
    }

    #[test]
    fn only_eligible_files_selected() {
        let conn = open_memory_database().unwrap();
        seed(&conn);
        let filter = ExtensionFilter::parse("pdf\ntxt\n");

        let items = select_candidates(&conn, &filter, 5000).unwrap();
        let oids: Vec<_> = items.iter().map(|i| i.oid).collect();
        assert_eq!(oids, vec![1, 7]);
    }

    #[test]
    fn fill_writes_queue_file() {
        let conn = open_memory_database().unwrap();
        seed(&conn);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("builder.1.db");

        let n = fill_work_queue(&conn, &path, &ExtensionFilter::parse("pdf\n"), 1 << 20).unwrap();
        assert_eq!(n, 2); // report.pdf and huge.pdf

        let queue = WorkQueue::open_read(&path, Duration::from_secs(1)).unwrap();
        assert_eq!(queue.total_count().unwrap(), 2);
        assert_eq!(queue.fetch(0, 1).unwrap()[0].path, "/p/report.pdf");
    }
}
