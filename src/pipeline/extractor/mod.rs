//! Extractor: parallel content extraction over a task's work queue.
//!
//! The queue is split into one contiguous range per thread up front
//! (see [`partition`]). Threads share nothing mutable. Each opens its own
//! queue and store connections and touches only its own rows, so no
//! locking is needed beyond SQLite's own write serialization.
//!
//! A file that cannot be extracted is logged and skipped. Only failures to
//! set a thread up (opening its connections) fail the run.

pub mod error;
pub mod partition;
pub mod tika;

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::Connection;

pub use error::ExtractError;
pub use partition::{partition, Range};
pub use tika::{ContentExtractor, TikaClient};

use crate::config::Config;
use crate::db::work_queue::{WorkQueue, WorkQueueEntry};
use crate::db::{open_database, upsert_document};
use crate::models::Document;

#[derive(Debug, Clone)]
pub struct ExtractorSettings {
    pub database: PathBuf,
    pub busy_timeout: Duration,
    /// Archive mountpoint; queue paths are resolved beneath it.
    pub mountpoint: PathBuf,
    pub nthreads: usize,
}

impl ExtractorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            database: config.database.path.clone(),
            busy_timeout: config.busy_timeout(),
            mountpoint: config.archive.mountpoint.clone(),
            nthreads: config.extractor.nthreads,
        }
    }
}

/// Result of an extractor run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    /// Rows in the work queue.
    pub n_queued: u64,
    /// Files whose document row was written.
    pub n_extracted: u64,
}

pub struct Extractor<E: ContentExtractor> {
    settings: ExtractorSettings,
    content: E,
}

impl<E: ContentExtractor> Extractor<E> {
    pub fn new(settings: ExtractorSettings, content: E) -> Self {
        Self { settings, content }
    }

    pub fn settings(&self) -> &ExtractorSettings {
        &self.settings
    }

    /// Drain the work queue at `queue_path` with `nthreads` threads.
    pub fn run(&self, queue_path: &Path, nthreads: usize) -> Result<ExtractSummary, ExtractError> {
        if nthreads == 0 {
            return Err(ExtractError::NoThreads);
        }

        let total = WorkQueue::open_read(queue_path, self.settings.busy_timeout)?.total_count()?;
        if total == 0 {
            tracing::info!(queue = %queue_path.display(), "Work queue is empty");
            return Ok(ExtractSummary::default());
        }

        let ranges = partition(total, nthreads);
        tracing::info!(total, nthreads, "Dispatching extraction threads");

        let results: Vec<Result<u64, ExtractError>> = std::thread::scope(|scope| {
            let handles: Vec<_> = ranges
                .iter()
                .enumerate()
                .map(|(thread, &range)| {
                    scope.spawn(move || self.run_range(thread, queue_path, range))
                })
                .collect();
            handles
                .into_iter()
                .enumerate()
                .map(|(thread, handle)| {
                    handle.join().unwrap_or_else(|_| {
                        Err(ExtractError::Thread {
                            thread,
                            reason: "panicked".into(),
                        })
                    })
                })
                .collect()
        });

        let mut n_extracted = 0;
        for result in results {
            n_extracted += result?;
        }

        tracing::info!(total, n_extracted, "Extraction finished");
        Ok(ExtractSummary {
            n_queued: total,
            n_extracted,
        })
    }

    fn run_range(&self, thread: usize, queue_path: &Path, range: Range) -> Result<u64, ExtractError> {
        if range.count == 0 {
            return Ok(0);
        }
        let setup_err = |e: ExtractError| ExtractError::Thread {
            thread,
            reason: e.to_string(),
        };

        let entries = WorkQueue::open_read(queue_path, self.settings.busy_timeout)
            .and_then(|q| q.fetch(range.offset, range.count))
            .map_err(|e| setup_err(e.into()))?;
        let conn = open_database(&self.settings.database, self.settings.busy_timeout)
            .map_err(|e| setup_err(e.into()))?;

        tracing::debug!(thread, offset = range.offset, count = range.count, "Extraction thread started");

        let mut extracted = 0;
        for entry in &entries {
            match self.extract_one(&conn, entry) {
                Ok(()) => extracted += 1,
                Err(e) => tracing::warn!(
                    thread,
                    oid = entry.oid,
                    path = %entry.path,
                    error = %e,
                    "Skipping file"
                ),
            }
        }

        tracing::debug!(thread, extracted, "Extraction thread finished");
        Ok(extracted)
    }

    fn extract_one(&self, conn: &Connection, entry: &WorkQueueEntry) -> Result<(), ExtractError> {
        let path = self.resolve(&entry.path);
        let len = match std::fs::metadata(&path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ExtractError::FileNotFound(path))
            }
            Err(source) => return Err(ExtractError::Io { path, source }),
        };

        let meta = self.content.metadata(&path, len)?;
        if meta.trim().is_empty() {
            return Err(ExtractError::EmptyMetadata(path));
        }
        let text = self.content.text(&path, len)?;

        upsert_document(
            conn,
            &Document {
                oid: entry.oid,
                meta,
                text,
            },
        )?;
        Ok(())
    }

    /// On-storage location of an archive path.
    pub fn resolve(&self, archive_path: &str) -> PathBuf {
        self.settings
            .mountpoint
            .join(archive_path.trim_start_matches('/'))
    }
}
