//! Builder: bulk ingestion of one task's scan output.
//!
//! Reads the four scan files from the task's data directory, applies them
//! to the primary store in a single transaction, then writes the task's
//! work queue for the extractor.

pub mod error;
pub mod load;
pub mod parse;
pub mod queue;

use std::path::{Path, PathBuf};
use std::time::Duration;

pub use error::{BuildError, Phase};
pub use load::{IngestSummary, ScanInputs};

use crate::config::Config;
use crate::control::TaskId;
use crate::db::open_database;
use crate::extfilter::ExtensionFilter;
use crate::workdir::{scan_file_in, work_queue_in, ScanFile};

#[derive(Debug, Clone)]
pub struct BuilderSettings {
    pub database: PathBuf,
    pub busy_timeout: Duration,
    pub extension_filter: PathBuf,
    pub max_file_size: u64,
}

impl BuilderSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            database: config.database.path.clone(),
            busy_timeout: config.busy_timeout(),
            extension_filter: config.extractor.extension_filter.clone(),
            max_file_size: config.extractor.max_file_size,
        }
    }
}

/// Result of a builder run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildSummary {
    pub n_indexed: u64,
    pub n_paths: u64,
    pub n_tagged: u64,
    pub n_deleted: u64,
    pub n_queued: u64,
}

pub struct Builder {
    settings: BuilderSettings,
}

impl Builder {
    pub fn new(settings: BuilderSettings) -> Self {
        Self { settings }
    }

    /// Ingest the scan output of `task` found in `data_dir` and write the
    /// task's work queue next to it.
    pub fn run(&self, data_dir: &Path, task: TaskId) -> Result<BuildSummary, BuildError> {
        let span = tracing::info_span!("builder", task_id = %task);
        let _enter = span.enter();

        // Loaded once per run so edits to the allow-list apply to the next task
        let filter = ExtensionFilter::load(&self.settings.extension_filter).map_err(|source| {
            BuildError::ExtensionFilter {
                path: self.settings.extension_filter.clone(),
                source,
            }
        })?;

        let attributes = scan_file_in(data_dir, task, ScanFile::Attributes);
        let paths = scan_file_in(data_dir, task, ScanFile::Paths);
        let tags = scan_file_in(data_dir, task, ScanFile::Tags);
        let deleted = scan_file_in(data_dir, task, ScanFile::Deleted);
        let inputs = ScanInputs {
            attributes: &attributes,
            paths: &paths,
            tags: &tags,
            deleted: &deleted,
        };

        let mut conn = open_database(&self.settings.database, self.settings.busy_timeout)?;
        let ingested = load::ingest(&mut conn, &inputs)?;

        let n_queued = queue::fill_work_queue(
            &conn,
            &work_queue_in(data_dir, task),
            &filter,
            self.settings.max_file_size,
        )?;

        let summary = BuildSummary {
            n_indexed: ingested.n_indexed,
            n_paths: ingested.n_paths,
            n_tagged: ingested.n_tagged,
            n_deleted: ingested.n_deleted,
            n_queued,
        };
        tracing::info!(
            n_indexed = summary.n_indexed,
            n_deleted = summary.n_deleted,
            n_queued = summary.n_queued,
            "Build finished"
        );
        Ok(summary)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::db::work_queue::WorkQueue;
    use crate::db::{get_object, get_tags};

    fn settings(dir: &Path) -> BuilderSettings {
        let filter = dir.join("extensions.conf");
        std::fs::write(&filter, "# allowed\npdf\n").unwrap();
        BuilderSettings {
            database: dir.join("index.db"),
            busy_timeout: Duration::from_secs(5),
            extension_filter: filter,
            max_file_size: 1 << 20,
        }
    }

    #[test]
    fn run_ingests_and_queues() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        let task = TaskId::new(1_700_000_000);
        let (mut attrs, mut paths) = regular_files(100, 4);
        // A directory and a non-matching extension are never queued
        attrs.push_str("200,132,224,160,160,2,0,0,512,1,1,1\n");
        paths.push_str("200,\"/proj\"\n");
        attrs.push_str("201,129,96,32,32,1,0,0,99,1,1,1\n");
        paths.push_str("201,\"/proj/notes.md\"\n");
        let tags = "100,\"<hpss><fs><campaign>alpha</campaign></fs></hpss>\"\n";
        write_scan_files(&data, task, &attrs, &paths, tags, "103\n");

        let summary = Builder::new(settings(dir.path())).run(&data, task).unwrap();

        assert_eq!(summary.n_indexed, 6);
        assert_eq!(summary.n_paths, 6);
        assert_eq!(summary.n_tagged, 1);
        assert_eq!(summary.n_deleted, 1);
        assert_eq!(summary.n_queued, 3); // 100..=102, 103 was deleted

        let conn = open_database(&dir.path().join("index.db"), Duration::from_secs(5)).unwrap();
        assert!(!get_object(&conn, 103).unwrap().unwrap().valid);
        assert_eq!(get_tags(&conn, 100).unwrap()[0].value, "alpha");

        let queue =
            WorkQueue::open_read(&work_queue_in(&data, task), Duration::from_secs(5)).unwrap();
        assert_eq!(queue.total_count().unwrap(), 3);
    }

    #[test]
    fn missing_scan_files_fail_without_queue() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        std::fs::create_dir_all(&data).unwrap();
        let task = TaskId::new(1_700_000_000);

        let err = Builder::new(settings(dir.path())).run(&data, task).unwrap_err();
        assert!(matches!(
            err,
            BuildError::Input {
                phase: Phase::Attributes,
                ..
            }
        ));
        assert!(!work_queue_in(&data, task).exists());
    }

    #[test]
    fn missing_extension_filter_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = settings(dir.path());
        s.extension_filter = dir.path().join("absent.conf");
        let err = Builder::new(s)
            .run(dir.path(), TaskId::new(1))
            .unwrap_err();
        assert!(matches!(err, BuildError::ExtensionFilter { .. }));
    }
}
