//! Shared work-directory layout.
//!
//! All three daemons derive file locations from the work root and the task
//! id alone, so the scanner never has to ship paths to its workers:
//!
//! ```text
//! <workdir>/ledger.db
//! <workdir>/data/<YYYY>/<YYYYMMDD>/scanner.<task>.fattr.csv
//! <workdir>/data/<YYYY>/<YYYYMMDD>/scanner.<task>.path.csv
//! <workdir>/data/<YYYY>/<YYYYMMDD>/scanner.<task>.xattr.csv
//! <workdir>/data/<YYYY>/<YYYYMMDD>/scanner.<task>.deleted.csv
//! <workdir>/data/<YYYY>/<YYYYMMDD>/builder.<task>.db
//! ```
//!
//! The date directory comes from the task's launch timestamp in local time,
//! not from "today", so a task that runs past midnight still finds its files.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::control::TaskId;

const LEDGER_FILE: &str = "ledger.db";

/// Which scan output file of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanFile {
    Attributes,
    Paths,
    Tags,
    Deleted,
}

impl ScanFile {
    fn suffix(self) -> &'static str {
        match self {
            Self::Attributes => "fattr",
            Self::Paths => "path",
            Self::Tags => "xattr",
            Self::Deleted => "deleted",
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkDir {
    root: PathBuf,
}

impl WorkDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.root.join(LEDGER_FILE)
    }

    /// Directory holding every file produced for `task`.
    pub fn data_dir(&self, task: TaskId) -> PathBuf {
        let launched = i64::try_from(task.as_secs())
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .unwrap_or_default()
            .with_timezone(&Local);
        self.root
            .join("data")
            .join(launched.format("%Y").to_string())
            .join(launched.format("%Y%m%d").to_string())
    }

    /// Create the task's data directory if it does not exist yet.
    pub fn ensure_data_dir(&self, task: TaskId) -> std::io::Result<PathBuf> {
        let dir = self.data_dir(task);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    pub fn scan_file(&self, task: TaskId, which: ScanFile) -> PathBuf {
        scan_file_in(&self.data_dir(task), task, which)
    }

    pub fn work_queue_path(&self, task: TaskId) -> PathBuf {
        work_queue_in(&self.data_dir(task), task)
    }
}

/// Scan output file for `task` inside an explicit data directory.
pub fn scan_file_in(data_dir: &Path, task: TaskId, which: ScanFile) -> PathBuf {
    data_dir.join(format!("scanner.{task}.{}.csv", which.suffix()))
}

/// Work queue file for `task` inside an explicit data directory.
pub fn work_queue_in(data_dir: &Path, task: TaskId) -> PathBuf {
    data_dir.join(format!("builder.{task}.db"))
}
