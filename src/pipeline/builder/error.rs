//! Builder error types.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::db::DatabaseError;

/// Ingestion phase, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Attributes,
    Paths,
    Tags,
    Deletions,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Attributes => write!(f, "attributes"),
            Self::Paths => write!(f, "paths"),
            Self::Tags => write!(f, "tags"),
            Self::Deletions => write!(f, "deletions"),
        }
    }
}

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("{phase} phase: cannot read {path}: {source}")]
    Input {
        phase: Phase,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{phase} phase: line {line}: {reason}")]
    Parse {
        phase: Phase,
        line: usize,
        reason: String,
    },

    #[error("Cannot load extension filter {path}: {source}")]
    ExtensionFilter {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<rusqlite::Error> for BuildError {
    fn from(e: rusqlite::Error) -> Self {
        BuildError::Database(DatabaseError::Sqlite(e))
    }
}
