//! Extractor error types.

use std::path::PathBuf;

use thiserror::Error;

use crate::db::DatabaseError;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot connect to content extractor at {0}")]
    Connection(String),

    #[error("Content extractor returned {status}: {body}")]
    Service { status: u16, body: String },

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Empty metadata for {0}")]
    EmptyMetadata(PathBuf),

    #[error("Extraction thread {thread} failed: {reason}")]
    Thread { thread: usize, reason: String },

    #[error("Thread count must be at least 1")]
    NoThreads,
}
