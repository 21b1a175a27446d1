//! Long-running roles: the scanner and its two workers.
//!
//! Each daemon serves the control endpoint in the background and parks its
//! main flow on a `select!` over signals and control events. Anything that
//! touches a blocking HTTP client or runs a pipeline phase goes through
//! `spawn_blocking`.

pub mod scanner;
pub mod worker;

use crate::config::ConfigError;
use crate::control::ControlError;
use crate::db::DatabaseError;

pub use scanner::run_scanner;
pub use worker::run_worker;

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Cannot bind control endpoint {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("Cannot create work directory {path}: {source}")]
    WorkDir {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Control(#[from] ControlError),

    #[error("Startup failed: {0}")]
    Startup(String),

    #[error("Cannot install signal handler: {0}")]
    Signal(std::io::Error),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
