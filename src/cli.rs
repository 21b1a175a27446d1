//! Command line for `archindexd`.
//!
//! Daemon roles run until terminated. The one-shot commands run a single
//! phase in the foreground and print `##` progress markers.

use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, Subcommand};

use crate::config::{Config, ConfigError, DEFAULT_CONFIG_PATH};
use crate::control::{ControlClient, ControlError, TaskId, WorkerId};
use crate::daemon::{self, DaemonError};
use crate::db::ledger::JobLedger;
use crate::db::{count_tables, open_database, DatabaseError};
use crate::pipeline::builder::{BuildError, Builder, BuilderSettings};
use crate::pipeline::extractor::{ExtractError, Extractor, ExtractorSettings, TikaClient};
use crate::workdir::WorkDir;

#[derive(Parser, Debug)]
#[command(name = "archindexd", version)]
#[command(about = "Archive metadata and full-text indexing pipeline", long_about = None)]
pub struct Cli {
    /// Configuration file
    #[arg(short, long, env = "ARCHINDEX_CONFIG", default_value = DEFAULT_CONFIG_PATH, global = true)]
    pub config: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the orchestrating scanner daemon
    Scanner,
    /// Run the builder daemon
    Builder,
    /// Run the extractor daemon
    Extractor,
    /// Ingest one task's scan files and write its work queue
    Build {
        /// Directory holding the task's scan files
        data_dir: PathBuf,
        task_id: TaskId,
    },
    /// Extract every file in one task's work queue
    Extract {
        task_id: TaskId,
        /// Thread count (default: extractor.nthreads from the config)
        #[arg(short, long)]
        nthreads: Option<usize>,
        /// Work queue file (default: the task's queue under the work directory)
        #[arg(long)]
        queue: Option<PathBuf>,
    },
    /// Create or migrate the index store and the job ledger
    InitDb,
    /// Print recorded tasks, newest first, one JSON object per line
    History {
        #[arg(long, default_value_t = 0)]
        offset: u64,
        #[arg(long, default_value_t = 20)]
        count: u64,
    },
    /// Ask the running scanner to start a task now
    Trigger,
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Daemon(#[from] DaemonError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Control(#[from] ControlError),

    #[error("Cannot start async runtime: {0}")]
    Runtime(std::io::Error),

    #[error("Cannot encode task record: {0}")]
    Encode(#[from] serde_json::Error),
}

impl Command {
    /// Whether the command serves a control endpoint until terminated.
    pub fn is_daemon(&self) -> bool {
        matches!(self, Self::Scanner | Self::Builder | Self::Extractor)
    }
}

/// Execute a parsed command against a loaded config.
pub fn execute(command: Command, config: Config) -> Result<(), CliError> {
    match command {
        Command::Scanner => block_on(daemon::run_scanner(config)),
        Command::Builder => block_on(daemon::run_worker(config, WorkerId::Builder)),
        Command::Extractor => block_on(daemon::run_worker(config, WorkerId::Extractor)),
        Command::Build { data_dir, task_id } => build(&config, &data_dir, task_id),
        Command::Extract {
            task_id,
            nthreads,
            queue,
        } => extract(&config, task_id, nthreads, queue),
        Command::InitDb => init_db(&config),
        Command::History { offset, count } => history(&config, offset, count),
        Command::Trigger => {
            ControlClient::new(&Config::control_url(&config.scanner.addr))?.trigger()?;
            println!("## task triggered");
            Ok(())
        }
    }
}

fn block_on<F>(daemon: F) -> Result<(), CliError>
where
    F: std::future::Future<Output = Result<(), DaemonError>>,
{
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)?;
    runtime.block_on(daemon)?;
    Ok(())
}

fn build(config: &Config, data_dir: &std::path::Path, task_id: TaskId) -> Result<(), CliError> {
    let started = Instant::now();
    let summary = Builder::new(BuilderSettings::from_config(config)).run(data_dir, task_id)?;
    println!("## files indexed: {}", summary.n_indexed);
    println!("## regular files: {}", summary.n_queued);
    println!("## {} seconds", started.elapsed().as_secs());
    Ok(())
}

fn extract(
    config: &Config,
    task_id: TaskId,
    nthreads: Option<usize>,
    queue: Option<PathBuf>,
) -> Result<(), CliError> {
    let started = Instant::now();
    let settings = ExtractorSettings::from_config(config);
    let nthreads = nthreads.unwrap_or(settings.nthreads);
    let queue = queue.unwrap_or_else(|| WorkDir::new(&config.workdir).work_queue_path(task_id));

    let tika = TikaClient::new(&config.tika.url, config.tika.timeout_secs)?;
    let summary = Extractor::new(settings, tika).run(&queue, nthreads)?;
    println!("## files extracted: {}", summary.n_extracted);
    println!("## {} seconds", started.elapsed().as_secs());
    Ok(())
}

fn init_db(config: &Config) -> Result<(), CliError> {
    if let Some(parent) = config.database.path.parent() {
        std::fs::create_dir_all(parent).map_err(DatabaseError::from)?;
    }
    let conn = open_database(&config.database.path, config.busy_timeout())?;
    println!(
        "## index store: {} ({} tables)",
        config.database.path.display(),
        count_tables(&conn)?
    );

    let workdir = WorkDir::new(&config.workdir);
    std::fs::create_dir_all(workdir.root()).map_err(DatabaseError::from)?;
    let ledger_path = workdir.ledger_path();
    let ledger = JobLedger::open(&ledger_path, config.busy_timeout())?;
    println!(
        "## job ledger: {} ({} tasks)",
        ledger_path.display(),
        ledger.count()?
    );
    Ok(())
}

fn history(config: &Config, offset: u64, count: u64) -> Result<(), CliError> {
    let ledger = JobLedger::open(&WorkDir::new(&config.workdir).ledger_path(), config.busy_timeout())?;
    for record in ledger.fetch_history(offset, count)? {
        println!("{}", serde_json::to_string(&record)?);
    }
    Ok(())
}
