//! Daemon configuration.
//!
//! One TOML file is shared by the scanner, builder and extractor roles.
//! Every field has a default so a minimal file only names what differs
//! from the stock layout. The file is read once at startup; a config that
//! fails to load or validate is fatal and the daemon never starts serving.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveTime;
use serde::Deserialize;
use thiserror::Error;

/// Application-level constants
pub const APP_NAME: &str = "archindex";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Config path used when neither `--config` nor `ARCHINDEX_CONFIG` is set.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/archindex/archindex.toml";

/// Default tracing filter: info for this crate, warn for everything else.
pub fn default_log_filter() -> &'static str {
    "archindex=info,warn"
}

/// Filter used with `--debug`.
pub fn debug_log_filter() -> &'static str {
    "archindex=debug,warn"
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

// ═══════════════════════════════════════════════════════════
// Sections
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Root of the shared work directory (ledger, per-task data).
    pub workdir: PathBuf,
    /// Daily launch time, `HH:MM:SS` in local time.
    pub schedule: String,
    /// Timeout for builder/extractor `run` calls.
    pub rpc_timeout_secs: u64,
    /// Watermark used before any task has been recorded.
    pub first_oid: u64,
    pub database: DatabaseConfig,
    pub archive: ArchiveConfig,
    pub scanner: ScannerConfig,
    pub builder: BuilderConfig,
    pub extractor: ExtractorConfig,
    pub tika: TikaConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Primary index store.
    pub path: PathBuf,
    /// How long a writer waits on a locked database before failing.
    pub busy_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ArchiveConfig {
    /// Where the archive namespace is mounted on the extractor host.
    pub mountpoint: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScannerConfig {
    pub addr: String,
    /// Scan collaborator command line. Watermark, from-date, output
    /// directory and task id are appended as the last four arguments.
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuilderConfig {
    pub addr: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExtractorConfig {
    pub addr: String,
    pub nthreads: usize,
    /// Files larger than this are never queued for extraction.
    pub max_file_size: u64,
    /// Allow-list of extensions eligible for extraction.
    pub extension_filter: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TikaConfig {
    pub url: String,
    pub timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workdir: PathBuf::from("/var/lib/archindex"),
            schedule: "02:00:00".to_string(),
            rpc_timeout_secs: 4 * 60 * 60,
            first_oid: 0,
            database: DatabaseConfig::default(),
            archive: ArchiveConfig::default(),
            scanner: ScannerConfig::default(),
            builder: BuilderConfig::default(),
            extractor: ExtractorConfig::default(),
            tika: TikaConfig::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/archindex/index.db"),
            busy_timeout_ms: 30_000,
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            mountpoint: PathBuf::from("/archive"),
        }
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:7410".to_string(),
            command: vec!["/usr/libexec/archindex/archive-scan".to_string()],
        }
    }
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:7411".to_string(),
        }
    }
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:7412".to_string(),
            nthreads: 4,
            max_file_size: 512 * 1024 * 1024,
            extension_filter: PathBuf::from("/etc/archindex/extensions.conf"),
        }
    }
}

impl Default for TikaConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:9998".to_string(),
            timeout_secs: 300,
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Loading and validation
// ═══════════════════════════════════════════════════════════

impl Config {
    /// Read, parse and validate the config file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&raw).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;
        tracing::debug!(path = %path.display(), "Config loaded");
        Ok(config)
    }

    /// Parse and validate a config from TOML text.
    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.schedule_time()?;
        if self.rpc_timeout_secs == 0 {
            return Err(invalid("rpc_timeout_secs", "must be greater than zero"));
        }
        if self.database.busy_timeout_ms == 0 {
            return Err(invalid("database.busy_timeout_ms", "must be greater than zero"));
        }
        if self.extractor.nthreads == 0 {
            return Err(invalid("extractor.nthreads", "must be at least 1"));
        }
        if self.scanner.command.is_empty() || self.scanner.command[0].trim().is_empty() {
            return Err(invalid("scanner.command", "must name an executable"));
        }
        if self.workdir.as_os_str().is_empty() {
            return Err(invalid("workdir", "must not be empty"));
        }
        Ok(())
    }

    /// The configured daily launch time.
    pub fn schedule_time(&self) -> Result<NaiveTime, ConfigError> {
        NaiveTime::parse_from_str(&self.schedule, "%H:%M:%S")
            .map_err(|e| invalid("schedule", format!("{:?}: {e}", self.schedule)))
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.database.busy_timeout_ms)
    }

    /// Base URL of the control endpoint for a role address.
    pub fn control_url(addr: &str) -> String {
        if addr.starts_with("http://") || addr.starts_with("https://") {
            addr.trim_end_matches('/').to_string()
        } else {
            format!("http://{addr}")
        }
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.extractor.nthreads, 4);
        assert_eq!(config.schedule_time().unwrap(), NaiveTime::from_hms_opt(2, 0, 0).unwrap());
        assert_eq!(config.first_oid, 0);
    }

    #[test]
    fn sections_override_defaults() {
        let config = Config::from_toml(
            r#"
            workdir = "/tmp/work"
            schedule = "23:30:05"
            first_oid = 1000

            [extractor]
            nthreads = 8
            max_file_size = 1024

            [scanner]
            command = ["/opt/scan", "--verbose"]
            "#,
        )
        .unwrap();
        assert_eq!(config.workdir, PathBuf::from("/tmp/work"));
        assert_eq!(config.first_oid, 1000);
        assert_eq!(config.extractor.nthreads, 8);
        assert_eq!(config.extractor.max_file_size, 1024);
        assert_eq!(config.scanner.command, vec!["/opt/scan", "--verbose"]);
        // Untouched sections keep their defaults
        assert_eq!(config.builder.addr, "127.0.0.1:7411");
    }

    #[test]
    fn bad_schedule_rejected() {
        let err = Config::from_toml(r#"schedule = "25:00:00""#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "schedule", .. }));
    }

    #[test]
    fn zero_threads_rejected() {
        let err = Config::from_toml("[extractor]\nnthreads = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "extractor.nthreads", .. }));
    }

    #[test]
    fn zero_rpc_timeout_rejected() {
        let err = Config::from_toml("rpc_timeout_secs = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "rpc_timeout_secs", .. }));
    }

    #[test]
    fn empty_scan_command_rejected() {
        let err = Config::from_toml("[scanner]\ncommand = []").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "scanner.command", .. }));
    }

    #[test]
    fn unknown_field_is_parse_error() {
        let err = Config::from_toml("nthreads = 3").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archindex.toml");
        std::fs::write(&path, "first_oid = 42\n").unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.first_oid, 42);
    }

    #[test]
    fn control_url_adds_scheme() {
        assert_eq!(Config::control_url("10.0.0.1:7411"), "http://10.0.0.1:7411");
        assert_eq!(Config::control_url("http://host:1/"), "http://host:1");
    }

    #[test]
    fn app_name_is_archindex() {
        assert_eq!(APP_NAME, "archindex");
    }
}
