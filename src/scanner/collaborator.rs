//! External change-scan process.
//!
//! The scan itself runs out of process. It is given the watermark, the
//! look-back date, the output directory and the task id as its last four
//! arguments, writes the four scan files into the output directory and
//! reports its counters on stdout as `## <label>: <value>` lines.

use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process::{Command, Stdio};

use crate::control::TaskId;
use crate::models::ObjectId;

const MARKER_PREFIX: &str = "##";
const START_OID: &str = "start oid";
const END_OID: &str = "end oid";
const SCANNED: &str = "scanned";
const DELETED: &str = "deleted";

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("Scan command is empty")]
    NoCommand,

    #[error("Failed to launch {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("Failed reading scan output: {0}")]
    Io(#[from] std::io::Error),

    #[error("Scan process exited with {0}")]
    Exited(std::process::ExitStatus),

    #[error("Scan output has no '{0}' marker")]
    MissingMarker(&'static str),

    #[error("Invalid value for '{marker}': {value:?}")]
    InvalidMarker { marker: &'static str, value: String },

    #[error("Scan reported start oid {start} past end oid {end}")]
    InvalidRange { start: ObjectId, end: ObjectId },
}

/// Arguments handed to one scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    pub watermark: ObjectId,
    pub from_date: String,
    pub outdir: PathBuf,
    pub task_id: TaskId,
}

/// Counters reported by a finished scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub oid_start: ObjectId,
    pub oid_end: ObjectId,
    pub n_scanned: u64,
    pub n_deleted: u64,
}

impl ScanReport {
    /// Nothing changed since the last scan.
    pub fn is_empty(&self) -> bool {
        self.n_scanned == 0 && self.n_deleted == 0
    }
}

pub trait ScanCollaborator: Send + Sync {
    fn scan(&self, request: &ScanRequest) -> Result<ScanReport, ScanError>;
}

// ═══════════════════════════════════════════════════════════
// Marker parsing
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct Markers {
    oid_start: Option<u64>,
    oid_end: Option<u64>,
    n_scanned: Option<u64>,
    n_deleted: Option<u64>,
}

impl Markers {
    /// Record a counter if `line` starts with one of the known labels. The
    /// value is the text after the last `:`.
    fn observe(&mut self, line: &str) -> Result<(), ScanError> {
        let Some(body) = line.strip_prefix(MARKER_PREFIX) else {
            return Ok(());
        };
        let Some((label, value)) = body.rsplit_once(':') else {
            return Ok(());
        };
        let label = label.trim();
        let (marker, slot) = if label.starts_with(START_OID) {
            (START_OID, &mut self.oid_start)
        } else if label.starts_with(END_OID) {
            (END_OID, &mut self.oid_end)
        } else if label.starts_with(SCANNED) {
            (SCANNED, &mut self.n_scanned)
        } else if label.starts_with(DELETED) {
            (DELETED, &mut self.n_deleted)
        } else {
            return Ok(());
        };
        let parsed = value
            .trim()
            .parse::<u64>()
            .map_err(|_| ScanError::InvalidMarker {
                marker,
                value: value.trim().to_string(),
            })?;
        *slot = Some(parsed);
        Ok(())
    }

    fn finish(self) -> Result<ScanReport, ScanError> {
        let report = ScanReport {
            oid_start: self.oid_start.ok_or(ScanError::MissingMarker(START_OID))?,
            oid_end: self.oid_end.ok_or(ScanError::MissingMarker(END_OID))?,
            n_scanned: self.n_scanned.ok_or(ScanError::MissingMarker(SCANNED))?,
            n_deleted: self.n_deleted.ok_or(ScanError::MissingMarker(DELETED))?,
        };
        if report.oid_start > report.oid_end {
            return Err(ScanError::InvalidRange {
                start: report.oid_start,
                end: report.oid_end,
            });
        }
        Ok(report)
    }
}

/// Parse the counters out of a scan's stdout.
pub fn parse_report<'a>(lines: impl IntoIterator<Item = &'a str>) -> Result<ScanReport, ScanError> {
    let mut markers = Markers::default();
    for line in lines {
        markers.observe(line)?;
    }
    markers.finish()
}

// ═══════════════════════════════════════════════════════════
// Process-backed scan
// ═══════════════════════════════════════════════════════════

/// Runs the configured scan command as a child process.
#[derive(Debug, Clone)]
pub struct ProcessScanner {
    command: Vec<String>,
}

impl ProcessScanner {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }

    fn build_command(&self, request: &ScanRequest) -> Result<Command, ScanError> {
        let (program, args) = self.command.split_first().ok_or(ScanError::NoCommand)?;
        let mut cmd = Command::new(program);
        cmd.args(args)
            .arg(request.watermark.to_string())
            .arg(&request.from_date)
            .arg(&request.outdir)
            .arg(request.task_id.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped());
        Ok(cmd)
    }
}

impl ScanCollaborator for ProcessScanner {
    fn scan(&self, request: &ScanRequest) -> Result<ScanReport, ScanError> {
        let mut cmd = self.build_command(request)?;
        let program = self.command.first().cloned().unwrap_or_default();
        tracing::info!(
            task_id = %request.task_id,
            watermark = request.watermark,
            from_date = %request.from_date,
            outdir = %request.outdir.display(),
            %program,
            "Launching scan"
        );

        let mut child = cmd.spawn().map_err(|source| ScanError::Spawn {
            program: program.clone(),
            source,
        })?;

        let mut markers = Markers::default();
        let mut parse_err = None;
        let mut read_err = None;
        if let Some(stdout) = child.stdout.take() {
            let mut reader = BufReader::new(stdout);
            let mut raw = Vec::new();
            loop {
                raw.clear();
                match reader.read_until(b'\n', &mut raw) {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(e) => {
                        read_err = Some(e);
                        break;
                    }
                }
                // Only marker lines are parsed; other output may be any bytes
                if !raw.starts_with(MARKER_PREFIX.as_bytes()) {
                    continue;
                }
                let decoded = String::from_utf8_lossy(&raw);
                let line = decoded.trim_end_matches(['\n', '\r']);
                tracing::info!(task_id = %request.task_id, "{line}");
                if parse_err.is_none() {
                    parse_err = markers.observe(line).err();
                }
            }
        }

        // Always reap the child, even when its output was unusable
        let status = child.wait()?;
        if let Some(e) = read_err {
            return Err(ScanError::Io(e));
        }
        if !status.success() {
            return Err(ScanError::Exited(status));
        }
        if let Some(e) = parse_err {
            return Err(e);
        }
        markers.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    const OUTPUT: &str = "\
starting scan
## start oid: 100
## end oid: 5000
noise: 7
## scanned: 42
## deleted: 3
## 12 seconds
";

    #[test]
    fn parses_counters() {
        let report = parse_report(OUTPUT.lines()).unwrap();
        assert_eq!(
            report,
            ScanReport {
                oid_start: 100,
                oid_end: 5000,
                n_scanned: 42,
                n_deleted: 3,
            }
        );
        assert!(!report.is_empty());
    }

    #[test]
    fn value_after_last_colon() {
        let report = parse_report(
            ["## start oid: x: 1", "## end oid:2", "## scanned: 0", "## deleted:  0 "],
        )
        .unwrap();
        assert_eq!(report.oid_start, 1);
        assert_eq!(report.oid_end, 2);
        assert!(report.is_empty());
    }

    #[test]
    fn missing_marker_is_error() {
        let err = parse_report(["## start oid: 1", "## end oid: 2", "## scanned: 4"]).unwrap_err();
        assert!(matches!(err, ScanError::MissingMarker(DELETED)));
    }

    #[test]
    fn garbage_value_is_error() {
        let err = parse_report(["## scanned: many"]).unwrap_err();
        assert!(matches!(err, ScanError::InvalidMarker { marker: SCANNED, .. }));
    }

    #[test]
    fn inverted_range_rejected() {
        let err = parse_report([
            "## start oid: 10",
            "## end oid: 9",
            "## scanned: 1",
            "## deleted: 0",
        ])
        .unwrap_err();
        assert!(matches!(err, ScanError::InvalidRange { start: 10, end: 9 }));
    }

    fn request(outdir: &Path) -> ScanRequest {
        ScanRequest {
            watermark: 77,
            from_date: "2024-03-09".into(),
            outdir: outdir.to_path_buf(),
            task_id: TaskId::new(1_710_000_000),
        }
    }

    fn shell(script: &str) -> ProcessScanner {
        ProcessScanner::new(vec!["sh".into(), "-c".into(), script.into(), "scan".into()])
    }

    #[test]
    fn process_receives_arguments_and_reports() {
        let dir = tempfile::tempdir().unwrap();
        let scanner = shell(
            r###"echo "$1 $2 $4" > "$3/args"
echo "## start oid: $1"
echo "## end oid: 900"
echo "## scanned: 5"
echo "## deleted: 1""###,
        );

        let report = scanner.scan(&request(dir.path())).unwrap();
        assert_eq!(report.oid_start, 77);
        assert_eq!(report.oid_end, 900);
        assert_eq!(report.n_scanned, 5);

        let args = std::fs::read_to_string(dir.path().join("args")).unwrap();
        assert_eq!(args.trim(), "77 2024-03-09 1710000000");
    }

    #[test]
    fn binary_noise_outside_markers_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let scanner = shell(
            r"printf 'db2 noise \377\376\n'
echo '## start oid: 10'
printf '\377\n'
echo '## end oid: 20'
echo '## scanned: 3'
echo '## deleted: 0'",
        );
        let report = scanner.scan(&request(dir.path())).unwrap();
        assert_eq!(
            report,
            ScanReport {
                oid_start: 10,
                oid_end: 20,
                n_scanned: 3,
                n_deleted: 0,
            }
        );
    }

    #[test]
    fn child_is_reaped_when_markers_are_bad() {
        let dir = tempfile::tempdir().unwrap();
        let scanner = shell("echo \"## scanned: many\"; echo $$ > \"$3/pid\"");
        let err = scanner.scan(&request(dir.path())).unwrap_err();
        assert!(matches!(err, ScanError::InvalidMarker { marker: SCANNED, .. }));

        let pid = std::fs::read_to_string(dir.path().join("pid")).unwrap();
        let stat = Path::new("/proc").join(pid.trim()).join("stat");
        assert!(!stat.exists(), "scan process left behind: {stat:?}");
    }

    #[test]
    fn huge_counters_are_not_empty() {
        let report = ScanReport {
            n_scanned: u64::MAX,
            n_deleted: 1,
            ..ScanReport::default()
        };
        assert!(!report.is_empty());
    }

    #[test]
    fn nonzero_exit_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let scanner = shell(
            "echo '## start oid: 1'; echo '## end oid: 2'; echo '## scanned: 1'; echo '## deleted: 0'; exit 3",
        );
        let err = scanner.scan(&request(dir.path())).unwrap_err();
        assert!(matches!(err, ScanError::Exited(_)));
    }

    #[test]
    fn missing_program_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let scanner = ProcessScanner::new(vec!["/nonexistent/archindex-scan".into()]);
        assert!(matches!(
            scanner.scan(&request(dir.path())),
            Err(ScanError::Spawn { .. })
        ));
    }

    #[test]
    fn empty_command_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ProcessScanner::new(Vec::new()).scan(&request(dir.path())),
            Err(ScanError::NoCommand)
        ));
    }
}
