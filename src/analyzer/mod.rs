//! Analyzer module - external analyzers run as child processes
//!
//! [`AnalyzerRunner`] launches the child and collects its output,
//! [`lint`] and [`profile`] turn that output into diagnostics or a call graph.

pub mod lint;
pub mod marshal;
pub mod profile;
mod runner;

pub use lint::{LintFormat, LintReport, LintVersion};
pub use profile::{FuncKey, FuncStats, ProfileGraph, ProfileKind, ProfileNode};
pub use runner::{compose_environment, AnalyzerRunner, PATH_LIST_SEPARATOR};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which analyzer a request drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyzerKind {
    Profile,
    Lint,
}

impl std::fmt::Display for AnalyzerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnalyzerKind::Profile => write!(f, "profile"),
            AnalyzerKind::Lint => write!(f, "lint"),
        }
    }
}

/// One analyzer invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    /// File being analyzed
    pub target_path: PathBuf,
    /// Program to launch
    pub program: String,
    pub arguments: Vec<String>,
    pub working_dir: PathBuf,
    /// Added to the inherited environment; the module search path variable
    /// is prepended rather than replaced
    pub environment_overlay: BTreeMap<String, String>,
    pub analyzer_kind: AnalyzerKind,
}

impl AnalysisRequest {
    /// Directory containing the target, or `.` for a bare file name
    pub fn target_dir(target: &Path) -> PathBuf {
        target
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

/// Lint message severity, in increasing order of gravity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Convention,
    Refactor,
    Warning,
    Error,
    Fatal,
}

impl Severity {
    pub const ALL: [Severity; 5] = [
        Severity::Convention,
        Severity::Refactor,
        Severity::Warning,
        Severity::Error,
        Severity::Fatal,
    ];

    pub fn from_letter(letter: char) -> Option<Self> {
        match letter {
            'C' => Some(Severity::Convention),
            'R' => Some(Severity::Refactor),
            'W' => Some(Severity::Warning),
            'E' => Some(Severity::Error),
            'F' => Some(Severity::Fatal),
            _ => None,
        }
    }

    pub fn letter(self) -> char {
        match self {
            Severity::Convention => 'C',
            Severity::Refactor => 'R',
            Severity::Warning => 'W',
            Severity::Error => 'E',
            Severity::Fatal => 'F',
        }
    }

    /// Bucket title
    pub fn label(self) -> &'static str {
        match self {
            Severity::Convention => "Convention",
            Severity::Refactor => "Refactor",
            Severity::Warning => "Warning",
            Severity::Error => "Error",
            Severity::Fatal => "Fatal",
        }
    }
}

/// One lint finding
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub module_qualifier: String,
    pub line_number: usize,
    pub column: Option<usize>,
    pub message_id: String,
    /// Object the message is about (class, function), may be empty
    #[serde(default)]
    pub object: String,
    pub message: String,
}

/// How the child process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    /// Exited with a code
    Code(i32),
    /// Killed by a signal
    Signaled,
    /// Killed because the run was cancelled
    Cancelled,
    /// Never started
    LaunchFailed,
}

impl ExitStatus {
    pub fn success(self) -> bool {
        matches!(self, ExitStatus::Code(0))
    }

    pub fn from_std(status: std::process::ExitStatus) -> Self {
        match status.code() {
            Some(code) => ExitStatus::Code(code),
            None => ExitStatus::Signaled,
        }
    }
}

impl std::fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitStatus::Code(code) => write!(f, "exit code {}", code),
            ExitStatus::Signaled => write!(f, "killed by signal"),
            ExitStatus::Cancelled => write!(f, "cancelled"),
            ExitStatus::LaunchFailed => write!(f, "launch failed"),
        }
    }
}

/// A completed analysis, as stored in history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOutcome {
    pub request: AnalysisRequest,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub exit_status: ExitStatus,
    /// Score out of 10, when the analyzer reports one
    pub rate: Option<f64>,
    pub previous_rate: Option<f64>,
    #[serde(default)]
    pub diagnostics: BTreeMap<Severity, Vec<Diagnostic>>,
    pub raw_output: String,
    pub raw_error: String,
    /// Statistics file written by the profiler
    #[serde(default)]
    pub stats_path: Option<PathBuf>,
}

impl AnalysisOutcome {
    /// Outcome of a run that ended before producing anything
    pub fn launch_failed(request: AnalysisRequest, reason: String) -> Self {
        let now = Utc::now();
        Self {
            request,
            started_at: now,
            finished_at: now,
            exit_status: ExitStatus::LaunchFailed,
            rate: None,
            previous_rate: None,
            diagnostics: BTreeMap::new(),
            raw_output: String::new(),
            raw_error: reason,
            stats_path: None,
        }
    }

    /// Replace the diagnostics, grouping them by severity
    pub fn set_diagnostics(&mut self, diagnostics: Vec<Diagnostic>) {
        self.diagnostics.clear();
        for diagnostic in diagnostics {
            self.diagnostics
                .entry(diagnostic.severity)
                .or_default()
                .push(diagnostic);
        }
    }

    pub fn diagnostic_count(&self) -> usize {
        self.diagnostics.values().map(Vec::len).sum()
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics.get(&severity).map(Vec::len).unwrap_or(0)
    }

    pub fn duration(&self) -> std::time::Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_letters_round_trip() {
        for severity in Severity::ALL {
            assert_eq!(Severity::from_letter(severity.letter()), Some(severity));
        }
        assert_eq!(Severity::from_letter('I'), None);
    }

    #[test]
    fn test_target_dir() {
        assert_eq!(
            AnalysisRequest::target_dir(Path::new("/src/pkg/mod.py")),
            PathBuf::from("/src/pkg")
        );
        assert_eq!(
            AnalysisRequest::target_dir(Path::new("mod.py")),
            PathBuf::from(".")
        );
    }

    #[test]
    fn test_launch_failed_outcome() {
        let request = AnalysisRequest {
            target_path: PathBuf::from("/t/a.py"),
            program: "missing-analyzer".to_string(),
            arguments: Vec::new(),
            working_dir: PathBuf::from("/t"),
            environment_overlay: BTreeMap::new(),
            analyzer_kind: AnalyzerKind::Lint,
        };
        let outcome = AnalysisOutcome::launch_failed(request, "not found".to_string());
        assert_eq!(outcome.exit_status, ExitStatus::LaunchFailed);
        assert!(outcome.finished_at >= outcome.started_at);
        assert_eq!(outcome.raw_error, "not found");
    }
}
