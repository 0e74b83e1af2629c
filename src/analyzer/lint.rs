//! Lint analyzer - invocation and output parsing
//!
//! Output lines look like `C0114:  1,0: obj: message`, grouped under
//! `************* Module <name>` banners, followed by a rating line.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, warn};

use super::{
    AnalysisOutcome, AnalysisRequest, AnalyzerKind, AnalyzerRunner, Diagnostic, ExitStatus,
    Severity,
};
use crate::error::{Error, Result};

/// `--msg-template` passed to analyzers that understand it
pub const MSG_TEMPLATE: &str = "{msg_id}:{line:3d},{column}: {obj}: {msg}";

const MODULE_BANNER: &str = "************* Module ";
const RATING_PREFIX: &str = "Your code has been rated at ";
const PREVIOUS_PREFIX: &str = "previous run: ";
const RATING_SUFFIX: &str = "/10";

fn message_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[CRWEF][0-9]{0,4}:").expect("static regex"))
}

fn version_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(\S+)\s+v?(\d+)\.(\d+)").expect("static regex"))
}

/// Version reported by `--version`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LintVersion {
    pub name: String,
    pub major: u32,
    pub minor: u32,
}

impl LintVersion {
    /// Parse the first line of `--version` output
    pub fn parse(output: &str) -> Option<Self> {
        let first = output.lines().find(|l| !l.trim().is_empty())?;
        let caps = version_line().captures(first)?;
        Some(Self {
            name: caps[1].trim_end_matches(',').to_string(),
            major: caps[2].parse().ok()?,
            minor: caps[3].parse().ok()?,
        })
    }

    /// Output format this version produces with [`build_arguments`]
    pub fn format(&self) -> LintFormat {
        if self.major >= 1 {
            LintFormat::Template
        } else {
            LintFormat::Legacy
        }
    }
}

/// Shape of the text after the line number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LintFormat {
    /// `{obj}: {msg}`, from [`MSG_TEMPLATE`]
    #[default]
    Template,
    /// Free text message
    Legacy,
}

/// Everything extracted from one lint run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LintReport {
    pub diagnostics: Vec<Diagnostic>,
    pub rate: Option<f64>,
    pub previous_rate: Option<f64>,
}

impl LintReport {
    /// Parse captured stdout. Lines that are not messages are ignored and
    /// garbage input yields an empty report.
    ///
    /// Only the first two colons split a line, so a message keeps any
    /// colons of its own.
    pub fn parse(output: &str, format: LintFormat) -> Self {
        let mut diagnostics = Vec::new();
        let mut module = String::new();

        for line in output.lines() {
            if let Some(name) = line.strip_prefix(MODULE_BANNER) {
                module = name.trim().to_string();
                continue;
            }
            if !message_line().is_match(line) {
                continue;
            }
            match parse_message(line, &module, format) {
                Some(diagnostic) => diagnostics.push(diagnostic),
                None => debug!("Skipping lint line {:?}", line),
            }
        }

        let (rate, previous_rate) = parse_rating(output);
        Self {
            diagnostics,
            rate,
            previous_rate,
        }
    }

    /// Copy diagnostics and ratings into `outcome`
    pub fn apply(self, outcome: &mut AnalysisOutcome) {
        outcome.rate = self.rate;
        outcome.previous_rate = self.previous_rate;
        outcome.set_diagnostics(self.diagnostics);
    }
}

fn parse_message(line: &str, module: &str, format: LintFormat) -> Option<Diagnostic> {
    let mut pieces = line.splitn(3, ':');
    let message_id = pieces.next()?.trim();
    let position = pieces.next()?.trim();
    let remainder = pieces.next()?;

    let severity = Severity::from_letter(message_id.chars().next()?)?;

    let (line_piece, column_piece) = match position.split_once(',') {
        Some((l, c)) => (l.trim(), Some(c.trim())),
        None => (position, None),
    };
    let line_number: usize = line_piece.parse().ok()?;
    if line_number < 1 {
        return None;
    }
    let column = column_piece.and_then(|c| c.parse().ok());

    let (object, message) = match format {
        LintFormat::Template => {
            let rest = remainder.trim_start();
            match rest.split_once(':') {
                Some((obj, msg)) => (obj.trim().to_string(), msg.trim().to_string()),
                None => (String::new(), rest.trim().to_string()),
            }
        }
        LintFormat::Legacy => (String::new(), remainder.trim().to_string()),
    };

    Some(Diagnostic {
        severity,
        module_qualifier: module.to_string(),
        line_number,
        column,
        message_id: message_id.to_string(),
        object,
        message,
    })
}

fn parse_rating(output: &str) -> (Option<f64>, Option<f64>) {
    let Some(start) = output.find(RATING_PREFIX) else {
        return (None, None);
    };
    let rest = &output[start + RATING_PREFIX.len()..];
    let rate = read_score(rest);

    let previous = rest
        .lines()
        .next()
        .and_then(|line| line.find(PREVIOUS_PREFIX).map(|i| &line[i + PREVIOUS_PREFIX.len()..]))
        .and_then(read_score);

    (rate, previous)
}

fn read_score(text: &str) -> Option<f64> {
    let end = text.find(RATING_SUFFIX)?;
    text[..end].trim().parse().ok()
}

/// Render diagnostics in the analyzer's own template format
pub fn render(diagnostics: &[Diagnostic]) -> String {
    let mut out = String::new();
    let mut module = "";

    for d in diagnostics {
        if d.module_qualifier != module {
            module = &d.module_qualifier;
            out.push_str(MODULE_BANNER);
            out.push_str(module);
            out.push('\n');
        }
        let line = match d.column {
            Some(col) => format!(
                "{}:{:>3},{}: {}: {}\n",
                d.message_id, d.line_number, col, d.object, d.message
            ),
            None => format!(
                "{}:{:>3}: {}: {}\n",
                d.message_id, d.line_number, d.object, d.message
            ),
        };
        out.push_str(&line);
    }

    out
}

/// Arguments for one analysis of `target`
pub fn build_arguments(version: &LintVersion, target: &Path) -> Vec<String> {
    let basename = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| target.to_string_lossy().into_owned());

    match version.format() {
        LintFormat::Template => vec![format!("--msg-template={}", MSG_TEMPLATE), basename],
        LintFormat::Legacy => vec!["-i".to_string(), "yes".to_string(), basename],
    }
}

/// Run `executable --version` and parse the answer
pub async fn probe_version(executable: &str) -> Result<LintVersion> {
    let output = tokio::process::Command::new(executable)
        .arg("--version")
        .stdin(std::process::Stdio::null())
        .output()
        .await
        .map_err(|e| Error::LaunchFailed {
            program: executable.to_string(),
            reason: e.to_string(),
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    LintVersion::parse(&stdout)
        .or_else(|| LintVersion::parse(&stderr))
        .ok_or_else(|| {
            Error::MalformedOutput(format!("unrecognized version output: {}", stdout.trim()))
        })
}

/// Lint `target` with `executable`, parsing whatever output it produced
pub async fn run_lint(
    runner: &AnalyzerRunner,
    executable: &str,
    target: &Path,
) -> Result<AnalysisOutcome> {
    if !target.is_file() {
        return Err(Error::InvalidArgument(format!(
            "lint target {} is not a file",
            target.display()
        )));
    }

    let working_dir = AnalysisRequest::target_dir(target);
    let mut request = AnalysisRequest {
        target_path: target.to_path_buf(),
        program: executable.to_string(),
        arguments: Vec::new(),
        working_dir: working_dir.clone(),
        environment_overlay: Default::default(),
        analyzer_kind: AnalyzerKind::Lint,
    };
    request.environment_overlay.insert(
        "PYTHONPATH".to_string(),
        working_dir.to_string_lossy().into_owned(),
    );

    let version = match probe_version(executable).await {
        Ok(version) => version,
        Err(Error::LaunchFailed { reason, .. }) => {
            warn!("Lint analyzer {} unavailable: {}", executable, reason);
            return Ok(AnalysisOutcome::launch_failed(request, reason));
        }
        Err(e) => {
            warn!("{}; assuming a current analyzer", e);
            LintVersion {
                name: executable.to_string(),
                major: 1,
                minor: 0,
            }
        }
    };
    debug!("Lint analyzer {} {}.{}", version.name, version.major, version.minor);
    request.arguments = build_arguments(&version, target);

    let mut outcome = runner.run(request).await;
    if !matches!(
        outcome.exit_status,
        ExitStatus::LaunchFailed | ExitStatus::Cancelled
    ) {
        LintReport::parse(&outcome.raw_output, version.format()).apply(&mut outcome);
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "************* Module alpha
C0114:  1, 0: : Missing docstring
W0611:  2, 4: : Unused import os
Your code has been rated at 7.50/10 (previous run: 6.00/10)
";

    #[test]
    fn test_parse_sample_report() {
        let report = LintReport::parse(SAMPLE, LintFormat::Template);

        assert_eq!(report.diagnostics.len(), 2);
        let first = &report.diagnostics[0];
        assert_eq!(first.severity, Severity::Convention);
        assert_eq!(first.module_qualifier, "alpha");
        assert_eq!(first.line_number, 1);
        assert_eq!(first.column, Some(0));
        assert_eq!(first.message_id, "C0114");
        assert_eq!(first.message, "Missing docstring");

        let second = &report.diagnostics[1];
        assert_eq!(second.severity, Severity::Warning);
        assert_eq!(second.line_number, 2);
        assert_eq!(second.column, Some(4));
        assert_eq!(second.message, "Unused import os");

        assert_eq!(report.rate, Some(7.5));
        assert_eq!(report.previous_rate, Some(6.0));
    }

    #[test]
    fn test_message_colons_are_kept() {
        let report = LintReport::parse(
            "E1101: 12,8: Foo.bar: Instance of 'Foo' has no 'x' member: see docs\n",
            LintFormat::Template,
        );
        let d = &report.diagnostics[0];
        assert_eq!(d.object, "Foo.bar");
        assert_eq!(d.message, "Instance of 'Foo' has no 'x' member: see docs");
        assert_eq!(d.module_qualifier, "");
    }

    #[test]
    fn test_legacy_format_keeps_remainder() {
        let report = LintReport::parse("W:  3: Unused variable 'x'\n", LintFormat::Legacy);
        let d = &report.diagnostics[0];
        assert_eq!(d.severity, Severity::Warning);
        assert_eq!(d.message_id, "W");
        assert_eq!(d.column, None);
        assert_eq!(d.message, "Unused variable 'x'");
    }

    #[test]
    fn test_noise_and_bad_lines_are_dropped() {
        let text = "garbage\nI0011:  1,0: : info\nC0114:  0,0: : zero line\nC0114: x,0: : nope\n\
                    -----------\nYour code has been rated at oops/10\n";
        let report = LintReport::parse(text, LintFormat::Template);
        assert!(report.diagnostics.is_empty());
        assert_eq!(report.rate, None);
        assert_eq!(report.previous_rate, None);
    }

    #[test]
    fn test_rating_without_previous_run() {
        let report = LintReport::parse(
            "Your code has been rated at -2.10/10\n",
            LintFormat::Template,
        );
        assert_eq!(report.rate, Some(-2.1));
        assert_eq!(report.previous_rate, None);
    }

    #[test]
    fn test_render_then_parse() {
        let report = LintReport::parse(SAMPLE, LintFormat::Template);
        let rendered = render(&report.diagnostics);
        let reparsed = LintReport::parse(&rendered, LintFormat::Template);
        assert_eq!(reparsed.diagnostics, report.diagnostics);
    }

    #[test]
    fn test_version_and_arguments() {
        let modern = LintVersion::parse("pylint 2.17.4\nastroid 2.15.5\n").unwrap();
        assert_eq!(modern.name, "pylint");
        assert_eq!((modern.major, modern.minor), (2, 17));
        assert_eq!(
            build_arguments(&modern, Path::new("/src/pkg/mod.py")),
            vec![format!("--msg-template={}", MSG_TEMPLATE), "mod.py".to_string()]
        );

        let legacy = LintVersion::parse("pylint 0.28.0,\n").unwrap();
        assert_eq!(legacy.format(), LintFormat::Legacy);
        assert_eq!(
            build_arguments(&legacy, Path::new("/src/pkg/mod.py")),
            vec!["-i", "yes", "mod.py"]
        );

        assert!(LintVersion::parse("no version here").is_none());
    }

    #[tokio::test]
    async fn test_run_lint_missing_target() {
        let runner = AnalyzerRunner::new(crate::events::EventBus::new());
        let err = run_lint(&runner, "pylint", Path::new("/no/such/file.py"))
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[tokio::test]
    async fn test_run_lint_missing_executable() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("m.py");
        std::fs::write(&target, "x = 1\n").unwrap();

        let runner = AnalyzerRunner::new(crate::events::EventBus::new());
        let outcome = run_lint(&runner, "/no/such/linter", &target).await.unwrap();
        assert_eq!(outcome.exit_status, ExitStatus::LaunchFailed);
    }
}
