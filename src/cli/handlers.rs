//! Command handlers

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use super::{
    BreakpointsCommand, ConfigCommand, HistoryCommand, LintArgs, ProfileArgs, SearchArgs,
};
use crate::analyzer::{self, AnalysisOutcome, AnalyzerRunner, ExitStatus, Severity};
use crate::breakpoints::{BreakpointRegistry, FileStore};
use crate::config::{generate_sample_config, Config};
use crate::error::Error;
use crate::events::EventBus;
use crate::history::ResultAggregator;
use crate::search::{ErrorCode, SearchCoordinator, SearchOptions, SearchOutcome};
use crate::tree::{ResultTreeModel, TreeOutcome};

const TICK: Duration = Duration::from_millis(100);

fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg} [{elapsed_precise}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.enable_steady_tick(Duration::from_millis(80));
    pb.set_message(message.to_string());
    pb
}

fn existing_path(path: &Path, what: &str) -> Result<PathBuf> {
    path.canonicalize().map_err(|e| {
        Error::InvalidArgument(format!("{} {}: {}", what, path.display(), e)).into()
    })
}

fn open_history(config: &Config) -> ResultAggregator {
    ResultAggregator::open(&config.history_path(), config.history.max_entries)
}

// ============================================================================
// search
// ============================================================================

pub(super) fn search(args: &SearchArgs, config: &Config) -> Result<i32> {
    let encodings = if args.encodings.is_empty() {
        config.search.supported_encodings.clone()
    } else {
        args.encodings.clone()
    };

    let mut options = SearchOptions::new(&args.root)
        .with_encodings(encodings)
        .with_text(&args.text)
        .regex(args.regex)
        .include(args.include.clone().unwrap_or_else(|| config.search.include.clone()))
        .exclude(args.exclude.clone().unwrap_or_else(|| config.search.exclude.clone()))
        .vcs_manifest(args.vcs);
    options.runtime_path_env = config.search.runtime_path_env.clone();
    if args.runtime_path {
        options = options.runtime_path(config.search.runtime_path.clone());
    }

    let mut coordinator = SearchCoordinator::new("search", EventBus::new())
        .with_join_timeout(config.search.join_timeout());
    let handle = coordinator.begin(options)?;

    let pb = (!args.json).then(|| spinner("Searching..."));
    let outcome = loop {
        if let Some(outcome) = coordinator.wait(handle, TICK) {
            break outcome;
        }
        if !coordinator.is_running(handle) {
            return Err(Error::Internal("search outcome lost".to_string()).into());
        }
        if let (Some(pb), Some(progress)) = (&pb, coordinator.progress(handle)) {
            pb.set_message(format!(
                "{} files, {} matches",
                progress.files_scanned, progress.matches_so_far
            ));
        }
    };
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else if args.tree {
        let mut model = ResultTreeModel::new(EventBus::new());
        model.set_outcome(TreeOutcome::Search(outcome.clone()));
        print!("{}", model.render());
        print_search_summary(&outcome);
    } else {
        for (path, matches) in &outcome.matches {
            for m in matches {
                println!(
                    "{}:{}:{}: {}",
                    path.display().to_string().cyan(),
                    m.line_number.to_string().green(),
                    m.column,
                    m.line_text
                );
            }
        }
        print_search_summary(&outcome);
    }

    Ok(match outcome.error_code {
        ErrorCode::InvalidRegex | ErrorCode::NoVcsRoot => 2,
        ErrorCode::Internal => 4,
        ErrorCode::None | ErrorCode::PermissionDenied => 0,
    })
}

fn print_search_summary(outcome: &SearchOutcome) {
    let summary = format!(
        "{} matches in {} files",
        outcome.total_match_count,
        outcome.file_count()
    );
    match outcome.error_code {
        ErrorCode::None => eprintln!("{} {}", "✓".bright_green(), summary),
        code => eprintln!("{} {} ({})", "⚠".yellow(), summary, code),
    }
}

// ============================================================================
// lint / profile
// ============================================================================

pub(super) async fn lint(args: &LintArgs, config: &Config) -> Result<i32> {
    let target = existing_path(&args.target, "lint target")?;
    let executable = args
        .executable
        .clone()
        .unwrap_or_else(|| config.lint.executable.clone());

    let runner = AnalyzerRunner::new(EventBus::new())
        .with_kill_timeout(Duration::from_millis(config.lint.kill_timeout_ms));
    let outcome = analyzer::lint::run_lint(&runner, &executable, &target).await?;

    if outcome.exit_status != ExitStatus::LaunchFailed {
        let mut history = open_history(config);
        history.record(&target, outcome.clone());
        history.flush();
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else if args.tree {
        let mut model = ResultTreeModel::new(EventBus::new());
        model.set_outcome(TreeOutcome::Lint(outcome.clone()));
        print!("{}", model.render());
        print_lint_summary(&outcome);
    } else {
        for severity in Severity::ALL {
            for d in outcome.diagnostics.get(&severity).into_iter().flatten() {
                println!(
                    "{}:{}: {} {}",
                    target.display().to_string().cyan(),
                    d.line_number,
                    severity_tag(severity),
                    d.message
                );
            }
        }
        print_lint_summary(&outcome);
    }

    Ok(analysis_exit_code(&outcome))
}

fn severity_tag(severity: Severity) -> String {
    let tag = format!("[{}]", severity.label());
    match severity {
        Severity::Convention | Severity::Refactor => tag.blue().to_string(),
        Severity::Warning => tag.yellow().to_string(),
        Severity::Error | Severity::Fatal => tag.red().to_string(),
    }
}

fn print_lint_summary(outcome: &AnalysisOutcome) {
    if let Some(rate) = outcome.rate {
        match outcome.previous_rate {
            Some(previous) => eprintln!("Rated {:.2}/10 (previous run: {:.2}/10)", rate, previous),
            None => eprintln!("Rated {:.2}/10", rate),
        }
    }
    eprintln!(
        "{} diagnostics, {} in {}",
        outcome.diagnostic_count(),
        outcome.exit_status,
        humantime::format_duration(round_millis(outcome.duration()))
    );
}

fn round_millis(duration: Duration) -> Duration {
    Duration::from_millis(duration.as_millis() as u64)
}

fn analysis_exit_code(outcome: &AnalysisOutcome) -> i32 {
    match outcome.exit_status {
        ExitStatus::LaunchFailed => {
            eprintln!("{} {}", "✗".red(), outcome.raw_error.trim());
            3
        }
        ExitStatus::Code(0) => 0,
        _ => {
            if !outcome.raw_error.is_empty() {
                eprint!("{}", outcome.raw_error);
            }
            0
        }
    }
}

/// One row of the JSON profile listing
#[derive(Debug, Serialize)]
struct ProfileRow<'a> {
    function: &'a str,
    filename: &'a str,
    line: u32,
    primitive_calls: u64,
    total_calls: u64,
    self_time: f64,
    cumulative_time: f64,
}

#[derive(Debug, Serialize)]
struct ProfileReport<'a> {
    outcome: &'a AnalysisOutcome,
    functions: Vec<ProfileRow<'a>>,
}

pub(super) async fn profile(args: &ProfileArgs, config: &Config) -> Result<i32> {
    let target = existing_path(&args.target, "profile target")?;
    let interpreter = args
        .interpreter
        .clone()
        .unwrap_or_else(|| config.profile.interpreter.clone());

    let runner = AnalyzerRunner::new(EventBus::new())
        .with_kill_timeout(Duration::from_millis(config.profile.kill_timeout_ms));
    let mut outcome =
        analyzer::profile::run_profile(&runner, &interpreter, &target, &args.args).await?;
    let graph = analyzer::profile::take_graph(&mut outcome);

    if outcome.exit_status != ExitStatus::LaunchFailed {
        let mut history = open_history(config);
        history.record(&target, outcome.clone());
        history.flush();
    }

    if args.json {
        let mut nodes: Vec<_> = graph.nodes().iter().collect();
        nodes.sort_by(|a, b| b.cumulative_time.total_cmp(&a.cumulative_time));
        let report = ProfileReport {
            outcome: &outcome,
            functions: nodes
                .into_iter()
                .map(|n| ProfileRow {
                    function: &n.key.function,
                    filename: &n.key.filename,
                    line: n.key.line,
                    primitive_calls: n.primitive_calls,
                    total_calls: n.total_calls,
                    self_time: n.self_time,
                    cumulative_time: n.cumulative_time,
                })
                .collect(),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        let depth = args.depth.unwrap_or(config.profile.initial_depth);
        let functions = graph.len();
        let mut model = ResultTreeModel::new(EventBus::new()).with_initial_depth(depth);
        model.set_outcome(TreeOutcome::Profile(graph));
        print!("{}", model.render());
        eprintln!(
            "{} functions profiled, {} in {}",
            functions,
            outcome.exit_status,
            humantime::format_duration(round_millis(outcome.duration()))
        );
    }

    Ok(analysis_exit_code(&outcome))
}

// ============================================================================
// breakpoints / history / config
// ============================================================================

pub(super) fn breakpoints(command: &BreakpointsCommand, config: &Config) -> Result<i32> {
    let path = config.breakpoints_path();
    let mut registry = BreakpointRegistry::new(Box::new(FileStore::new(&path)), EventBus::new());
    registry
        .load()
        .with_context(|| format!("Failed to load breakpoints from {}", path.display()))?;

    match command {
        BreakpointsCommand::List { json } => {
            let set = registry.list();
            if *json {
                println!("{}", serde_json::to_string_pretty(&set)?);
            } else if set.is_empty() {
                println!("No breakpoints");
            } else {
                let mut model = ResultTreeModel::new(EventBus::new());
                model.set_outcome(TreeOutcome::Breakpoints(set));
                print!("{}", model.render());
            }
        }
        BreakpointsCommand::Set {
            file,
            line,
            condition,
        } => {
            if *line == 0 {
                return Err(Error::InvalidArgument("line numbers start at 1".to_string()).into());
            }
            let file = existing_path(file, "breakpoint file")?;
            registry.set(&file, *line, condition.clone())?;
            println!("{} Breakpoint at {}:{}", "✓".bright_green(), file.display(), line);
        }
        BreakpointsCommand::Clear { file, line } => {
            let file = file.canonicalize().unwrap_or_else(|_| file.clone());
            registry.clear(&file, *line)?;
            println!("{} Cleared {}:{}", "✓".bright_green(), file.display(), line);
        }
        BreakpointsCommand::ClearAll => {
            let count = registry.count();
            registry.clear_all()?;
            println!("{} Cleared {} breakpoints", "✓".bright_green(), count);
        }
    }
    Ok(0)
}

pub(super) fn history(command: &HistoryCommand, config: &Config) -> Result<i32> {
    let mut history = open_history(config);

    match command {
        HistoryCommand::List => {
            if history.is_empty() {
                println!("No analyses recorded");
            }
            for (index, (target, outcome)) in history.history().iter().enumerate() {
                let rate = outcome
                    .rate
                    .map(|r| format!("{:.2}/10", r))
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:>3}  {:<8} {:<20} {:>8}  {}  {}",
                    index,
                    outcome.request.analyzer_kind.to_string(),
                    outcome.exit_status.to_string(),
                    rate,
                    outcome.finished_at.format("%Y-%m-%d %H:%M:%S"),
                    target.display()
                );
            }
        }
        HistoryCommand::Purge => {
            let removed = history.purge_obsolete();
            history.flush();
            println!("{} Removed {} obsolete entries", "✓".bright_green(), removed);
        }
        HistoryCommand::Show { target } => {
            let target = target.canonicalize().unwrap_or_else(|_| target.clone());
            match history.find(&target) {
                Some((_, outcome)) => println!("{}", serde_json::to_string_pretty(outcome)?),
                None => {
                    return Err(Error::InvalidArgument(format!(
                        "no history for {}",
                        target.display()
                    ))
                    .into())
                }
            }
        }
    }
    Ok(0)
}

pub(super) fn config(command: ConfigCommand) -> Result<i32> {
    match command {
        ConfigCommand::Init => {
            let path = Config::ensure_exists()?;
            println!("{}", path.display());
        }
        ConfigCommand::Path => println!("{}", Config::default_path().display()),
        ConfigCommand::Sample => print!("{}", generate_sample_config()),
    }
    Ok(0)
}
