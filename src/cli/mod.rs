//! CLI module - Command line interface definitions and dispatch

mod handlers;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use crate::config::Config;

/// Sleuth - code search, lint and profile results for Python projects
///
/// Searches source trees, runs the lint analyzer and the profiler, and keeps
/// breakpoints and analysis history across sessions.
#[derive(Parser, Debug)]
#[command(name = "sleuth")]
#[command(version)]
#[command(about = "Code search, lint and profiling pipeline", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbose output (debug logging)
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Configuration file (default: per-user config directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Search file contents under a directory
    Search(SearchArgs),

    /// Run the lint analyzer on a module
    Lint(LintArgs),

    /// Run a script under the profiler and show its call tree
    Profile(ProfileArgs),

    /// Manage persistent breakpoints
    #[command(subcommand)]
    Breakpoints(BreakpointsCommand),

    /// Inspect analysis history
    #[command(subcommand)]
    History(HistoryCommand),

    /// Manage the configuration file
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, Clone, Args)]
pub struct SearchArgs {
    /// Directory to search (or any path inside the repository with --vcs)
    pub root: PathBuf,

    /// Text to look for
    pub text: String,

    /// Treat the text as a regular expression
    #[arg(long, short)]
    pub regex: bool,

    /// File name filter (regex, or glob such as *.py)
    #[arg(long, short)]
    pub include: Option<String>,

    /// Path filter for files and directories
    #[arg(long, short)]
    pub exclude: Option<String>,

    /// Search the files tracked by version control
    #[arg(long)]
    pub vcs: bool,

    /// Search the runtime module path instead of ROOT
    #[arg(long)]
    pub runtime_path: bool,

    /// Encodings to try, in order (repeatable)
    #[arg(long = "encoding", value_name = "LABEL")]
    pub encodings: Vec<String>,

    /// Print the outcome as JSON
    #[arg(long, conflicts_with = "tree")]
    pub json: bool,

    /// Print the outcome as a tree
    #[arg(long)]
    pub tree: bool,
}

#[derive(Debug, Clone, Args)]
pub struct LintArgs {
    /// Module to analyze
    pub target: PathBuf,

    /// Analyzer executable (default from config)
    #[arg(long)]
    pub executable: Option<String>,

    #[arg(long, conflicts_with = "tree")]
    pub json: bool,

    #[arg(long)]
    pub tree: bool,
}

#[derive(Debug, Clone, Args)]
pub struct ProfileArgs {
    /// Script to profile
    pub target: PathBuf,

    /// Interpreter (default from config)
    #[arg(long)]
    pub interpreter: Option<String>,

    /// Call tree levels to show
    #[arg(long, short)]
    pub depth: Option<usize>,

    #[arg(long)]
    pub json: bool,

    /// Arguments passed to the script
    #[arg(last = true)]
    pub args: Vec<String>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum BreakpointsCommand {
    /// Show all breakpoints
    List {
        #[arg(long)]
        json: bool,
    },
    /// Set or replace a breakpoint
    Set {
        file: PathBuf,
        line: usize,
        /// Stop only when this expression is true
        #[arg(long, short)]
        condition: Option<String>,
    },
    /// Remove one breakpoint
    Clear { file: PathBuf, line: usize },
    /// Remove every breakpoint
    ClearAll,
}

#[derive(Subcommand, Debug, Clone)]
pub enum HistoryCommand {
    /// List recorded analyses, newest first
    List,
    /// Drop entries whose target is no longer a module or package
    Purge,
    /// Print the recorded outcome for a target as JSON
    Show { target: PathBuf },
}

#[derive(Subcommand, Debug, Clone, Copy)]
pub enum ConfigCommand {
    /// Create the default config file if missing
    Init,
    /// Print the config file location
    Path,
    /// Print a commented sample config
    Sample,
}

/// Run a parsed command line. Returns the process exit code.
pub async fn run(cli: Cli, config: Config) -> Result<i32> {
    match cli.command {
        Commands::Search(args) => handlers::search(&args, &config),
        Commands::Lint(args) => handlers::lint(&args, &config).await,
        Commands::Profile(args) => handlers::profile(&args, &config).await,
        Commands::Breakpoints(command) => handlers::breakpoints(&command, &config),
        Commands::History(command) => handlers::history(&command, &config),
        Commands::Config(command) => handlers::config(command),
    }
}

/// Exit code for an error that reached the top level
pub fn exit_code(error: &anyhow::Error) -> i32 {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<crate::Error>())
        .map(crate::Error::exit_code)
        .unwrap_or(4)
}
