//! Sleuth Library
//!
//! The analysis pipeline behind a code editor: content search over source
//! trees, external lint and profile analyzers, bounded result history,
//! persistent breakpoints, and a tree model that shapes every outcome for
//! display.
//!
//! # Components
//!
//! - **Search**: [`SearchCoordinator`] runs one cancellable search at a time on
//!   a worker thread, fed by a [`search::FileEnumerator`]
//! - **Analyzers**: [`AnalyzerRunner`] launches a child process; [`analyzer::lint`]
//!   and [`analyzer::profile`] parse what it produced
//! - **History**: [`ResultAggregator`] keeps the latest outcome per target
//! - **Breakpoints**: [`BreakpointRegistry`] persists breakpoints per file
//! - **Tree**: [`ResultTreeModel`] turns any outcome into a navigable tree
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use sleuth::{EventBus, SearchCoordinator, SearchOptions};
//!
//! fn main() -> sleuth::Result<()> {
//!     let mut coordinator = SearchCoordinator::new("find", EventBus::new());
//!     let options = SearchOptions::new("/src/project")
//!         .with_text("import os")
//!         .include("*.py");
//!
//!     let outcome = coordinator.run_to_completion(options, Duration::from_secs(30))?;
//!     println!("{} matches", outcome.total_match_count);
//!     Ok(())
//! }
//! ```

pub mod analyzer;
pub mod breakpoints;
pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod events;
pub mod history;
pub mod search;
pub mod tree;

// Re-export commonly used types
pub use analyzer::{
    AnalysisOutcome, AnalysisRequest, AnalyzerKind, AnalyzerRunner, Diagnostic, ExitStatus,
    ProfileGraph, Severity,
};
pub use breakpoints::{Breakpoint, BreakpointRegistry, BreakpointSet, ConfigStore, FileStore, MemoryStore};
pub use config::Config;
pub use core::{CancelToken, Progress, RunId};
pub use error::{Error, Result};
pub use events::{Event, EventBus};
pub use history::ResultAggregator;
pub use search::{
    ErrorCode, FileMatch, Needle, RunHandle, SearchCoordinator, SearchOptions, SearchOutcome,
};
pub use tree::{Activation, Column, NodeKind, ResultTreeModel, TreeKind, TreeOutcome};
