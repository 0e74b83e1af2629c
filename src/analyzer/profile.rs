//! Profile analyzer - statistics file loading and the call graph
//!
//! The graph is an arena: nodes are addressed by index and the caller and
//! callee relations are index sets, so cycles need no special handling.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::marshal::{self, Value};
use super::{AnalysisOutcome, AnalysisRequest, AnalyzerKind, AnalyzerRunner};
use crate::error::{Error, Result};

/// Identity of a profiled function
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FuncKey {
    pub filename: String,
    pub line: u32,
    pub function: String,
}

impl FuncKey {
    pub fn new(filename: impl Into<String>, line: u32, function: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            line,
            function: function.into(),
        }
    }

    /// Entries the profiler adds for its own bookkeeping
    pub fn is_profiler_overhead(&self) -> bool {
        (self.filename.is_empty() && self.function == "profiler:0(profiler)")
            || (self.filename == "~"
                && self.function == "<method 'disable' of '_lsprof.Profiler' objects>")
    }

    pub fn kind(&self) -> ProfileKind {
        if self.filename == "~" {
            ProfileKind::Builtin
        } else if self.function == "<module>" {
            ProfileKind::Module
        } else if self.function == "__init__" {
            ProfileKind::Constructor
        } else {
            ProfileKind::Function
        }
    }
}

impl fmt::Display for FuncKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.filename == "~" {
            write!(f, "{}", self.function)
        } else {
            write!(f, "{} ({}:{})", self.function, self.filename, self.line)
        }
    }
}

/// What a node stands for in the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProfileKind {
    Module,
    Function,
    Builtin,
    Constructor,
    /// A function already on the path from the root
    Recursion,
}

/// Per-function numbers from the statistics file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FuncStats {
    pub primitive_calls: u64,
    pub total_calls: u64,
    /// Seconds spent in the function itself
    pub self_time: f64,
    /// Seconds including callees
    pub cumulative_time: f64,
    pub callers: Vec<FuncKey>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProfileNode {
    pub key: FuncKey,
    pub primitive_calls: u64,
    pub total_calls: u64,
    pub self_time: f64,
    pub cumulative_time: f64,
    pub kind: ProfileKind,
    pub callers: BTreeSet<usize>,
    pub callees: BTreeSet<usize>,
}

/// Call graph built from one statistics file
#[derive(Debug, Clone, Default)]
pub struct ProfileGraph {
    nodes: Vec<ProfileNode>,
    index: HashMap<FuncKey, usize>,
}

impl ProfileGraph {
    /// Build a graph; callers missing from `entries` get a node with zero stats
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (FuncKey, FuncStats)>,
    {
        let mut graph = Self::default();
        let mut edges = Vec::new();

        for (key, stats) in entries {
            let idx = graph.intern(key);
            let node = &mut graph.nodes[idx];
            node.primitive_calls = stats.primitive_calls;
            node.total_calls = stats.total_calls;
            node.self_time = stats.self_time;
            node.cumulative_time = stats.cumulative_time;
            edges.push((idx, stats.callers));
        }

        for (callee, callers) in edges {
            for caller_key in callers {
                let caller = graph.intern(caller_key);
                graph.nodes[callee].callers.insert(caller);
                graph.nodes[caller].callees.insert(callee);
            }
        }

        graph
    }

    fn intern(&mut self, key: FuncKey) -> usize {
        if let Some(&idx) = self.index.get(&key) {
            return idx;
        }
        let idx = self.nodes.len();
        self.nodes.push(ProfileNode {
            kind: key.kind(),
            key: key.clone(),
            primitive_calls: 0,
            total_calls: 0,
            self_time: 0.0,
            cumulative_time: 0.0,
            callers: BTreeSet::new(),
            callees: BTreeSet::new(),
        });
        self.index.insert(key, idx);
        idx
    }

    /// Load a statistics file. Unreadable or malformed input gives an
    /// empty graph.
    pub fn load(path: &Path) -> Self {
        let result = std::fs::read(path)
            .map_err(Error::from)
            .and_then(|data| marshal::decode(&data))
            .and_then(|value| Self::from_marshal(&value));
        match result {
            Ok(graph) => {
                debug!("Loaded {} profiled functions from {}", graph.len(), path.display());
                graph
            }
            Err(e) => {
                warn!("Ignoring profile statistics {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Interpret a decoded statistics dictionary
    pub fn from_marshal(value: &Value) -> Result<Self> {
        let entries = value
            .as_dict()
            .ok_or_else(|| Error::MalformedOutput("statistics are not a dict".to_string()))?;

        let mut parsed = Vec::with_capacity(entries.len());
        for (key, stats) in entries {
            let key = func_key(key)?;
            let fields = stats
                .as_tuple()
                .filter(|f| f.len() >= 5)
                .ok_or_else(|| Error::MalformedOutput(format!("bad statistics for {}", key)))?;

            let number = |v: &Value| {
                v.as_float()
                    .ok_or_else(|| Error::MalformedOutput(format!("bad number for {}", key)))
            };
            let callers = match fields[4].as_dict() {
                Some(callers) => callers
                    .iter()
                    .map(|(caller, _)| func_key(caller))
                    .collect::<Result<Vec<_>>>()?,
                None => Vec::new(),
            };

            parsed.push((
                key.clone(),
                FuncStats {
                    primitive_calls: number(&fields[0])?.max(0.0) as u64,
                    total_calls: number(&fields[1])?.max(0.0) as u64,
                    self_time: number(&fields[2])?,
                    cumulative_time: number(&fields[3])?,
                    callers,
                },
            ));
        }

        Ok(Self::from_entries(parsed))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, idx: usize) -> Option<&ProfileNode> {
        self.nodes.get(idx)
    }

    pub fn nodes(&self) -> &[ProfileNode] {
        &self.nodes
    }

    pub fn find(&self, key: &FuncKey) -> Option<usize> {
        self.index.get(key).copied()
    }

    /// Highest cumulative time, skipping profiler overhead
    pub fn root(&self) -> Option<usize> {
        self.by_cumulative(0..self.nodes.len())
            .into_iter()
            .find(|&idx| !self.nodes[idx].key.is_profiler_overhead())
    }

    /// Callees of `idx`, most expensive first
    pub fn callees(&self, idx: usize) -> Vec<usize> {
        match self.nodes.get(idx) {
            Some(node) => self.by_cumulative(node.callees.iter().copied()),
            None => Vec::new(),
        }
    }

    fn by_cumulative(&self, indices: impl Iterator<Item = usize>) -> Vec<usize> {
        let mut sorted: Vec<usize> = indices.collect();
        sorted.sort_by(|&a, &b| {
            let (na, nb) = (&self.nodes[a], &self.nodes[b]);
            nb.cumulative_time
                .total_cmp(&na.cumulative_time)
                .then_with(|| na.key.cmp(&nb.key))
        });
        sorted
    }
}

fn func_key(value: &Value) -> Result<FuncKey> {
    let bad = || Error::MalformedOutput("bad function key".to_string());
    let parts = value.as_tuple().filter(|p| p.len() == 3).ok_or_else(bad)?;
    Ok(FuncKey {
        filename: parts[0].as_str().ok_or_else(bad)?.to_string(),
        line: parts[1]
            .as_int()
            .and_then(|l| u32::try_from(l).ok())
            .ok_or_else(bad)?,
        function: parts[2].as_str().ok_or_else(bad)?.to_string(),
    })
}

/// Forward slashes for a path handed to the interpreter, on platforms
/// where `separator` is a backslash
pub fn normalize_separators(path: &str, separator: char) -> String {
    if separator == '\\' {
        path.replace('\\', "/")
    } else {
        path.to_string()
    }
}

/// Interpreter arguments profiling `target` into `out_path`
pub fn build_arguments(target: &Path, out_path: &Path, user_args: &[String]) -> Vec<String> {
    let target = normalize_separators(&target.to_string_lossy(), std::path::MAIN_SEPARATOR);
    let mut args = vec![
        "-m".to_string(),
        "cProfile".to_string(),
        "-o".to_string(),
        out_path.to_string_lossy().into_owned(),
        target,
    ];
    args.extend(user_args.iter().cloned());
    args
}

/// Fresh location for a statistics file
pub fn stats_output_path() -> PathBuf {
    std::env::temp_dir().join(format!("sleuth-profile-{}.prof", uuid::Uuid::new_v4()))
}

/// Load the statistics file named by `outcome`, then remove it. The
/// outcome no longer refers to a file afterwards.
pub fn take_graph(outcome: &mut AnalysisOutcome) -> ProfileGraph {
    let Some(path) = outcome.stats_path.take() else {
        return ProfileGraph::default();
    };
    let graph = ProfileGraph::load(&path);
    if let Err(e) = std::fs::remove_file(&path) {
        warn!("Could not remove statistics file {}: {}", path.display(), e);
    }
    graph
}

/// Profile `target` under `interpreter`
pub async fn run_profile(
    runner: &AnalyzerRunner,
    interpreter: &str,
    target: &Path,
    user_args: &[String],
) -> Result<AnalysisOutcome> {
    if !target.is_file() {
        return Err(Error::InvalidArgument(format!(
            "profile target {} is not a file",
            target.display()
        )));
    }

    let out_path = stats_output_path();
    let working_dir = AnalysisRequest::target_dir(target);
    let mut request = AnalysisRequest {
        target_path: target.to_path_buf(),
        program: interpreter.to_string(),
        arguments: build_arguments(target, &out_path, user_args),
        working_dir: working_dir.clone(),
        environment_overlay: Default::default(),
        analyzer_kind: AnalyzerKind::Profile,
    };
    request.environment_overlay.insert(
        "PYTHONPATH".to_string(),
        working_dir.to_string_lossy().into_owned(),
    );

    let mut outcome = runner.run(request).await;
    if out_path.is_file() {
        outcome.stats_path = Some(out_path);
    } else {
        debug!("Profiler wrote no statistics for {}", target.display());
    }
    Ok(outcome)
}
