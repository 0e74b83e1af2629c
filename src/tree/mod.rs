//! Tree module - outcomes shaped for a generic tree view
//!
//! One [`ResultTreeModel`] serves the four result kinds. Nodes live in a
//! flat arena and refer to each other by index; the builders for each kind
//! are in the submodules.

mod breakpoints;
mod lint;
mod profile;
mod search;

use std::path::PathBuf;

use tracing::debug;

use crate::analyzer::{AnalysisOutcome, ProfileGraph, ProfileKind};
use crate::breakpoints::BreakpointSet;
use crate::events::{Event, EventBus};
use crate::search::SearchOutcome;

/// Default number of profile levels materialized up front
pub const DEFAULT_INITIAL_DEPTH: usize = 3;

/// Which outcome the model currently shows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeKind {
    Search,
    Lint,
    Profile,
    Breakpoints,
}

/// Input to [`ResultTreeModel::set_outcome`]
#[derive(Debug, Clone)]
pub enum TreeOutcome {
    Search(SearchOutcome),
    Lint(AnalysisOutcome),
    Profile(ProfileGraph),
    Breakpoints(BreakpointSet),
}

/// What a node stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Directory,
    File,
    Match,
    Severity,
    Module,
    Diagnostic,
    Function(ProfileKind),
    Recursion,
    Breakpoint,
}

/// Clickable column of a row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Column {
    #[default]
    Label,
    Condition,
}

/// What the host should do after a click
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activation {
    Open { path: PathBuf, line: usize },
    EditCondition { path: PathBuf, line: usize },
}

#[derive(Debug, Clone)]
pub struct TreeNode {
    pub label: String,
    /// Roots are at depth 1
    pub depth: usize,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    pub expanded: bool,
    pub enabled: bool,
    /// File and line to open; line 1 for nodes standing for a whole file
    pub location: Option<(PathBuf, usize)>,
    pub kind: NodeKind,
    /// Second column text, used for breakpoint conditions
    pub detail: Option<String>,
    /// False until the children of a lazy node exist
    pub populated: bool,
    /// Graph index for profile nodes
    pub profile_index: Option<usize>,
}

pub struct ResultTreeModel {
    events: EventBus,
    kind: Option<TreeKind>,
    nodes: Vec<TreeNode>,
    roots: Vec<usize>,
    current_depth: usize,
    initial_depth: usize,
    profile: Option<ProfileGraph>,
}

impl ResultTreeModel {
    pub fn new(events: EventBus) -> Self {
        Self {
            events,
            kind: None,
            nodes: Vec::new(),
            roots: Vec::new(),
            current_depth: 1,
            initial_depth: DEFAULT_INITIAL_DEPTH,
            profile: None,
        }
    }

    /// Profile levels materialized by `set_outcome`, at least 1
    pub fn with_initial_depth(mut self, depth: usize) -> Self {
        self.initial_depth = depth.max(1);
        self
    }

    /// Clear and rebuild from `outcome`
    pub fn set_outcome(&mut self, outcome: TreeOutcome) {
        self.nodes.clear();
        self.roots.clear();
        self.profile = None;

        let kind = match outcome {
            TreeOutcome::Search(outcome) => {
                search::build(self, &outcome);
                TreeKind::Search
            }
            TreeOutcome::Lint(outcome) => {
                lint::build(self, &outcome);
                TreeKind::Lint
            }
            TreeOutcome::Profile(graph) => {
                profile::build(self, graph);
                TreeKind::Profile
            }
            TreeOutcome::Breakpoints(set) => {
                breakpoints::build(self, &set);
                TreeKind::Breakpoints
            }
        };
        self.kind = Some(kind);

        let depth = match kind {
            TreeKind::Profile => self.initial_depth,
            _ => self.max_depth(),
        };
        self.apply_depth(depth.max(1));
        debug!("Tree rebuilt as {:?} with {} nodes", kind, self.nodes.len());
    }

    pub fn kind(&self) -> Option<TreeKind> {
        self.kind
    }

    pub fn roots(&self) -> &[usize] {
        &self.roots
    }

    pub fn node(&self, idx: usize) -> Option<&TreeNode> {
        self.nodes.get(idx)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn current_depth(&self) -> usize {
        self.current_depth
    }

    pub fn children(&self, idx: usize) -> &[usize] {
        self.nodes
            .get(idx)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    /// Location to open for `idx`, announced as `treemodel.activate`
    pub fn activate(&self, idx: usize) -> Option<(PathBuf, usize)> {
        match self.activate_column(idx, Column::Label)? {
            Activation::Open { path, line } => Some((path, line)),
            Activation::EditCondition { .. } => None,
        }
    }

    /// Click on a column of `idx`. The condition column of a breakpoint row
    /// asks for a condition edit; anything else opens the location.
    pub fn activate_column(&self, idx: usize, column: Column) -> Option<Activation> {
        let node = self.nodes.get(idx)?;
        let (path, line) = node.location.clone()?;

        if column == Column::Condition && node.kind == NodeKind::Breakpoint {
            self.events.emit(Event::TreeEditCondition {
                path: path.clone(),
                line,
            });
            return Some(Activation::EditCondition { path, line });
        }

        self.events.emit(Event::TreeActivate {
            path: path.clone(),
            line,
        });
        Some(Activation::Open { path, line })
    }

    /// Expand `idx`, materializing profile children on first use.
    /// Returns the children.
    pub fn expand(&mut self, idx: usize) -> Vec<usize> {
        if idx >= self.nodes.len() {
            return Vec::new();
        }
        if !self.nodes[idx].populated {
            profile::populate(self, idx);
        }
        self.nodes[idx].expanded = true;
        self.nodes[idx].children.clone()
    }

    pub fn collapse(&mut self, idx: usize) {
        if let Some(node) = self.nodes.get_mut(idx) {
            node.expanded = false;
        }
    }

    /// Expand every node above `current_depth + delta` and collapse the
    /// rest. The depth never drops below 1.
    pub fn adjust_depth(&mut self, delta: isize) {
        let target = (self.current_depth as isize + delta).max(1) as usize;
        self.apply_depth(target);
    }

    fn apply_depth(&mut self, depth: usize) {
        self.current_depth = depth;
        let mut stack: Vec<usize> = self.roots.iter().rev().copied().collect();
        while let Some(idx) = stack.pop() {
            if self.nodes[idx].depth < depth {
                if !self.nodes[idx].populated {
                    profile::populate(self, idx);
                }
                self.nodes[idx].expanded = true;
                stack.extend(self.nodes[idx].children.iter().rev().copied());
            } else {
                self.collapse_subtree(idx);
            }
        }
    }

    fn collapse_subtree(&mut self, idx: usize) {
        let mut stack = vec![idx];
        while let Some(i) = stack.pop() {
            self.nodes[i].expanded = false;
            stack.extend(self.nodes[i].children.iter().copied());
        }
    }

    fn max_depth(&self) -> usize {
        self.nodes.iter().map(|n| n.depth).max().unwrap_or(1)
    }

    /// Indented text of the visible rows
    pub fn render(&self) -> String {
        let mut out = String::new();
        let mut stack: Vec<usize> = self.roots.iter().rev().copied().collect();

        while let Some(idx) = stack.pop() {
            let node = &self.nodes[idx];
            let has_children = !node.children.is_empty() || !node.populated;
            let marker = match (has_children, node.expanded) {
                (false, _) => ' ',
                (true, true) => '-',
                (true, false) => '+',
            };

            out.push_str(&"  ".repeat(node.depth - 1));
            out.push(marker);
            out.push(' ');
            out.push_str(&node.label);
            if let Some(detail) = &node.detail {
                out.push_str("  [");
                out.push_str(detail);
                out.push(']');
            }
            out.push('\n');

            if node.expanded {
                stack.extend(node.children.iter().rev().copied());
            }
        }

        out
    }

    /// Append a node, returning its index
    fn push(&mut self, parent: Option<usize>, label: String, kind: NodeKind) -> usize {
        let idx = self.nodes.len();
        let depth = parent.map(|p| self.nodes[p].depth + 1).unwrap_or(1);
        self.nodes.push(TreeNode {
            label,
            depth,
            parent,
            children: Vec::new(),
            expanded: false,
            enabled: true,
            location: None,
            kind,
            detail: None,
            populated: true,
            profile_index: None,
        });
        match parent {
            Some(p) => self.nodes[p].children.push(idx),
            None => self.roots.push(idx),
        }
        idx
    }
}
