//! Profile tree: the root function and its callees, built lazily
//!
//! A callee already present on the path from the root becomes a recursion
//! marker and is never descended into.

use std::collections::HashSet;
use std::path::PathBuf;

use super::{NodeKind, ResultTreeModel};
use crate::analyzer::{ProfileGraph, ProfileKind, ProfileNode};

pub(super) fn build(model: &mut ResultTreeModel, graph: ProfileGraph) {
    let root = graph.root();
    model.profile = Some(graph);
    let Some(root) = root else {
        return;
    };
    push_function(model, None, root, false);
}

/// Create the children of `idx` if they do not exist yet
pub(super) fn populate(model: &mut ResultTreeModel, idx: usize) {
    if model.nodes[idx].populated {
        return;
    }
    model.nodes[idx].populated = true;

    let Some(graph_idx) = model.nodes[idx].profile_index else {
        return;
    };
    let Some(graph) = model.profile.as_ref() else {
        return;
    };
    let callees = graph.callees(graph_idx);

    let mut on_path = HashSet::new();
    let mut cursor = Some(idx);
    while let Some(i) = cursor {
        if let Some(g) = model.nodes[i].profile_index {
            on_path.insert(g);
        }
        cursor = model.nodes[i].parent;
    }

    for callee in callees {
        push_function(model, Some(idx), callee, on_path.contains(&callee));
    }
}

fn push_function(
    model: &mut ResultTreeModel,
    parent: Option<usize>,
    graph_idx: usize,
    recursion: bool,
) {
    let Some(node) = model.profile.as_ref().and_then(|g| g.node(graph_idx)) else {
        return;
    };
    let (label, kind, location) = describe(node, recursion);

    let idx = model.push(parent, label, kind);
    let tree_node = &mut model.nodes[idx];
    tree_node.profile_index = Some(graph_idx);
    tree_node.location = location;
    tree_node.populated = recursion;
}

fn describe(node: &ProfileNode, recursion: bool) -> (String, NodeKind, Option<(PathBuf, usize)>) {
    let location = if node.kind == ProfileKind::Builtin || node.key.filename.is_empty() {
        None
    } else {
        Some((PathBuf::from(&node.key.filename), node.key.line.max(1) as usize))
    };

    if recursion {
        return (
            format!("(recursion) {}", node.key),
            NodeKind::Recursion,
            location,
        );
    }

    let calls = if node.primitive_calls == node.total_calls {
        node.total_calls.to_string()
    } else {
        format!("{}/{}", node.total_calls, node.primitive_calls)
    };
    let label = format!(
        "{}  {:.3}s cumulative, {:.3}s self, {} calls",
        node.key, node.cumulative_time, node.self_time, calls
    );
    (label, NodeKind::Function(node.kind), location)
}
