//! Search tree: common directory, intermediate directories, files, lines

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use super::{NodeKind, ResultTreeModel};
use crate::search::{FileMatch, SearchOutcome};

pub(super) fn build(model: &mut ResultTreeModel, outcome: &SearchOutcome) {
    let files: Vec<&PathBuf> = outcome
        .matches
        .iter()
        .filter(|(_, m)| !m.is_empty())
        .map(|(p, _)| p)
        .collect();
    let Some(common) = common_directory(&files) else {
        return;
    };

    let root = model.push(None, common.display().to_string(), NodeKind::Directory);
    let mut dirs: HashMap<PathBuf, usize> = HashMap::new();
    dirs.insert(common.clone(), root);

    for path in files {
        let parent = path.parent().unwrap_or(&common);
        let dir_node = directory_node(model, &mut dirs, &common, parent);

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let file_node = model.push(Some(dir_node), name, NodeKind::File);
        model.nodes[file_node].location = Some((path.clone(), 1));

        for (line, label) in line_labels(outcome.matches_for(path)) {
            let leaf = model.push(Some(file_node), label, NodeKind::Match);
            model.nodes[leaf].location = Some((path.clone(), line));
        }
    }
}

/// Node for `dir`, creating the directories between `common` and it
fn directory_node(
    model: &mut ResultTreeModel,
    dirs: &mut HashMap<PathBuf, usize>,
    common: &Path,
    dir: &Path,
) -> usize {
    if let Some(&idx) = dirs.get(dir) {
        return idx;
    }
    let parent_dir = dir.parent().filter(|p| p.starts_with(common)).unwrap_or(common);
    let parent = directory_node(model, dirs, common, parent_dir);

    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| dir.display().to_string());
    let idx = model.push(Some(parent), name, NodeKind::Directory);
    dirs.insert(dir.to_path_buf(), idx);
    idx
}

/// Deepest directory containing every file
pub(crate) fn common_directory(files: &[&PathBuf]) -> Option<PathBuf> {
    let mut iter = files.iter();
    let mut common = iter.next()?.parent()?.to_path_buf();
    for path in iter {
        while !path.starts_with(&common) {
            if !common.pop() {
                break;
            }
        }
    }
    Some(common)
}

/// `line (c1, c2): text`, one per matched line in line order
fn line_labels(matches: &[FileMatch]) -> Vec<(usize, String)> {
    let mut lines: BTreeMap<usize, (Vec<usize>, &str)> = BTreeMap::new();
    for m in matches {
        lines
            .entry(m.line_number)
            .or_insert_with(|| (Vec::new(), m.line_text.as_str()))
            .0
            .push(m.column);
    }

    lines
        .into_iter()
        .map(|(line, (columns, text))| {
            let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
            (line, format!("{} ({}): {}", line, columns.join(", "), text.trim()))
        })
        .collect()
}
