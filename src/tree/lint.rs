//! Lint tree: severity buckets, modules, diagnostics

use super::{NodeKind, ResultTreeModel};
use crate::analyzer::{AnalysisOutcome, Diagnostic, Severity};

pub(super) fn build(model: &mut ResultTreeModel, outcome: &AnalysisOutcome) {
    let target = &outcome.request.target_path;
    let fallback_module = target
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    for severity in Severity::ALL {
        let diagnostics = outcome
            .diagnostics
            .get(&severity)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        let bucket = model.push(
            None,
            format!("{} ({})", severity.label(), diagnostics.len()),
            NodeKind::Severity,
        );
        model.nodes[bucket].enabled = !diagnostics.is_empty();

        // Modules in order of first appearance
        let mut modules: Vec<(&str, usize)> = Vec::new();
        for diagnostic in diagnostics {
            let module = diagnostic.module_qualifier.as_str();
            let module_node = match modules.iter().find(|(name, _)| *name == module) {
                Some(&(_, idx)) => idx,
                None => {
                    let label = if module.is_empty() {
                        fallback_module.clone()
                    } else {
                        module.to_string()
                    };
                    let idx = model.push(Some(bucket), label, NodeKind::Module);
                    model.nodes[idx].location = Some((target.clone(), 1));
                    modules.push((module, idx));
                    idx
                }
            };

            let leaf = model.push(Some(module_node), label(diagnostic), NodeKind::Diagnostic);
            model.nodes[leaf].location = Some((target.clone(), diagnostic.line_number));
        }
    }
}

fn label(d: &Diagnostic) -> String {
    if d.object.is_empty() {
        format!("{}: {} {}", d.line_number, d.message_id, d.message)
    } else {
        format!("{}: {} {}: {}", d.line_number, d.message_id, d.object, d.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::{AnalysisRequest, AnalyzerKind, LintFormat, LintReport};
    use crate::events::EventBus;
    use crate::tree::TreeOutcome;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn outcome(stdout: &str) -> AnalysisOutcome {
        let request = AnalysisRequest {
            target_path: PathBuf::from("/src/alpha.py"),
            program: "pylint".to_string(),
            arguments: Vec::new(),
            working_dir: PathBuf::from("/src"),
            environment_overlay: BTreeMap::new(),
            analyzer_kind: AnalyzerKind::Lint,
        };
        let mut outcome = AnalysisOutcome::launch_failed(request, String::new());
        LintReport::parse(stdout, LintFormat::Template).apply(&mut outcome);
        outcome
    }

    #[test]
    fn test_buckets_modules_and_leaves() {
        let mut model = ResultTreeModel::new(EventBus::new());
        model.set_outcome(TreeOutcome::Lint(outcome(
            "************* Module alpha\n\
             C0114:  1,0: : Missing docstring\n\
             W0611:  2,4: : Unused import os\n\
             W0612:  9,4: main: Unused variable 'x'\n",
        )));

        let roots = model.roots().to_vec();
        let labels: Vec<&str> = roots
            .iter()
            .map(|&i| model.node(i).unwrap().label.as_str())
            .collect();
        assert_eq!(
            labels,
            vec!["Convention (1)", "Refactor (0)", "Warning (2)", "Error (0)", "Fatal (0)"]
        );
        assert!(model.node(roots[0]).unwrap().enabled);
        assert!(!model.node(roots[1]).unwrap().enabled);

        let warning_modules = model.children(roots[2]);
        assert_eq!(warning_modules.len(), 1);
        assert_eq!(model.node(warning_modules[0]).unwrap().label, "alpha");

        let leaves = model.children(warning_modules[0]).to_vec();
        assert_eq!(
            model.node(leaves[1]).unwrap().label,
            "9: W0612 main: Unused variable 'x'"
        );
        assert_eq!(
            model.activate(leaves[1]),
            Some((PathBuf::from("/src/alpha.py"), 9))
        );
    }

    #[test]
    fn test_unnamed_module_uses_target_stem() {
        let mut model = ResultTreeModel::new(EventBus::new());
        model.set_outcome(TreeOutcome::Lint(outcome("E0602:  3,0: : Undefined name\n")));
        let error_bucket = model.roots()[3];
        let module = model.children(error_bucket)[0];
        assert_eq!(model.node(module).unwrap().label, "alpha");
    }
}
