//! Breakpoint tree: one node per file, one row per breakpoint

use super::{NodeKind, ResultTreeModel};
use crate::breakpoints::BreakpointSet;

pub(super) fn build(model: &mut ResultTreeModel, set: &BreakpointSet) {
    for (path, breakpoints) in set {
        let file = model.push(None, path.display().to_string(), NodeKind::File);
        model.nodes[file].location = Some((path.clone(), 1));

        for breakpoint in breakpoints {
            let row = model.push(
                Some(file),
                format!("line {}", breakpoint.line),
                NodeKind::Breakpoint,
            );
            let node = &mut model.nodes[row];
            node.location = Some((path.clone(), breakpoint.line));
            node.detail = breakpoint.condition.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breakpoints::Breakpoint;
    use crate::events::{Event, EventBus};
    use crate::tree::{Activation, Column, TreeOutcome};
    use std::path::PathBuf;

    fn sample() -> BreakpointSet {
        let mut set = BreakpointSet::new();
        set.insert(
            PathBuf::from("/f.py"),
            vec![
                Breakpoint {
                    line: 3,
                    condition: None,
                },
                Breakpoint {
                    line: 10,
                    condition: Some("x>0".to_string()),
                },
            ],
        );
        set
    }

    #[test]
    fn test_rows_and_render() {
        let mut model = ResultTreeModel::new(EventBus::new());
        model.set_outcome(TreeOutcome::Breakpoints(sample()));
        assert_eq!(
            model.render(),
            "- /f.py\n    line 3\n    line 10  [x>0]\n"
        );
    }

    #[test]
    fn test_condition_column_requests_edit() {
        let events = EventBus::new();
        let rx = events.subscribe();
        let mut model = ResultTreeModel::new(events);
        model.set_outcome(TreeOutcome::Breakpoints(sample()));

        let file = model.roots()[0];
        let row = model.children(file)[1];

        assert_eq!(
            model.activate_column(row, Column::Condition),
            Some(Activation::EditCondition {
                path: PathBuf::from("/f.py"),
                line: 10
            })
        );
        assert_eq!(model.activate(row), Some((PathBuf::from("/f.py"), 10)));
        // A file row has no condition to edit
        assert_eq!(
            model.activate_column(file, Column::Condition),
            Some(Activation::Open {
                path: PathBuf::from("/f.py"),
                line: 1
            })
        );

        let events: Vec<Event> = rx.try_iter().collect();
        assert!(matches!(
            &events[0],
            Event::TreeEditCondition { line: 10, .. }
        ));
        assert!(matches!(&events[1], Event::TreeActivate { line: 10, .. }));
        assert_eq!(events.len(), 3);
    }
}
