//! Observable events emitted by the pipeline components
//!
//! Components receive an [`EventBus`] explicitly; the host subscribes and
//! drains its receiver on its own thread.

use std::path::PathBuf;
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::analyzer::ExitStatus;
use crate::search::SearchOutcome;

/// Everything a component can tell the host about
#[derive(Debug, Clone)]
pub enum Event {
    /// `search.matches_updated`
    SearchMatchesUpdated(SearchOutcome),
    /// `search.complete`
    SearchComplete {
        outcome: SearchOutcome,
        completed: bool,
    },
    /// `analyzer.stdout_available`
    AnalyzerStdoutAvailable,
    /// `analyzer.stderr_available`
    AnalyzerStderrAvailable,
    /// `analyzer.finished`
    AnalyzerFinished(ExitStatus),
    /// `treemodel.activate`
    TreeActivate { path: PathBuf, line: usize },
    /// `treemodel.edit_condition`
    TreeEditCondition { path: PathBuf, line: usize },
    /// `breakpoints.changed`
    BreakpointsChanged,
}

impl Event {
    /// Dotted event name, as used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Event::SearchMatchesUpdated(_) => "search.matches_updated",
            Event::SearchComplete { .. } => "search.complete",
            Event::AnalyzerStdoutAvailable => "analyzer.stdout_available",
            Event::AnalyzerStderrAvailable => "analyzer.stderr_available",
            Event::AnalyzerFinished(_) => "analyzer.finished",
            Event::TreeActivate { .. } => "treemodel.activate",
            Event::TreeEditCondition { .. } => "treemodel.edit_condition",
            Event::BreakpointsChanged => "breakpoints.changed",
        }
    }
}

/// Fan-out of events to any number of subscribers
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<Sender<Event>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber
    pub fn subscribe(&self) -> Receiver<Event> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Deliver an event to every live subscriber
    pub fn emit(&self, event: Event) {
        tracing::trace!("event {}", event.name());
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fan_out() {
        let bus = EventBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();

        bus.emit(Event::BreakpointsChanged);

        assert!(matches!(a.try_recv(), Ok(Event::BreakpointsChanged)));
        assert!(matches!(b.try_recv(), Ok(Event::BreakpointsChanged)));
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let bus = EventBus::new();
        let keep = bus.subscribe();
        drop(bus.subscribe());
        assert_eq!(bus.subscriber_count(), 2);

        bus.emit(Event::AnalyzerStdoutAvailable);
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(keep.len(), 1);
    }

    #[test]
    fn test_event_names() {
        let event = Event::TreeActivate {
            path: PathBuf::from("/f.py"),
            line: 3,
        };
        assert_eq!(event.name(), "treemodel.activate");
    }
}
