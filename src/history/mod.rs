//! History module - bounded record of analysis outcomes per target
//!
//! The newest outcome sits at index 0. Persistence is a JSON array
//! `[VERSION, [target, outcome], ...]` written by a background thread so
//! the host never waits on disk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, unbounded, Sender};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::analyzer::AnalysisOutcome;
use crate::core::atomic_write;
use crate::error::{Error, Result};
use crate::search::SearchOutcome;

/// Format version written at the head of the history file
pub const HISTORY_VERSION: u64 = 1;

/// Extensions recognized as analyzable modules
pub const MODULE_EXTENSIONS: &[&str] = &["py", "pyw"];

/// Package marker looked for in directories
pub const PACKAGE_MARKER: &str = "__init__.py";

/// True for a module file or a package directory
pub fn is_module_or_package(path: &Path) -> bool {
    if path.is_file() {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| MODULE_EXTENSIONS.contains(&ext))
    } else if path.is_dir() {
        path.join(PACKAGE_MARKER).is_file()
    } else {
        false
    }
}

enum WriterMessage {
    Write(Vec<u8>),
    Flush(Sender<()>),
}

/// Single thread applying writes in the order they were queued
struct Writer {
    tx: Option<Sender<WriterMessage>>,
    thread: Option<JoinHandle<()>>,
}

impl Writer {
    fn spawn(path: PathBuf) -> Self {
        let (tx, rx) = unbounded::<WriterMessage>();
        let thread = std::thread::Builder::new()
            .name("sleuth-history".to_string())
            .spawn(move || {
                for message in rx {
                    match message {
                        WriterMessage::Write(data) => {
                            if let Err(e) = atomic_write(&path, &data) {
                                warn!("Failed to save history to {}: {}", path.display(), e);
                            }
                        }
                        WriterMessage::Flush(done) => {
                            let _ = done.send(());
                        }
                    }
                }
            });

        match thread {
            Ok(thread) => Self {
                tx: Some(tx),
                thread: Some(thread),
            },
            Err(e) => {
                warn!("History writer unavailable, history will not be saved: {}", e);
                Self {
                    tx: None,
                    thread: None,
                }
            }
        }
    }

    fn send(&self, message: WriterMessage) -> bool {
        self.tx.as_ref().is_some_and(|tx| tx.send(message).is_ok())
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Per-target history of analysis outcomes plus the latest search of each
/// coordinator
pub struct ResultAggregator {
    max_entries: usize,
    entries: Vec<(PathBuf, AnalysisOutcome)>,
    searches: HashMap<String, SearchOutcome>,
    writer: Option<Writer>,
}

impl ResultAggregator {
    /// In-memory history, never persisted
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries,
            entries: Vec::new(),
            searches: HashMap::new(),
            writer: None,
        }
    }

    /// History backed by `path`. A missing, unreadable or unrecognized file
    /// starts an empty history.
    pub fn open(path: &Path, max_entries: usize) -> Self {
        let mut entries = load_entries(path);
        entries.truncate(max_entries);
        debug!("Loaded {} history entries from {}", entries.len(), path.display());

        Self {
            max_entries,
            entries,
            searches: HashMap::new(),
            writer: Some(Writer::spawn(path.to_path_buf())),
        }
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Insert `outcome` at the head, replacing any older record of `target`
    pub fn record(&mut self, target: &Path, outcome: AnalysisOutcome) {
        self.entries.retain(|(t, _)| t != target);
        self.entries.insert(0, (target.to_path_buf(), outcome));
        self.entries.truncate(self.max_entries);
        self.persist();
    }

    /// Position and outcome of the record for `target`
    pub fn find(&self, target: &Path) -> Option<(usize, &AnalysisOutcome)> {
        self.entries
            .iter()
            .position(|(t, _)| t == target)
            .map(|i| (i, &self.entries[i].1))
    }

    /// Records newest-first
    pub fn history(&self) -> &[(PathBuf, AnalysisOutcome)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop records whose target is no longer a module or package.
    /// Returns how many were removed.
    pub fn purge_obsolete(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(target, _)| is_module_or_package(target));
        let removed = before - self.entries.len();
        if removed > 0 {
            info!("Purged {} obsolete history entries", removed);
            self.persist();
        }
        removed
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.persist();
    }

    /// Remember the latest search of `coordinator`
    pub fn record_search(&mut self, coordinator: &str, outcome: SearchOutcome) {
        self.searches.insert(coordinator.to_string(), outcome);
    }

    pub fn last_search(&self, coordinator: &str) -> Option<&SearchOutcome> {
        self.searches.get(coordinator)
    }

    /// Block until every queued write is on disk
    pub fn flush(&self) {
        let Some(writer) = &self.writer else {
            return;
        };
        let (done_tx, done_rx) = bounded(1);
        if writer.send(WriterMessage::Flush(done_tx)) {
            let _ = done_rx.recv();
        }
    }

    fn persist(&self) {
        let Some(writer) = &self.writer else {
            return;
        };
        match encode_entries(&self.entries) {
            Ok(data) => {
                writer.send(WriterMessage::Write(data));
            }
            Err(e) => warn!("Failed to serialize history: {}", e),
        }
    }
}

fn encode_entries(entries: &[(PathBuf, AnalysisOutcome)]) -> serde_json::Result<Vec<u8>> {
    let mut items = Vec::with_capacity(entries.len() + 1);
    items.push(Value::from(HISTORY_VERSION));
    for entry in entries {
        items.push(serde_json::to_value(entry)?);
    }
    serde_json::to_vec_pretty(&Value::Array(items))
}

fn load_entries(path: &Path) -> Vec<(PathBuf, AnalysisOutcome)> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            warn!("Cannot read history {}: {}. Starting fresh.", path.display(), e);
            return Vec::new();
        }
    };

    match decode_entries(&data, path) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("{}. Starting fresh.", e);
            Vec::new()
        }
    }
}

fn decode_entries(data: &[u8], path: &Path) -> Result<Vec<(PathBuf, AnalysisOutcome)>> {
    let corrupt = |reason: String| Error::PersistenceCorrupt {
        path: path.to_path_buf(),
        reason,
    };

    let value: Value = serde_json::from_slice(data).map_err(|e| corrupt(e.to_string()))?;
    let Value::Array(mut items) = value else {
        return Err(corrupt("not a list".to_string()));
    };
    if items.is_empty() {
        return Err(corrupt("missing version".to_string()));
    }

    match items.remove(0).as_u64() {
        Some(HISTORY_VERSION) => {}
        Some(other) => return Err(corrupt(format!("unsupported version {}", other))),
        None => return Err(corrupt("missing version".to_string())),
    }

    items
        .into_iter()
        .map(|item| serde_json::from_value(item).map_err(|e| corrupt(e.to_string())))
        .collect()
}
