//! Breakpoints module - persistent per-file breakpoints with conditions
//!
//! The registry keeps breakpoints sorted by line within each file and saves
//! through a [`ConfigStore`] after every mutation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::atomic_write;
use crate::error::{Error, Result};
use crate::events::{Event, EventBus};

/// Format version of the persisted breakpoint document
pub const BREAKPOINTS_VERSION: u32 = 1;

/// Where the registry keeps its serialized state
pub trait ConfigStore: Send {
    /// Stored document, `None` when nothing was saved yet
    fn load(&self) -> Result<Option<String>>;

    /// Replace the stored document
    fn save(&self, data: &str) -> Result<()>;

    /// Where the document lives, for diagnostics
    fn location(&self) -> PathBuf;
}

/// JSON file on disk, replaced atomically
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigStore for FileStore {
    fn load(&self) -> Result<Option<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, data: &str) -> Result<()> {
        atomic_write(&self.path, data.as_bytes())?;
        Ok(())
    }

    fn location(&self) -> PathBuf {
        self.path.clone()
    }
}

/// Shared in-memory document; clones see the same data
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    data: Arc<Mutex<Option<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Option<String> {
        self.data.lock().clone()
    }
}

impl ConfigStore for MemoryStore {
    fn load(&self) -> Result<Option<String>> {
        Ok(self.data.lock().clone())
    }

    fn save(&self, data: &str) -> Result<()> {
        *self.data.lock() = Some(data.to_string());
        Ok(())
    }

    fn location(&self) -> PathBuf {
        PathBuf::from("<memory>")
    }
}

/// One breakpoint; `condition: None` is unconditional
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Breakpoint {
    pub line: usize,
    pub condition: Option<String>,
}

/// Read-only snapshot: file to breakpoints ordered by line
pub type BreakpointSet = BTreeMap<PathBuf, Vec<Breakpoint>>;

#[derive(Debug, Serialize, Deserialize)]
struct Persisted {
    version: u32,
    breakpoints: BTreeMap<PathBuf, Vec<(usize, Option<String>)>>,
}

/// Parse a stored document, rejecting other format versions
fn decode_persisted(data: &str, location: &Path) -> Result<Persisted> {
    let corrupt = |reason: String| Error::PersistenceCorrupt {
        path: location.to_path_buf(),
        reason,
    };
    let persisted: Persisted = serde_json::from_str(data).map_err(|e| corrupt(e.to_string()))?;
    if persisted.version != BREAKPOINTS_VERSION {
        return Err(corrupt(format!(
            "version {}, expected {}",
            persisted.version, BREAKPOINTS_VERSION
        )));
    }
    Ok(persisted)
}

pub struct BreakpointRegistry {
    store: Box<dyn ConfigStore>,
    events: EventBus,
    breakpoints: BreakpointSet,
}

impl BreakpointRegistry {
    /// Empty registry; call [`BreakpointRegistry::load`] to read the store
    pub fn new(store: Box<dyn ConfigStore>, events: EventBus) -> Self {
        Self {
            store,
            events,
            breakpoints: BreakpointSet::new(),
        }
    }

    /// Replace the in-memory set with the stored one, dropping files that
    /// no longer exist. Unreadable documents start an empty set.
    pub fn load(&mut self) -> Result<()> {
        self.breakpoints.clear();
        let Some(data) = self.store.load()? else {
            return Ok(());
        };

        let persisted = match decode_persisted(&data, &self.store.location()) {
            Ok(persisted) => persisted,
            Err(e) => {
                warn!("{}. Starting fresh.", e);
                return Ok(());
            }
        };

        for (path, entries) in persisted.breakpoints {
            if !path.is_file() {
                debug!("Dropping breakpoints of missing file {}", path.display());
                continue;
            }
            let mut list: Vec<Breakpoint> = entries
                .into_iter()
                .filter(|(line, _)| *line >= 1)
                .map(|(line, condition)| Breakpoint {
                    line,
                    condition: normalize_condition(condition),
                })
                .collect();
            list.sort_by_key(|b| b.line);
            list.dedup_by_key(|b| b.line);
            if !list.is_empty() {
                self.breakpoints.insert(path, list);
            }
        }
        debug!("Loaded breakpoints for {} files", self.breakpoints.len());
        Ok(())
    }

    /// Set a breakpoint, replacing any at the same line
    pub fn set(&mut self, file: &Path, line: usize, condition: Option<String>) -> Result<()> {
        let breakpoint = Breakpoint {
            line,
            condition: normalize_condition(condition),
        };
        let list = self.breakpoints.entry(file.to_path_buf()).or_default();
        match list.binary_search_by_key(&line, |b| b.line) {
            Ok(i) => list[i] = breakpoint,
            Err(i) => list.insert(i, breakpoint),
        }
        debug!("Breakpoint set at {}:{}", file.display(), line);
        self.changed()
    }

    /// Remove the breakpoint at `line`, if any
    pub fn clear(&mut self, file: &Path, line: usize) -> Result<()> {
        let Some(list) = self.breakpoints.get_mut(file) else {
            return Ok(());
        };
        let Ok(i) = list.binary_search_by_key(&line, |b| b.line) else {
            return Ok(());
        };
        list.remove(i);
        if list.is_empty() {
            self.breakpoints.remove(file);
        }
        debug!("Breakpoint cleared at {}:{}", file.display(), line);
        self.changed()
    }

    pub fn clear_all(&mut self) -> Result<()> {
        self.breakpoints.clear();
        self.changed()
    }

    pub fn list(&self) -> BreakpointSet {
        self.breakpoints.clone()
    }

    pub fn get(&self, file: &Path, line: usize) -> Option<&Breakpoint> {
        self.breakpoints
            .get(file)
            .and_then(|list| list.iter().find(|b| b.line == line))
    }

    pub fn count(&self) -> usize {
        self.breakpoints.values().map(Vec::len).sum()
    }

    /// Write the whole set through the store
    pub fn save(&self) -> Result<()> {
        let persisted = Persisted {
            version: BREAKPOINTS_VERSION,
            breakpoints: self
                .breakpoints
                .iter()
                .map(|(path, list)| {
                    let entries = list.iter().map(|b| (b.line, b.condition.clone())).collect();
                    (path.clone(), entries)
                })
                .collect(),
        };
        let data = serde_json::to_string_pretty(&persisted)?;
        self.store.save(&data)
    }

    fn changed(&self) -> Result<()> {
        self.save()?;
        self.events.emit(Event::BreakpointsChanged);
        Ok(())
    }
}

fn normalize_condition(condition: Option<String>) -> Option<String> {
    condition
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn registry(store: &MemoryStore) -> BreakpointRegistry {
        BreakpointRegistry::new(Box::new(store.clone()), EventBus::new())
    }

    #[test]
    fn test_set_replaces_and_clear_removes() {
        let store = MemoryStore::new();
        let mut bps = registry(&store);
        let file = Path::new("/f.py");

        bps.set(file, 10, None).unwrap();
        bps.set(file, 10, Some("x>0".to_string())).unwrap();

        let listed = bps.list();
        assert_eq!(
            listed[&PathBuf::from("/f.py")],
            vec![Breakpoint {
                line: 10,
                condition: Some("x>0".to_string())
            }]
        );

        bps.clear(file, 10).unwrap();
        assert!(bps.list().is_empty());
    }

    #[test]
    fn test_lines_stay_sorted() {
        let store = MemoryStore::new();
        let mut bps = registry(&store);
        let file = Path::new("/f.py");
        for line in [30, 5, 12] {
            bps.set(file, line, None).unwrap();
        }
        let lines: Vec<usize> = bps.list()[file].iter().map(|b| b.line).collect();
        assert_eq!(lines, vec![5, 12, 30]);
    }

    #[test]
    fn test_clear_missing_is_noop() {
        let store = MemoryStore::new();
        let mut bps = registry(&store);
        bps.clear(Path::new("/none.py"), 3).unwrap();
        assert!(store.contents().is_none());
    }

    #[test]
    fn test_mutations_emit_changed() {
        let events = EventBus::new();
        let rx = events.subscribe();
        let mut bps = BreakpointRegistry::new(Box::new(MemoryStore::new()), events);

        bps.set(Path::new("/f.py"), 1, None).unwrap();
        bps.clear_all().unwrap();

        let names: Vec<&str> = rx.try_iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["breakpoints.changed", "breakpoints.changed"]);
    }

    #[test]
    fn test_load_drops_missing_files() {
        let dir = tempdir().unwrap();
        let present = dir.path().join("present.py");
        std::fs::write(&present, "pass\n").unwrap();
        let missing = dir.path().join("missing.py");

        let store = MemoryStore::new();
        {
            let mut bps = registry(&store);
            bps.set(&present, 2, Some("n == 1".to_string())).unwrap();
            bps.set(&missing, 4, None).unwrap();
        }

        let mut reloaded = registry(&store);
        reloaded.load().unwrap();
        let listed = reloaded.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(
            reloaded.get(&present, 2).and_then(|b| b.condition.as_deref()),
            Some("n == 1")
        );
    }

    #[test]
    fn test_corrupt_or_foreign_store_starts_empty() {
        let store = MemoryStore::new();
        store.save("not json").unwrap();
        let mut bps = registry(&store);
        bps.load().unwrap();
        assert!(bps.list().is_empty());

        store
            .save(r#"{"version": 7, "breakpoints": {}}"#)
            .unwrap();
        bps.load().unwrap();
        assert!(bps.list().is_empty());
    }

    #[test]
    fn test_decode_reports_store_location() {
        let location = Path::new("/state/breakpoints.json");
        for data in ["not json", r#"{"version": 7, "breakpoints": {}}"#] {
            match decode_persisted(data, location) {
                Err(Error::PersistenceCorrupt { path, reason }) => {
                    assert_eq!(path, location);
                    assert!(!reason.is_empty());
                }
                other => panic!("expected a corrupt store, got {:?}", other.map(|p| p.version)),
            }
        }

        let valid = decode_persisted(r#"{"version": 1, "breakpoints": {}}"#, location).unwrap();
        assert!(valid.breakpoints.is_empty());
        assert_eq!(MemoryStore::new().location(), PathBuf::from("<memory>"));
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("m.py");
        std::fs::write(&target, "").unwrap();
        let store_path = dir.path().join("state").join("breakpoints.json");

        let mut bps = BreakpointRegistry::new(Box::new(FileStore::new(&store_path)), EventBus::new());
        bps.load().unwrap();
        bps.set(&target, 7, Some("  ".to_string())).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&store_path).unwrap()).unwrap();
        assert_eq!(raw["version"], 1);

        let mut reloaded =
            BreakpointRegistry::new(Box::new(FileStore::new(&store_path)), EventBus::new());
        reloaded.load().unwrap();
        assert_eq!(
            reloaded.get(&target, 7),
            Some(&Breakpoint {
                line: 7,
                condition: None
            })
        );
    }
}
