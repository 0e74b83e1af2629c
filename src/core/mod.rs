//! Core module - primitives shared by the long-running tasks
//!
//! Contains the cancellation token, run identifiers, progress counters and
//! the atomic file write used by every persisted store.

mod cancel;

pub use cancel::CancelToken;

use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

static NEXT_RUN_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier of one run of a long-running task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunId(pub u64);

impl RunId {
    /// Allocate a fresh, process-wide unique id
    pub fn next() -> Self {
        RunId(NEXT_RUN_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "run#{}", self.0)
    }
}

/// Progress snapshot for observers. May lag behind the worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    /// Files fully scanned
    pub files_scanned: usize,
    /// Matches found so far
    pub matches_so_far: usize,
}

/// Lock-free counters a worker bumps while the host reads them
#[derive(Debug, Default)]
pub struct ProgressCounters {
    files_scanned: AtomicUsize,
    matches_so_far: AtomicUsize,
}

impl ProgressCounters {
    pub fn file_done(&self, matches: usize) {
        self.files_scanned.fetch_add(1, Ordering::Relaxed);
        self.matches_so_far.fetch_add(matches, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> Progress {
        Progress {
            files_scanned: self.files_scanned.load(Ordering::Relaxed),
            matches_so_far: self.matches_so_far.load(Ordering::Relaxed),
        }
    }
}

/// Write `data` to `<path>.tmp`, then rename it over `path`
pub fn atomic_write(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = std::path::PathBuf::from(temp_name);

    std::fs::write(&temp_path, data)?;
    std::fs::rename(&temp_path, path)
}
