//! Search module - find-in-files with cancellable background execution
//!
//! [`SearchCoordinator`] runs one search at a time on a worker thread,
//! [`FileEnumerator`] produces the candidate files, and [`LineMatcher`]
//! locates needles inside raw lines.

mod coordinator;
mod enumerator;
mod matcher;
mod patterns;

pub use coordinator::{RunHandle, SearchCoordinator};
pub use enumerator::{locate_vcs_root, EnumerateOptions, FileEnumerator, SearchMode, VcsKind};
pub use matcher::{decode_line, scan_file, LineMatcher};
pub use patterns::PathPattern;

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Encodings tried when none are configured
pub const DEFAULT_ENCODINGS: &[&str] = &["utf-8", "latin1"];

/// A byte string to look for, tagged with the encoding it was produced with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Needle {
    pub bytes: Vec<u8>,
    pub encoding: String,
}

impl Needle {
    pub fn new(bytes: impl Into<Vec<u8>>, encoding: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            encoding: encoding.into(),
        }
    }

    /// Decode the needle back to text with its own encoding
    pub fn text(&self) -> Option<String> {
        let encoding = encoding_rs::Encoding::for_label(self.encoding.as_bytes())?;
        encoding
            .decode_without_bom_handling_and_without_replacement(&self.bytes)
            .map(|text| text.into_owned())
    }

    fn is_utf8(&self) -> bool {
        encoding_rs::Encoding::for_label(self.encoding.as_bytes())
            .map(|e| e == encoding_rs::UTF_8)
            .unwrap_or(false)
    }
}

/// Options for one search run. Immutable once the run starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOptions {
    /// Directory to search
    pub root_path: PathBuf,
    /// Accept only file names matching this regex or glob (empty = all)
    pub include_pattern: String,
    /// Skip paths matching this regex or glob (empty = none)
    pub exclude_pattern: String,
    /// Enumerate the files tracked by the version control system
    pub follow_vcs_manifest: bool,
    /// Enumerate the runtime path roots instead of `root_path`
    pub follow_runtime_path: bool,
    /// Caller-supplied runtime path roots
    pub runtime_path: Vec<PathBuf>,
    /// Environment variable holding more runtime path roots
    pub runtime_path_env: Option<String>,
    /// Needles tried in order on every line
    pub needles: Vec<Needle>,
    /// Interpret needles as regular expressions
    pub needle_is_regex: bool,
    /// Encodings tried, in order, to decode matched lines for display
    pub supported_encodings: Vec<String>,
}

impl SearchOptions {
    pub fn new(root_path: impl Into<PathBuf>) -> Self {
        Self {
            root_path: root_path.into(),
            include_pattern: String::new(),
            exclude_pattern: String::new(),
            follow_vcs_manifest: false,
            follow_runtime_path: false,
            runtime_path: Vec::new(),
            runtime_path_env: Some("PYTHONPATH".to_string()),
            needles: Vec::new(),
            needle_is_regex: false,
            supported_encodings: DEFAULT_ENCODINGS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Set the needles by encoding `text` with every supported encoding.
    ///
    /// Identical byte strings are kept once, in encoding order.
    pub fn with_text(mut self, text: &str) -> Self {
        let mut needles: Vec<Needle> = Vec::new();
        for label in &self.supported_encodings {
            let Some(encoding) = encoding_rs::Encoding::for_label(label.as_bytes()) else {
                tracing::warn!("Unknown encoding label '{}', skipped", label);
                continue;
            };
            let (bytes, _, unmappable) = encoding.encode(text);
            if unmappable {
                tracing::debug!("'{}' cannot be represented in {}", text, label);
                continue;
            }
            if !needles.iter().any(|n| n.bytes == bytes.as_ref()) {
                needles.push(Needle::new(bytes.into_owned(), label.clone()));
            }
        }
        if needles.is_empty() {
            needles.push(Needle::new(text.as_bytes(), "utf-8"));
        }
        self.needles = needles;
        self
    }

    pub fn with_encodings(mut self, encodings: Vec<String>) -> Self {
        if !encodings.is_empty() {
            self.supported_encodings = encodings;
        }
        self
    }

    pub fn regex(mut self, is_regex: bool) -> Self {
        self.needle_is_regex = is_regex;
        self
    }

    pub fn include(mut self, pattern: impl Into<String>) -> Self {
        self.include_pattern = pattern.into();
        self
    }

    pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
        self.exclude_pattern = pattern.into();
        self
    }

    pub fn vcs_manifest(mut self, enabled: bool) -> Self {
        self.follow_vcs_manifest = enabled;
        self
    }

    pub fn runtime_path(mut self, roots: Vec<PathBuf>) -> Self {
        self.follow_runtime_path = true;
        self.runtime_path = roots;
        self
    }

    /// Enumeration mode selected by the flags. Runtime path wins over VCS.
    pub fn mode(&self) -> SearchMode {
        if self.follow_runtime_path {
            SearchMode::RuntimePath
        } else if self.follow_vcs_manifest {
            SearchMode::VcsManifest
        } else {
            SearchMode::Walk
        }
    }
}

/// One hit inside one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMatch {
    pub absolute_path: PathBuf,
    /// 1-based line number
    pub line_number: usize,
    /// 0-based byte offset into the raw line
    pub column: usize,
    /// Decoded line, without its line terminator
    pub line_text: String,
}

/// Error state of a search run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    #[default]
    None,
    PermissionDenied,
    NoVcsRoot,
    InvalidRegex,
    Internal,
}

impl ErrorCode {
    /// Keep the most severe of two codes; a recorded error is never cleared
    pub fn merge(self, other: ErrorCode) -> ErrorCode {
        self.max(other)
    }

    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            ErrorCode::NoVcsRoot | ErrorCode::InvalidRegex | ErrorCode::Internal
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorCode::None => "none",
            ErrorCode::PermissionDenied => "permission_denied",
            ErrorCode::NoVcsRoot => "no_vcs_root",
            ErrorCode::InvalidRegex => "invalid_regex",
            ErrorCode::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// Result of one search run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub matches: BTreeMap<PathBuf, Vec<FileMatch>>,
    pub roots_scanned: BTreeSet<PathBuf>,
    pub total_match_count: usize,
    pub error_code: ErrorCode,
    pub completed: bool,
}

impl SearchOutcome {
    /// Append the matches of one file, keeping the total in sync
    pub fn add_file(&mut self, path: PathBuf, matches: Vec<FileMatch>) {
        if matches.is_empty() {
            return;
        }
        self.total_match_count += matches.len();
        self.matches.entry(path).or_default().extend(matches);
    }

    pub fn file_count(&self) -> usize {
        self.matches.len()
    }

    pub fn matches_for(&self, path: &Path) -> &[FileMatch] {
        self.matches.get(path).map(Vec::as_slice).unwrap_or(&[])
    }
}
