//! Include/exclude path patterns (regex first, glob as fallback)

use std::path::Path;

use globset::{Glob, GlobMatcher};
use regex::Regex;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
enum Compiled {
    Regex(Regex),
    Glob(GlobMatcher),
}

/// A compiled include or exclude pattern
#[derive(Debug, Clone)]
pub struct PathPattern {
    source: String,
    compiled: Compiled,
}

impl PathPattern {
    /// Compile `pattern` as a regex, or as a glob if it is not a valid regex.
    ///
    /// Returns `Ok(None)` for an empty pattern, and `InvalidPattern` when the
    /// pattern is neither.
    pub fn compile(pattern: &str) -> Result<Option<Self>> {
        if pattern.trim().is_empty() {
            return Ok(None);
        }

        let regex_err = match Regex::new(pattern) {
            Ok(regex) => {
                return Ok(Some(Self {
                    source: pattern.to_string(),
                    compiled: Compiled::Regex(regex),
                }))
            }
            Err(e) => e,
        };

        match Glob::new(pattern) {
            Ok(glob) => {
                tracing::debug!("Pattern '{}' is not a regex, using it as a glob", pattern);
                Ok(Some(Self {
                    source: pattern.to_string(),
                    compiled: Compiled::Glob(glob.compile_matcher()),
                }))
            }
            Err(glob_err) => Err(Error::InvalidPattern {
                pattern: pattern.to_string(),
                reason: format!("not a regex ({}) nor a glob ({})", regex_err, glob_err),
            }),
        }
    }

    /// Regexes match anywhere in the text, globs must match all of it
    pub fn is_match(&self, text: &str) -> bool {
        match &self.compiled {
            Compiled::Regex(regex) => regex.is_match(text),
            Compiled::Glob(glob) => glob.is_match(text),
        }
    }

    pub fn matches_path(&self, path: &Path) -> bool {
        self.is_match(&path.to_string_lossy())
    }

    /// Directory test: the path is given a trailing separator first
    pub fn matches_dir(&self, dir: &Path) -> bool {
        let mut text = dir.to_string_lossy().into_owned();
        if !text.ends_with(std::path::MAIN_SEPARATOR) {
            text.push(std::path::MAIN_SEPARATOR);
        }
        self.is_match(&text)
    }

    pub fn matches_file_name(&self, path: &Path) -> bool {
        path.file_name()
            .map(|name| self.is_match(&name.to_string_lossy()))
            .unwrap_or(false)
    }

    pub fn is_glob(&self) -> bool {
        matches!(self.compiled, Compiled::Glob(_))
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}
