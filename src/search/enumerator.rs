//! FileEnumerator - candidate files for a search
//!
//! Walks a directory tree, the runtime path roots, or the file list tracked
//! by version control. Include/exclude filters and cancellation are applied
//! while iterating.

use std::cmp::Ordering;
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use walkdir::WalkDir;

use super::PathPattern;
use crate::core::CancelToken;
use crate::error::{Error, Result};

/// How candidate files are found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    /// Recursive walk of the root
    Walk,
    /// Walk every runtime path root
    RuntimePath,
    /// Files tracked by version control
    VcsManifest,
}

/// Version control systems recognised by their marker directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VcsKind {
    Git,
    Mercurial,
}

impl VcsKind {
    fn marker(self) -> &'static str {
        match self {
            VcsKind::Git => ".git",
            VcsKind::Mercurial => ".hg",
        }
    }

    /// Program and arguments listing the tracked files, NUL separated and
    /// unquoted
    fn manifest_command(self) -> (&'static str, &'static [&'static str]) {
        match self {
            VcsKind::Git => ("git", &["ls-files", "-z"]),
            VcsKind::Mercurial => ("hg", &["files", "-0"]),
        }
    }
}

/// Find the repository root at or above `start`
pub fn locate_vcs_root(start: &Path) -> Result<(PathBuf, VcsKind)> {
    for dir in start.ancestors() {
        for kind in [VcsKind::Git, VcsKind::Mercurial] {
            if dir.join(kind.marker()).exists() {
                return Ok((dir.to_path_buf(), kind));
            }
        }
    }
    Err(Error::NoVcsRoot(start.to_path_buf()))
}

/// Everything the enumerator needs
#[derive(Debug, Clone)]
pub struct EnumerateOptions {
    pub root: PathBuf,
    pub mode: SearchMode,
    pub include: Option<Arc<PathPattern>>,
    pub exclude: Option<Arc<PathPattern>>,
    /// Caller-supplied runtime path roots
    pub runtime_path: Vec<PathBuf>,
    /// Environment variable with more runtime path roots
    pub runtime_path_env: Option<String>,
}

impl EnumerateOptions {
    pub fn walk(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            mode: SearchMode::Walk,
            include: None,
            exclude: None,
            runtime_path: Vec::new(),
            runtime_path_env: None,
        }
    }
}

enum Source {
    Walk {
        pending: VecDeque<PathBuf>,
        current: Option<walkdir::IntoIter>,
    },
    Listed(std::vec::IntoIter<PathBuf>),
}

/// Lazy, finite, non-restartable sequence of candidate files
pub struct FileEnumerator {
    source: Source,
    roots: Vec<PathBuf>,
    include: Option<Arc<PathPattern>>,
    exclude: Option<Arc<PathPattern>>,
    cancel: CancelToken,
}

impl FileEnumerator {
    pub fn new(options: &EnumerateOptions, cancel: CancelToken) -> Result<Self> {
        let (roots, source) = match options.mode {
            SearchMode::Walk => {
                let roots = vec![options.root.clone()];
                (roots.clone(), Source::walk(roots))
            }
            SearchMode::RuntimePath => {
                let roots = runtime_path_roots(
                    &options.runtime_path,
                    options.runtime_path_env.as_deref(),
                );
                (roots.clone(), Source::walk(roots))
            }
            SearchMode::VcsManifest => {
                let (repo_root, kind) = locate_vcs_root(&options.root)?;
                let files = vcs_manifest(&repo_root, kind)?;
                (vec![repo_root], Source::Listed(files.into_iter()))
            }
        };

        tracing::debug!("Enumerating {:?} over {} root(s)", options.mode, roots.len());

        Ok(Self {
            source,
            roots,
            include: options.include.clone(),
            exclude: options.exclude.clone(),
            cancel,
        })
    }

    /// Roots this enumerator covers
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    fn accepts(&self, path: &Path) -> bool {
        if let Some(ref include) = self.include {
            if !include.matches_file_name(path) {
                return false;
            }
        }
        if let Some(ref exclude) = self.exclude {
            if exclude.matches_path(path) {
                return false;
            }
        }
        true
    }

    fn excludes_dir(&self, dir: &Path) -> bool {
        self.exclude
            .as_ref()
            .map(|exclude| exclude.matches_dir(dir))
            .unwrap_or(false)
    }

    /// Whether any directory between the repository root and `path` is
    /// excluded, the way a walk would have pruned it
    fn excludes_ancestor(&self, path: &Path) -> bool {
        let repo_root = self.roots.first();
        path.ancestors()
            .skip(1)
            .take_while(|dir| match repo_root {
                Some(root) => dir.starts_with(root) && *dir != root.as_path(),
                None => true,
            })
            .any(|dir| self.excludes_dir(dir))
    }

    fn next_walked(&mut self) -> Option<Result<PathBuf>> {
        loop {
            if self.cancel.is_cancelled() {
                return None;
            }

            let Source::Walk { pending, current } = &mut self.source else {
                return None;
            };

            if current.is_none() {
                let root = pending.pop_front()?;
                *current = Some(
                    WalkDir::new(root)
                        .follow_links(false)
                        .sort_by(files_then_dirs)
                        .into_iter(),
                );
            }

            let Some(walker) = current.as_mut() else {
                continue;
            };

            let entry = match walker.next() {
                None => {
                    *current = None;
                    continue;
                }
                Some(Err(e)) => {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_default();
                    let io = e
                        .into_io_error()
                        .unwrap_or_else(|| std::io::Error::other("filesystem loop"));
                    tracing::warn!("Cannot read {}: {}", path.display(), io);
                    return Some(Err(Error::Io(io)));
                }
                Some(Ok(entry)) => entry,
            };

            if entry.file_type().is_dir() {
                // Directory boundary
                if entry.depth() > 0 && self.excludes_dir(entry.path()) {
                    if let Source::Walk {
                        current: Some(walker),
                        ..
                    } = &mut self.source
                    {
                        walker.skip_current_dir();
                    }
                }
                continue;
            }

            if entry.file_type().is_file() && self.accepts(entry.path()) {
                return Some(Ok(entry.into_path()));
            }
        }
    }

    fn next_listed(&mut self) -> Option<Result<PathBuf>> {
        loop {
            if self.cancel.is_cancelled() {
                return None;
            }
            let Source::Listed(files) = &mut self.source else {
                return None;
            };
            let path = files.next()?;
            if !path.is_file() {
                continue;
            }
            if !self.excludes_ancestor(&path) && self.accepts(&path) {
                return Some(Ok(path));
            }
        }
    }
}

impl Iterator for FileEnumerator {
    type Item = Result<PathBuf>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.source {
            Source::Walk { .. } => self.next_walked(),
            Source::Listed(_) => self.next_listed(),
        }
    }
}

impl Source {
    fn walk(roots: Vec<PathBuf>) -> Self {
        Source::Walk {
            pending: roots.into(),
            current: None,
        }
    }
}

/// Files of a directory first, by name, then its sub-directories, by name
fn files_then_dirs(a: &walkdir::DirEntry, b: &walkdir::DirEntry) -> Ordering {
    a.file_type()
        .is_dir()
        .cmp(&b.file_type().is_dir())
        .then_with(|| a.file_name().cmp(b.file_name()))
}

/// Key used to de-duplicate roots; case-folded where the filesystem is
fn path_key(path: &Path) -> String {
    let text = path.to_string_lossy();
    if cfg!(any(windows, target_os = "macos")) {
        text.to_lowercase()
    } else {
        text.into_owned()
    }
}

/// Caller-supplied roots followed by the environment-sourced ones, existing
/// directories only, each kept once
fn runtime_path_roots(explicit: &[PathBuf], env_var: Option<&str>) -> Vec<PathBuf> {
    let from_env: Vec<PathBuf> = env_var
        .and_then(std::env::var_os)
        .map(|value| std::env::split_paths(&value).collect())
        .unwrap_or_default();

    let mut seen = HashSet::new();
    explicit
        .iter()
        .chain(from_env.iter())
        .filter(|root| !root.as_os_str().is_empty() && root.is_dir())
        .filter(|root| seen.insert(path_key(root)))
        .cloned()
        .collect()
}

/// Tracked files of a repository, as absolute paths
fn vcs_manifest(repo_root: &Path, kind: VcsKind) -> Result<Vec<PathBuf>> {
    let (program, args) = kind.manifest_command();
    let output = Command::new(program)
        .args(args)
        .current_dir(repo_root)
        .output()
        .map_err(|e| Error::LaunchFailed {
            program: program.to_string(),
            reason: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(Error::Internal(format!(
            "{} {} failed: {}",
            program,
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    Ok(output
        .stdout
        .split(|&b| b == 0)
        .filter(|entry| !entry.is_empty())
        .map(|entry| repo_root.join(manifest_entry_path(entry)))
        .collect())
}

#[cfg(unix)]
fn manifest_entry_path(raw: &[u8]) -> PathBuf {
    use std::os::unix::ffi::OsStrExt;
    PathBuf::from(std::ffi::OsStr::from_bytes(raw))
}

#[cfg(not(unix))]
fn manifest_entry_path(raw: &[u8]) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(raw).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn collect(enumerator: FileEnumerator) -> Vec<PathBuf> {
        enumerator.filter_map(|e| e.ok()).collect()
    }

    fn pattern(p: &str) -> Option<Arc<PathPattern>> {
        PathPattern::compile(p).unwrap().map(Arc::new)
    }

    #[test]
    fn test_walk_order_files_before_dirs() {
        let dir = tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        std::fs::create_dir_all(root.join("pkg")).unwrap();
        std::fs::write(root.join("z.py"), "").unwrap();
        std::fs::write(root.join("a.py"), "").unwrap();
        std::fs::write(root.join("pkg").join("m.py"), "").unwrap();

        let files = collect(
            FileEnumerator::new(&EnumerateOptions::walk(&root), CancelToken::new()).unwrap(),
        );
        assert_eq!(
            files,
            vec![root.join("a.py"), root.join("z.py"), root.join("pkg").join("m.py")]
        );
    }

    #[test]
    fn test_include_and_exclude() {
        let dir = tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        std::fs::create_dir_all(root.join("build")).unwrap();
        std::fs::write(root.join("a.py"), "").unwrap();
        std::fs::write(root.join("a.txt"), "").unwrap();
        std::fs::write(root.join("build").join("gen.py"), "").unwrap();

        let mut options = EnumerateOptions::walk(&root);
        options.include = pattern("*.py");
        options.exclude = pattern("/build/");

        let files = collect(FileEnumerator::new(&options, CancelToken::new()).unwrap());
        assert_eq!(files, vec![root.join("a.py")]);
    }

    #[test]
    fn test_cancelled_enumerator_is_empty() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "").unwrap();

        let cancel = CancelToken::new();
        cancel.cancel();
        let files = collect(
            FileEnumerator::new(&EnumerateOptions::walk(dir.path()), cancel).unwrap(),
        );
        assert!(files.is_empty());
    }

    #[test]
    fn test_runtime_path_dedups_roots() {
        let a = tempdir().unwrap();
        let b = tempdir().unwrap();
        std::fs::write(a.path().join("one.py"), "").unwrap();
        std::fs::write(b.path().join("two.py"), "").unwrap();

        let mut options = EnumerateOptions::walk("/unused");
        options.mode = SearchMode::RuntimePath;
        options.runtime_path = vec![
            a.path().to_path_buf(),
            b.path().to_path_buf(),
            a.path().to_path_buf(),
            PathBuf::from("/definitely/not/here"),
        ];

        let enumerator = FileEnumerator::new(&options, CancelToken::new()).unwrap();
        assert_eq!(enumerator.roots().len(), 2);
        assert_eq!(collect(enumerator).len(), 2);
    }

    #[test]
    fn test_runtime_path_env_roots_follow_explicit() {
        let a = tempdir().unwrap();
        let b = tempdir().unwrap();
        let c = tempdir().unwrap();
        std::fs::write(a.path().join("one.py"), "").unwrap();
        std::fs::write(b.path().join("two.py"), "").unwrap();
        std::fs::write(c.path().join("three.py"), "").unwrap();

        let var = "SLEUTH_ENUMERATOR_TEST_ROOTS";
        let joined = std::env::join_paths([b.path(), a.path(), c.path()]).unwrap();
        std::env::set_var(var, joined);

        let mut options = EnumerateOptions::walk("/unused");
        options.mode = SearchMode::RuntimePath;
        options.runtime_path = vec![a.path().to_path_buf()];
        options.runtime_path_env = Some(var.to_string());

        let enumerator = FileEnumerator::new(&options, CancelToken::new()).unwrap();
        std::env::remove_var(var);
        assert_eq!(
            enumerator.roots(),
            &[a.path().to_path_buf(), b.path().to_path_buf(), c.path().to_path_buf()]
        );
        let files = collect(enumerator);
        assert_eq!(
            files,
            vec![
                a.path().join("one.py"),
                b.path().join("two.py"),
                c.path().join("three.py"),
            ]
        );
    }

    /// Run git in `dir`; false when git is missing or fails
    fn git(dir: &Path, args: &[&str]) -> bool {
        Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    /// Repository with tracked files under `build/sub`, a non-ASCII name and
    /// an untracked file
    fn git_fixture() -> Option<(tempfile::TempDir, PathBuf)> {
        let dir = tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        if !git(&root, &["init", "-q"]) {
            eprintln!("git unavailable, skipping");
            return None;
        }
        std::fs::create_dir_all(root.join("build").join("sub")).unwrap();
        std::fs::write(root.join("build").join("sub").join("x.py"), "").unwrap();
        std::fs::write(root.join("build").join("top.py"), "").unwrap();
        std::fs::write(root.join("ok.py"), "").unwrap();
        std::fs::write(root.join("café.py"), "").unwrap();
        assert!(git(&root, &["add", "build", "ok.py", "café.py"]));
        std::fs::write(root.join("untracked.py"), "").unwrap();
        Some((dir, root))
    }

    #[test]
    fn test_vcs_manifest_lists_tracked_files() {
        let Some((_dir, root)) = git_fixture() else {
            return;
        };
        let mut options = EnumerateOptions::walk(root.join("build"));
        options.mode = SearchMode::VcsManifest;

        let enumerator = FileEnumerator::new(&options, CancelToken::new()).unwrap();
        assert_eq!(enumerator.roots(), &[root.clone()]);
        let mut files = collect(enumerator);
        files.sort();
        assert_eq!(
            files,
            vec![
                root.join("build").join("sub").join("x.py"),
                root.join("build").join("top.py"),
                root.join("café.py"),
                root.join("ok.py"),
            ]
        );
    }

    #[test]
    fn test_vcs_manifest_prunes_excluded_ancestors() {
        let Some((_dir, root)) = git_fixture() else {
            return;
        };
        let mut options = EnumerateOptions::walk(&root);
        options.mode = SearchMode::VcsManifest;
        options.exclude = pattern("build/$");

        let mut files = collect(FileEnumerator::new(&options, CancelToken::new()).unwrap());
        files.sort();
        assert_eq!(files, vec![root.join("café.py"), root.join("ok.py")]);
    }

    #[test]
    fn test_locate_vcs_root() {
        let dir = tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        std::fs::create_dir_all(root.join(".hg")).unwrap();
        std::fs::create_dir_all(root.join("src").join("deep")).unwrap();

        let (found, kind) = locate_vcs_root(&root.join("src").join("deep")).unwrap();
        assert_eq!(found, root);
        assert_eq!(kind, VcsKind::Mercurial);
    }

    #[test]
    fn test_missing_vcs_root() {
        let dir = tempdir().unwrap();
        let mut options = EnumerateOptions::walk(dir.path());
        options.mode = SearchMode::VcsManifest;

        // tempdir lives outside any repository
        match FileEnumerator::new(&options, CancelToken::new()) {
            Err(Error::NoVcsRoot(_)) => {}
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("expected no_vcs_root"),
        }
    }
}
