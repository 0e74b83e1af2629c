//! Configuration Module - User preferences from ~/.sleuth/config.toml
//!
//! Supports:
//! - Search defaults (encodings, filters, runtime path roots)
//! - Analyzer executables and kill timeouts
//! - History size and persisted file locations

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Default exclude pattern: compiled files, merge leftovers, VCS metadata
pub const DEFAULT_EXCLUDE: &str = r"\.pyc$|\.orig$|\.hg|\.git|\.svn";

/// Sleuth configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub search: SearchConfig,
    pub lint: LintConfig,
    pub profile: ProfileConfig,
    pub history: HistoryConfig,
    pub breakpoints: BreakpointsConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Search settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Encodings the search text is tried in, in order
    pub supported_encodings: Vec<String>,
    /// How long a new search waits for the previous worker to stop
    pub join_timeout_ms: u64,
    /// File name filter (regex, or glob when not a valid regex)
    pub include: String,
    /// Path filter applied to files and directories
    pub exclude: String,
    /// Extra roots for runtime path mode
    pub runtime_path: Vec<PathBuf>,
    /// Environment variable listing more runtime path roots
    pub runtime_path_env: Option<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            supported_encodings: vec!["utf-8".to_string(), "latin1".to_string()],
            join_timeout_ms: 2000,
            include: String::new(),
            exclude: DEFAULT_EXCLUDE.to_string(),
            runtime_path: Vec::new(),
            runtime_path_env: Some("PYTHONPATH".to_string()),
        }
    }
}

impl SearchConfig {
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

/// Lint analyzer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LintConfig {
    pub executable: String,
    /// Grace period between terminate and kill
    pub kill_timeout_ms: u64,
}

impl Default for LintConfig {
    fn default() -> Self {
        Self {
            executable: "pylint".to_string(),
            kill_timeout_ms: 3000,
        }
    }
}

/// Profiler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    pub interpreter: String,
    /// Call tree levels shown before expanding on demand
    pub initial_depth: usize,
    pub kill_timeout_ms: u64,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
            initial_depth: 3,
            kill_timeout_ms: 3000,
        }
    }
}

/// Analysis history settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub max_entries: usize,
    /// Overrides the default location under the data directory
    pub path: Option<PathBuf>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_entries: 20,
            path: None,
        }
    }
}

/// Breakpoint store settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakpointsConfig {
    pub path: Option<PathBuf>,
}

impl Config {
    /// Load config from default path or return defaults
    pub fn load() -> Self {
        let path = Self::default_path();
        if !path.exists() {
            return Self::default();
        }
        Self::load_from(&path).unwrap_or_else(|e| {
            tracing::warn!("{:#}. Using defaults.", e);
            Self::default()
        })
    }

    /// Load config from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;

        Ok(config)
    }

    /// Save config to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;

        Ok(())
    }

    /// Get default config path
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("org", "sleuth", "sleuth")
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .unwrap_or_else(|| fallback_dir().join("config.toml"))
    }

    /// Directory holding history and breakpoints
    pub fn data_dir() -> PathBuf {
        directories::ProjectDirs::from("org", "sleuth", "sleuth")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(fallback_dir)
    }

    /// Create default config file if it doesn't exist
    pub fn ensure_exists() -> Result<PathBuf> {
        let path = Self::default_path();
        if !path.exists() {
            let config = Config::default();
            config.save_to(&path)?;
            tracing::info!("Created default config at {}", path.display());
        }
        Ok(path)
    }

    pub fn history_path(&self) -> PathBuf {
        self.history
            .path
            .clone()
            .unwrap_or_else(|| Self::data_dir().join("history.json"))
    }

    pub fn breakpoints_path(&self) -> PathBuf {
        self.breakpoints
            .path
            .clone()
            .unwrap_or_else(|| Self::data_dir().join("breakpoints.json"))
    }
}

fn fallback_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".sleuth")
}

/// Generate a sample config file with comments
pub fn generate_sample_config() -> String {
    r#"# Sleuth Configuration
# Location: ~/.config/sleuth/config.toml (or %APPDATA%\sleuth\config.toml on Windows)

[general]
# Log level: trace, debug, info, warn, error
log_level = "info"

[search]
# Encodings the search text is tried in, first match wins for display
supported_encodings = ["utf-8", "latin1"]

# How long a new search waits for the previous one to stop (ms)
join_timeout_ms = 2000

# File name filter, regex or glob (empty = all files)
include = ""

# Path filter for files and directories
exclude = '\.pyc$|\.orig$|\.hg|\.git|\.svn'

# Extra roots searched in runtime path mode
runtime_path = []

# Environment variable listing more runtime path roots
runtime_path_env = "PYTHONPATH"

[lint]
executable = "pylint"

# Grace period before a cancelled analyzer is killed (ms)
kill_timeout_ms = 3000

[profile]
interpreter = "python3"

# Call tree levels built before expanding on demand
initial_depth = 3

kill_timeout_ms = 3000

[history]
# Number of analysis results kept across sessions
max_entries = 20

# path = "/home/user/.local/share/sleuth/history.json"

[breakpoints]
# path = "/home/user/.local/share/sleuth/breakpoints.json"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.search.supported_encodings, vec!["utf-8", "latin1"]);
        assert_eq!(config.search.join_timeout(), Duration::from_secs(2));
        assert_eq!(config.lint.executable, "pylint");
        assert_eq!(config.profile.initial_depth, 3);
        assert_eq!(config.history.max_entries, 20);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test_config.toml");

        let mut config = Config::default();
        config.history.max_entries = 5;
        config.search.runtime_path = vec![PathBuf::from("/opt/lib")];
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.history.max_entries, 5);
        assert_eq!(loaded.search.runtime_path, vec![PathBuf::from("/opt/lib")]);
        assert_eq!(loaded.search.exclude, DEFAULT_EXCLUDE);
    }

    #[test]
    fn test_parse_sample_config() {
        let sample = generate_sample_config();
        let config: Config = toml::from_str(&sample).unwrap();
        assert_eq!(config.search.exclude, DEFAULT_EXCLUDE);
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: Config = toml::from_str("[lint]\nexecutable = \"flake\"\n").unwrap();
        assert_eq!(config.lint.executable, "flake");
        assert_eq!(config.lint.kill_timeout_ms, 3000);
        assert_eq!(config.profile.interpreter, "python3");
    }

    #[test]
    fn test_path_overrides() {
        let mut config = Config::default();
        config.history.path = Some(PathBuf::from("/tmp/h.json"));
        assert_eq!(config.history_path(), PathBuf::from("/tmp/h.json"));
        assert!(config.breakpoints_path().ends_with("breakpoints.json"));
    }
}
