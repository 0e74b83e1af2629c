//! Error types shared by every subsystem

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error enum for the sleuth library.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No version control root above {}", .0.display())]
    NoVcsRoot(PathBuf),

    #[error("Failed to launch {program}: {reason}")]
    LaunchFailed { program: String, reason: String },

    #[error("Malformed analyzer output: {0}")]
    MalformedOutput(String),

    #[error("Corrupt persisted state in {}: {reason}", path.display())]
    PersistenceCorrupt { path: PathBuf, reason: String },

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Process exit code used when this error reaches the command line.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::InvalidPattern { .. } | Error::InvalidArgument(_) | Error::NoVcsRoot(_) => 2,
            Error::LaunchFailed { .. } => 3,
            _ => 4,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        let bad = Error::InvalidPattern {
            pattern: "(".to_string(),
            reason: "unclosed group".to_string(),
        };
        assert_eq!(bad.exit_code(), 2);

        let launch = Error::LaunchFailed {
            program: "pylint".to_string(),
            reason: "not found".to_string(),
        };
        assert_eq!(launch.exit_code(), 3);
        assert_eq!(Error::Internal("boom".to_string()).exit_code(), 4);
    }
}
