// src/error.rs

//! Error types for Pallet
//!
//! Every variant carries enough context (package name/version, repository
//! URL, file path, exit code) to act on the failure without reading logs.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using Pallet's error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the package manager core
#[derive(Error, Debug)]
pub enum Error {
    /// No transport handler registered for a URL scheme
    #[error("No handler registered for scheme `{scheme}` (while fetching {url})")]
    NoHandler { scheme: String, url: String },

    /// Download or transport failure
    #[error("Error fetching {url}: {reason}")]
    NetworkFetch { url: String, reason: String },

    /// Decompressor or archive unpacker failed
    #[error("Unable to unpack {}: {reason} ({})", path.display(), exit_code_label(*exit_code))]
    Unpack {
        path: PathBuf,
        exit_code: Option<i32>,
        reason: String,
    },

    /// Unpacker exceeded its deadline and was killed
    #[error("Unpacking {} timed out after {timeout_secs} seconds", path.display())]
    UnpackTimeout { path: PathBuf, timeout_secs: u64 },

    /// Schema violation in a fetched descriptor
    #[error("Could not get {field} for {entity}")]
    Parse { entity: String, field: String },

    /// A dependency cannot be satisfied by any known package
    #[error("Package dependencies could not be fulfilled: {package} requires {dependency}")]
    Dependency { package: String, dependency: String },

    /// A dependency cycle among the selected packages
    #[error("Dependency cycle detected: {}", cycle.join(" -> "))]
    Cycle { cycle: Vec<String> },

    /// The same package is scheduled for installation and removal
    #[error("Package {package} cannot be both installed and removed in one batch")]
    ConflictingOperations { package: String },

    /// Record lookup failed
    #[error("{entity} with ID {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Unable to find repository with URL {url}")]
    UnknownRepository { url: String },

    /// Database failure
    #[error("Storage error ({context}): {reason}")]
    Storage { context: String, reason: String },

    /// Filesystem failure while staging or applying an operation
    #[error("Filesystem error at {}: {reason}", path.display())]
    FileSystem { path: PathBuf, reason: String },

    /// Copy from staging into the install root failed
    #[error("Could not copy file {} to {}: {reason}", from.display(), to.display())]
    Copy {
        from: PathBuf,
        to: PathBuf,
        reason: String,
    },

    /// Removal left files behind; the install record was kept
    #[error("Uninstall of {package} incomplete, {} file(s) could not be removed", failures.len())]
    RemoveIncomplete {
        package: String,
        failures: Vec<(PathBuf, String)>,
    },

    /// The package has an empty URL list
    #[error("No URLs for package {package}")]
    NoUrlsAvailable { package: String },

    /// Another operation for the same package is running
    #[error("An operation for package {package} is already in progress")]
    AlreadyInProgress { package: String },

    /// Cooperative cancellation was requested
    #[error("Operation cancelled")]
    Cancelled,

    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Another process holds the data directory
    #[error("Data directory {} is locked by another process", .0.display())]
    Locked(PathBuf),
}

fn exit_code_label(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "no exit status".to_string(),
    }
}

impl Error {
    /// Whether the caller may reasonably retry the same request
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::NetworkFetch { .. } | Error::NoHandler { .. } | Error::AlreadyInProgress { .. }
        )
    }

    /// Shorthand for a filesystem error from an `io::Error`
    pub fn fs(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        Error::FileSystem {
            path: path.into(),
            reason: err.to_string(),
        }
    }

    /// Shorthand for a storage error with a context label
    pub fn storage(context: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Error::Storage {
            context: context.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::storage("sqlite", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unpack_error_mentions_code_and_path() {
        let err = Error::Unpack {
            path: PathBuf::from("/tmp/foo.tar"),
            exit_code: Some(2),
            reason: "unpacker exited".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("/tmp/foo.tar"));
        assert!(msg.contains("exit code 2"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(Error::NetworkFetch {
            url: "http://x".into(),
            reason: "timeout".into()
        }
        .is_retryable());
        assert!(!Error::Unpack {
            path: PathBuf::from("a"),
            exit_code: Some(1),
            reason: String::new()
        }
        .is_retryable());
        assert!(!Error::Cycle { cycle: vec![] }.is_retryable());
    }
}
