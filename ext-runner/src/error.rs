//! Typed failures that callers branch on.
//!
//! Everything else travels as `anyhow::Error` with context attached; these
//! types are recovered with `downcast_ref` where the controller or the
//! execution runner must decide between continuing and aborting.

use std::collections::BTreeSet;
use std::path::PathBuf;

use thiserror::Error;

/// A user-fixable problem raised by extension business logic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct UsageError {
    pub message: String,
}

impl UsageError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A run directory that cannot be compared.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("unexpected file name {name} in {}, should start with <pid>-<artifact id>", dir.display())]
    MalformedFileName { dir: PathBuf, name: String },
    #[error("more than one file with the prefix {key} in {}", dir.display())]
    DuplicateKey { dir: PathBuf, key: String },
    #[error("expected a file at {}", path.display())]
    NotAFile { path: PathBuf },
    #[error("keys differ: {left:?} != {right:?}")]
    KeyMismatch {
        left: BTreeSet<String>,
        right: BTreeSet<String>,
    },
    #[error("log file exists at {} but not at {}", present.display(), missing.display())]
    InconsistentLogs { present: PathBuf, missing: PathBuf },
    #[error("read {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failures surfaced by the run-mode controller.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("no integration tests declared by {module}")]
    NoTestsFound { module: String },
    #[error("no frozen data was found at {}", path.display())]
    NoFrozenDataFound { path: PathBuf },
    #[error("{report}")]
    ResultsDifferFromFrozenData { report: String },
    #[error("unknown extension module '{0}'")]
    UnknownModule(String),
    #[error("{0} is not implemented")]
    NotImplemented(String),
    #[error("{mode} mode requires explicit run arguments (--args pid=<id>)")]
    MissingRunArguments { mode: String },
    #[error("no test run found at {} (run the test mode first)", path.display())]
    MissingTestRun { path: PathBuf },
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}
