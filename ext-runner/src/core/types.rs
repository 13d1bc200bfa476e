//! Shared deterministic types for run-mode logic.
//!
//! These types define stable contracts between the controller, the execution
//! runner and the collaborators. They carry no I/O.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RunError;

/// Mode selected for one invocation. Never changes mid-run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Production execution: no caching, commits enabled, no validation.
    Exec,
    /// Local test run, optionally diffed against the frozen baseline.
    Test { validate_against_frozen: bool },
    /// Promote the latest test run to the frozen baseline.
    Freeze,
}

impl RunMode {
    /// Directory label used in `run-<label>` path segments.
    pub fn label(self) -> &'static str {
        match self {
            RunMode::Exec => "exec",
            RunMode::Test { .. } => "test",
            RunMode::Freeze => "freeze",
        }
    }

    pub fn is_test(self) -> bool {
        matches!(self, RunMode::Test { .. })
    }
}

impl FromStr for RunMode {
    type Err = RunError;

    /// `test-fresh` is `test` with frozen validation disabled.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "exec" => Ok(RunMode::Exec),
            "test" => Ok(RunMode::Test {
                validate_against_frozen: true,
            }),
            "test-fresh" => Ok(RunMode::Test {
                validate_against_frozen: false,
            }),
            "freeze" => Ok(RunMode::Freeze),
            other => Err(RunError::NotImplemented(format!("Mode '{other}'"))),
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::Test {
                validate_against_frozen: false,
            } => f.write_str("test-fresh"),
            other => f.write_str(other.label()),
        }
    }
}

/// Arguments for exactly one execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunArguments {
    pub pid: String,
    pub commit: bool,
}

/// Integration test declared by an extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationTest {
    pub pid: String,
    #[serde(default)]
    pub commit: bool,
}

impl IntegrationTest {
    pub fn new(pid: impl Into<String>) -> Self {
        Self {
            pid: pid.into(),
            commit: false,
        }
    }

    pub fn with_commit(mut self, commit: bool) -> Self {
        self.commit = commit;
        self
    }
}

impl From<&str> for IntegrationTest {
    fn from(pid: &str) -> Self {
        IntegrationTest::new(pid)
    }
}

impl From<IntegrationTest> for RunArguments {
    fn from(test: IntegrationTest) -> Self {
        RunArguments {
            pid: test.pid,
            commit: test.commit,
        }
    }
}

/// Severity of an issue handed to the validation service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationKind {
    Error,
    Warning,
}

/// A single issue recorded by the validation service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub kind: ValidationKind,
    pub message: String,
}

impl ValidationIssue {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: ValidationKind::Error,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            kind: ValidationKind::Warning,
            message: message.into(),
        }
    }
}

/// Naming policy for uploaded files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilePrefix {
    /// `<pid>-<artifact_id>_<file name>`, the stable comparison key.
    #[default]
    ProcessArtifact,
    /// Bare file name.
    None,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_modes() {
        assert_eq!("exec".parse::<RunMode>().expect("exec"), RunMode::Exec);
        assert_eq!("freeze".parse::<RunMode>().expect("freeze"), RunMode::Freeze);
        assert_eq!(
            "test".parse::<RunMode>().expect("test"),
            RunMode::Test {
                validate_against_frozen: true
            }
        );
        assert_eq!(
            "test-fresh".parse::<RunMode>().expect("test-fresh"),
            RunMode::Test {
                validate_against_frozen: false
            }
        );
    }

    #[test]
    fn unknown_mode_is_not_implemented() {
        let err = "validate".parse::<RunMode>().expect_err("unknown mode");
        assert_eq!(err.to_string(), "Mode 'validate' is not implemented");
    }

    #[test]
    fn test_fresh_shares_the_test_label() {
        let fresh = RunMode::Test {
            validate_against_frozen: false,
        };
        assert_eq!(fresh.label(), "test");
        assert_eq!(fresh.to_string(), "test-fresh");
    }

    #[test]
    fn bare_pid_becomes_non_committing_test() {
        let test = IntegrationTest::from("1001");
        assert_eq!(
            RunArguments::from(test),
            RunArguments {
                pid: "1001".to_string(),
                commit: false
            }
        );
    }
}
