//! Deterministic run directory naming.

use std::path::{Path, PathBuf};

use crate::core::types::RunMode;

/// Root directories a run path is resolved against.
#[derive(Debug, Clone, Copy)]
pub struct RunRoots<'a> {
    pub test: &'a Path,
    pub frozen: &'a Path,
    pub exec: &'a Path,
}

/// Module path segments: the dotted name with its first segment dropped.
///
/// `pkg.sequencing.sample_list` yields `["sequencing", "sample_list"]`.
pub fn module_segments(module: &str) -> Vec<&str> {
    module
        .split('.')
        .skip(1)
        .filter(|segment| !segment.is_empty())
        .collect()
}

/// Resolve the run directory for one execution.
///
/// Exec runs share the exec root. Test and freeze runs get
/// `<root>/<module segments>/<pid>/run-<mode>` so modules and process
/// instances never collide.
pub fn run_path(pid: &str, module: &str, mode: RunMode, roots: RunRoots<'_>) -> PathBuf {
    let root = match mode {
        RunMode::Exec => return roots.exec.to_path_buf(),
        RunMode::Test { .. } => roots.test,
        RunMode::Freeze => roots.frozen,
    };
    let mut path = root.to_path_buf();
    for segment in module_segments(module) {
        path.push(segment);
    }
    path.push(pid);
    path.push(format!("run-{}", mode.label()));
    path
}
