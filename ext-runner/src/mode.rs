//! Run-mode state machine: exec, test (fresh or validated) and freeze.

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{info, instrument};

use crate::context::ContextFactory;
use crate::core::path::run_path;
use crate::core::types::{RunArguments, RunMode};
use crate::error::RunError;
use crate::exec::{ExecReport, ExecRequest, ExecutionRunner};
use crate::extension::ExtensionRegistry;
use crate::io::cache::CacheManager;
use crate::io::config::HarnessConfig;
use crate::io::session::ExecutionSession;
use crate::io::snapshot::RunDirectoryInfo;

/// One invocation of the controller.
#[derive(Debug, Clone)]
pub struct ModeRequest {
    pub module: String,
    pub mode: RunMode,
    /// Explicit run arguments; gathered from the extension when absent.
    pub args: Option<Vec<RunArguments>>,
    /// Network cache switch for test mode; enabled when absent.
    pub use_cache: Option<bool>,
}

/// Result of validating one test run against its frozen baseline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    NotRequested,
    Matched,
    NoFrozenData { path: PathBuf },
    Differs(String),
}

/// One processed run argument.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub args: RunArguments,
    pub run_dir: PathBuf,
    /// Execution outcome; `None` for freeze.
    pub exec: Option<ExecReport>,
    pub validation: ValidationOutcome,
}

#[derive(Debug, Clone)]
pub struct ModeReport {
    pub module: String,
    pub mode: RunMode,
    pub runs: Vec<RunReport>,
    /// The batch stopped at an execution whose summary reported errors.
    pub has_errors: bool,
}

impl ModeReport {
    /// Difference reports of runs that did not match their baseline.
    pub fn differences(&self) -> Vec<&str> {
        self.runs
            .iter()
            .filter_map(|run| match &run.validation {
                ValidationOutcome::Differs(report) => Some(report.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Contextual messages of executions that failed unexpectedly.
    pub fn failures(&self) -> Vec<&str> {
        self.runs
            .iter()
            .filter_map(|run| run.exec.as_ref()?.failure.as_deref())
            .collect()
    }
}

/// Drives the run modes for one module.
pub struct RunModeController<'a> {
    config: &'a HarnessConfig,
    registry: &'a ExtensionRegistry,
    runner: ExecutionRunner<'a>,
    caches: CacheManager,
}

impl<'a> RunModeController<'a> {
    pub fn new(
        config: &'a HarnessConfig,
        registry: &'a ExtensionRegistry,
        contexts: &'a dyn ContextFactory,
        session: &'a ExecutionSession,
    ) -> Self {
        Self {
            config,
            registry,
            runner: ExecutionRunner::new(registry, contexts, session),
            caches: CacheManager::new(),
        }
    }

    pub fn caches(&self) -> &CacheManager {
        &self.caches
    }

    #[instrument(skip_all, fields(module = %request.module, mode = %request.mode))]
    pub fn run(&mut self, request: &ModeRequest) -> Result<ModeReport> {
        if !self.registry.contains(&request.module) {
            return Err(RunError::UnknownModule(request.module.clone()).into());
        }
        let runs = match request.mode {
            RunMode::Exec => self.run_exec(request)?,
            RunMode::Test {
                validate_against_frozen,
            } => self.run_test(request, validate_against_frozen)?,
            RunMode::Freeze => self.run_freeze(request)?,
        };
        let has_errors = runs
            .iter()
            .any(|run| run.exec.as_ref().is_some_and(ExecReport::has_errors));
        Ok(ModeReport {
            module: request.module.clone(),
            mode: request.mode,
            runs,
            has_errors,
        })
    }

    fn run_exec(&mut self, request: &ModeRequest) -> Result<Vec<RunReport>> {
        let args = request
            .args
            .clone()
            .ok_or_else(|| RunError::MissingRunArguments {
                mode: request.mode.to_string(),
            })?;
        let mut reports = Vec::new();
        for args in args {
            let args = RunArguments {
                commit: true,
                ..args
            };
            let run_dir = run_path(&args.pid, &request.module, RunMode::Exec, self.config.roots());
            let exec = self.runner.run(&ExecRequest {
                module: &request.module,
                args: &args,
                mode: RunMode::Exec,
                run_dir: &run_dir,
                use_cache: false,
            })?;
            let stop = exec.has_errors();
            reports.push(RunReport {
                args,
                run_dir,
                exec: Some(exec),
                validation: ValidationOutcome::NotRequested,
            });
            if stop {
                break;
            }
        }
        Ok(reports)
    }

    fn run_test(&mut self, request: &ModeRequest, validate: bool) -> Result<Vec<RunReport>> {
        print_test_hints(&request.module);
        if request.use_cache.unwrap_or(true) {
            self.caches.enable_network_cache();
        }
        let args = match &request.args {
            Some(args) => args.clone(),
            None => gather_runs(self.registry, &request.module, true)?,
        };

        let mut reports = Vec::new();
        for args in args {
            let roots = self.config.roots();
            let test_mode = RunMode::Test {
                validate_against_frozen: validate,
            };
            let run_dir = run_path(&args.pid, &request.module, test_mode, roots);
            let frozen_dir = run_path(&args.pid, &request.module, RunMode::Freeze, roots);
            if validate {
                self.caches.prepare_frozen_test(&run_dir, &frozen_dir)?;
            } else {
                self.caches.prepare_fresh_test(&run_dir)?;
            }

            let exec = self.runner.run(&ExecRequest {
                module: &request.module,
                args: &args,
                mode: test_mode,
                run_dir: &run_dir,
                use_cache: self.caches.network_cache_enabled(),
            })?;
            if exec.has_errors() {
                reports.push(RunReport {
                    args,
                    run_dir,
                    exec: Some(exec),
                    validation: ValidationOutcome::NotRequested,
                });
                break;
            }

            let validation = if validate {
                match validate_against_frozen(&run_dir, &frozen_dir) {
                    Ok(()) => ValidationOutcome::Matched,
                    Err(RunError::NoFrozenDataFound { path }) => {
                        println!("No frozen data was found at {}", path.display());
                        ValidationOutcome::NoFrozenData { path }
                    }
                    Err(RunError::ResultsDifferFromFrozenData { report }) => {
                        ValidationOutcome::Differs(report)
                    }
                    Err(other) => return Err(other.into()),
                }
            } else {
                ValidationOutcome::NotRequested
            };
            reports.push(RunReport {
                args,
                run_dir,
                exec: Some(exec),
                validation,
            });
        }
        Ok(reports)
    }

    fn run_freeze(&mut self, request: &ModeRequest) -> Result<Vec<RunReport>> {
        let args = match &request.args {
            Some(args) => args.clone(),
            None => gather_runs(self.registry, &request.module, true)?,
        };
        println!(
            "Freezing data (requests, responses and result files/hashes) to {}",
            self.config.frozen_root_path.display()
        );

        let mut reports = Vec::new();
        for args in args {
            let roots = self.config.roots();
            let test_dir = run_path(
                &args.pid,
                &request.module,
                RunMode::Test {
                    validate_against_frozen: true,
                },
                roots,
            );
            let frozen_dir = run_path(&args.pid, &request.module, RunMode::Freeze, roots);
            if !test_dir.is_dir() {
                return Err(RunError::MissingTestRun { path: test_dir }.into());
            }
            info!(pid = %args.pid, "freezing test run");
            self.caches.freeze(&test_dir, &frozen_dir)?;
            reports.push(RunReport {
                args,
                run_dir: frozen_dir,
                exec: None,
                validation: ValidationOutcome::NotRequested,
            });
        }
        Ok(reports)
    }
}

/// Run arguments declared by the extension's integration tests.
///
/// Fails with [`RunError::NoTestsFound`] when `require_tests` is set and the
/// extension declares none.
pub fn gather_runs(
    registry: &ExtensionRegistry,
    module: &str,
    require_tests: bool,
) -> Result<Vec<RunArguments>> {
    let extension = registry.create(module)?;
    let runs: Vec<RunArguments> = extension
        .integration_tests()
        .into_iter()
        .map(RunArguments::from)
        .collect();
    if require_tests && runs.is_empty() {
        return Err(RunError::NoTestsFound {
            module: module.to_string(),
        }
        .into());
    }
    Ok(runs)
}

/// Compare a test run against its frozen baseline.
pub fn validate_against_frozen(run_dir: &Path, frozen_dir: &Path) -> Result<(), RunError> {
    if !frozen_dir.exists() {
        return Err(RunError::NoFrozenDataFound {
            path: frozen_dir.to_path_buf(),
        });
    }
    let test_info = RunDirectoryInfo::index(run_dir)?;
    let frozen_info = RunDirectoryInfo::index(frozen_dir)?;
    let entries = test_info.compare(&frozen_info)?;
    if entries.is_empty() {
        return Ok(());
    }
    let mut lines = Vec::new();
    for entry in entries {
        lines.push(format!("{} ({}).", entry.key, entry.kind));
        lines.push(entry.diff);
        lines.push(format!("{} {}", run_dir.display(), frozen_dir.display()));
    }
    Err(RunError::ResultsDifferFromFrozenData {
        report: lines.join("\n"),
    })
}

fn print_test_hints(module: &str) {
    println!("To execute in production:");
    println!("  ext-runner extension --args 'pid={{processLuid}}' {module} exec");
    println!("To run a fresh test (ignores the frozen test's cache):");
    println!("  ext-runner extension {module} test-fresh");
    println!("To freeze the latest test run (set as reference data for future validations):");
    println!("  ext-runner extension {module} freeze");
}
