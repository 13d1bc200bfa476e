//! One execution of one extension for one process instance.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use tracing::{info, instrument, warn};

use crate::context::{ContextFactory, ContextRequest};
use crate::core::issues::{DeferredIssues, Notification};
use crate::core::types::{RunArguments, RunMode, ValidationIssue};
use crate::error::{RunError, UsageError};
use crate::extension::{Extension, ExtensionEnv, ExtensionKind, ExtensionRegistry};
use crate::io::cache::NETWORK_CACHE_FILE;
use crate::io::session::{ExecutionSession, LogMode};
use crate::notify::notify;

/// Parameters of one execution.
#[derive(Debug, Clone)]
pub struct ExecRequest<'r> {
    pub module: &'r str,
    pub args: &'r RunArguments,
    pub mode: RunMode,
    pub run_dir: &'r Path,
    /// Record into and replay from the run directory's caches.
    pub use_cache: bool,
}

/// Outcome of an execution whose failures were handled.
#[derive(Debug, Clone)]
pub struct ExecReport {
    pub module: String,
    pub pid: String,
    pub run_dir: PathBuf,
    pub log_path: PathBuf,
    pub notification: Notification,
    /// Contextual message for an unexpected failure outside test mode.
    pub failure: Option<String>,
}

impl ExecReport {
    pub fn has_errors(&self) -> bool {
        self.notification.has_errors()
    }
}

/// Runs extensions inside an [`ExecutionSession`].
pub struct ExecutionRunner<'a> {
    registry: &'a ExtensionRegistry,
    contexts: &'a dyn ContextFactory,
    session: &'a ExecutionSession,
}

impl<'a> ExecutionRunner<'a> {
    pub fn new(
        registry: &'a ExtensionRegistry,
        contexts: &'a dyn ContextFactory,
        session: &'a ExecutionSession,
    ) -> Self {
        Self {
            registry,
            contexts,
            session,
        }
    }

    /// Execute `request.module` for `request.args`.
    ///
    /// Extension failures are handled here: usage errors and unexpected
    /// errors commit the step log only and are recorded as deferred errors.
    /// In test mode an unexpected error is returned as `Err` after the
    /// notification is printed, so its full chain reaches the caller.
    #[instrument(skip_all, fields(module = request.module, pid = %request.args.pid, mode = %request.mode))]
    pub fn run(&self, request: &ExecRequest<'_>) -> Result<ExecReport> {
        let run_dir = std::path::absolute(request.run_dir)
            .with_context(|| format!("resolve {}", request.run_dir.display()))?;
        fs::create_dir_all(&run_dir).with_context(|| format!("create {}", run_dir.display()))?;
        info!(path = %run_dir.display(), commit = request.args.commit, "running extension");

        let context_request = ContextRequest {
            pid: request.args.pid.clone(),
            run_dir: run_dir.clone(),
            test_mode: request.mode.is_test(),
            disable_commits: !request.args.commit,
            network_cache: request
                .use_cache
                .then(|| run_dir.join(NETWORK_CACHE_FILE)),
            artifact_cache: request.use_cache,
        };
        let log_mode = match request.mode {
            RunMode::Exec => LogMode::Append,
            _ => LogMode::Truncate,
        };

        let mut issues = DeferredIssues::default();
        let guard = self.session.enter(&run_dir, log_mode)?;
        let log_path = guard.log_path().to_path_buf();
        let mut context = self.contexts.create(&context_request)?;
        let mut extension = self.registry.create(request.module)?;

        let failure = {
            let mut env = ExtensionEnv::new(context.as_mut(), &mut issues);
            env.context()
                .logger()
                .log(format!("Start running script '{}'", request.module));
            let failure = run_instance(extension.as_mut(), &mut env);
            env.context()
                .logger()
                .log(format!("Finished running script '{}'", request.module));
            failure
        };
        if let Err(err) = context.cleanup() {
            warn!(error = %err, "cleanup after run failed");
        }
        drop(guard);

        let notification = notify(request.module, &issues, context.as_mut());

        let failure = match failure {
            Some(err) if request.mode.is_test() => return Err(err),
            Some(err) => Some(contextual_message(request.module, &err, Some(&log_path))),
            None => None,
        };
        Ok(ExecReport {
            module: request.module.to_string(),
            pid: request.args.pid.clone(),
            run_dir,
            log_path,
            notification,
            failure,
        })
    }
}

/// Dispatch by capability and commit.
///
/// Returns the unexpected error, if any, after it was recorded. Failures are
/// recorded as deferred errors before the step log is committed; a failing
/// step-log commit is only logged, so the run is still summarized.
pub fn run_instance(
    extension: &mut dyn Extension,
    env: &mut ExtensionEnv<'_>,
) -> Option<anyhow::Error> {
    let outcome = dispatch(extension, env).and_then(|()| env.context().commit());
    match outcome {
        Ok(()) => None,
        Err(err) if err.downcast_ref::<UsageError>().is_some() => {
            env.ensure_error(&err.to_string());
            commit_step_log_only(env);
            None
        }
        Err(err) => {
            env.context()
                .validation()
                .handle_single_validation(ValidationIssue::error(format!("{err}\n{err:?}")));
            env.ensure_error(&err.to_string());
            commit_step_log_only(env);
            Some(err)
        }
    }
}

fn commit_step_log_only(env: &mut ExtensionEnv<'_>) {
    if let Err(err) = env.context().commit_step_log_only() {
        warn!(error = %format!("{err:#}"), "committing the step log failed");
    }
}

fn dispatch(extension: &mut dyn Extension, env: &mut ExtensionEnv<'_>) -> Result<()> {
    match extension.kind() {
        ExtensionKind::General(general) => general.execute(env),
        ExtensionKind::FileProducing(file) => {
            let content = file.content(env)?.render(file.newline());
            let shared_file = file.shared_file();
            let file_name = file.filename();
            env.context()
                .files()
                .upload(&shared_file, &file_name, &content, file.file_prefix())?;
            Ok(())
        }
        ExtensionKind::Unsupported(name) => {
            Err(RunError::NotImplemented(format!("Extension type '{name}'")).into())
        }
    }
}

/// Message shown instead of the raw error outside test mode.
pub fn contextual_message(module: &str, err: &anyhow::Error, log_path: Option<&Path>) -> String {
    let mut message = format!(
        "There was an exception while running the extension '{module}': '{err}'. \
         Refer to the file 'Step log' if available."
    );
    if let Some(path) = log_path {
        message.push_str(&format!(
            " The application log is available in {}.",
            path.display()
        ));
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{LocalContextFactory, Update};
    use crate::io::network::{Response, Transport};
    use crate::test_support::{
        FakeContext, FakeContextFactory, ScriptedExtension, ScriptedTransport, Step,
    };

    fn run_scripted(
        dir: &Path,
        extension: ScriptedExtension,
    ) -> (Option<anyhow::Error>, DeferredIssues, FakeContext) {
        let mut context = FakeContext::new("1001", true)
            .with_run_dir(dir.to_path_buf())
            .with_shared_file("Robot file", "92");
        let mut issues = DeferredIssues::default();
        let mut extension = extension;
        let failure = {
            let mut env = ExtensionEnv::new(&mut context, &mut issues);
            run_instance(&mut extension, &mut env)
        };
        (failure, issues, context)
    }

    #[test]
    fn success_commits_the_update_queue() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (failure, issues, context) = run_scripted(temp.path(), ScriptedExtension::general(vec![
            Step::Update(Update::new("sample/1", "volume", serde_json::json!(5))),
        ]));
        assert!(failure.is_none());
        assert!(issues.errors.is_empty());
        let ledger = context.ledger();
        let ledger = ledger.borrow();
        assert_eq!(ledger.commits, 1);
        assert_eq!(ledger.committed_updates.len(), 1);
        assert_eq!(ledger.step_log_commits, 0);
    }

    #[test]
    fn usage_error_commits_step_log_only_and_defers() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (failure, issues, context) = run_scripted(temp.path(), ScriptedExtension::general(vec![
            Step::Update(Update::new("sample/1", "volume", serde_json::json!(5))),
            Step::UsageError("Volume missing".to_string()),
        ]));
        assert!(failure.is_none());
        assert!(issues.errors.contains_key("Volume missing"));
        let ledger = context.ledger();
        let ledger = ledger.borrow();
        assert_eq!(ledger.commits, 0);
        assert_eq!(ledger.step_log_commits, 1);
        assert_eq!(ledger.discarded_updates.len(), 1);
    }

    #[test]
    fn usage_error_keeps_existing_deferred_errors() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (_, issues, _) = run_scripted(temp.path(), ScriptedExtension::general(vec![
            Step::DeferError("Bad well".to_string(), Some("A1".to_string())),
            Step::RaiseDeferred,
        ]));
        assert_eq!(issues.errors.len(), 1);
        assert_eq!(issues.errors.get("Bad well"), Some(&vec!["A1".to_string()]));
    }

    #[test]
    fn unexpected_error_becomes_a_validation_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (failure, issues, context) = run_scripted(temp.path(), ScriptedExtension::general(vec![
            Step::Fail("division by zero".to_string()),
        ]));
        let failure = failure.expect("unexpected error is returned");
        assert_eq!(failure.to_string(), "division by zero");
        assert!(issues.errors.contains_key("division by zero"));
        let ledger = context.ledger();
        let ledger = ledger.borrow();
        assert_eq!(ledger.step_log_commits, 1);
        assert_eq!(ledger.validation_issues.len(), 1);
        assert!(ledger.validation_issues[0].message.starts_with("division by zero\n"));
    }

    #[test]
    fn file_extension_uploads_rendered_content() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (failure, _, context) = run_scripted(temp.path(), ScriptedExtension::file(
            "Robot file",
            "robot.csv",
            &["A1,10", "B1,20"],
            Vec::new(),
        ));
        assert!(failure.is_none());
        let ledger = context.ledger();
        let ledger = ledger.borrow();
        assert_eq!(ledger.uploads.len(), 1);
        let uploaded = &ledger.uploads[0];
        assert!(uploaded.ends_with("uploaded/1001-92_robot.csv"));
        assert_eq!(fs::read_to_string(uploaded).expect("read"), "A1,10\nB1,20");
    }

    #[test]
    fn unsupported_kind_is_not_implemented() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (failure, _, _) = run_scripted(temp.path(), ScriptedExtension::unsupported("Robot driver"));
        let failure = failure.expect("not implemented");
        assert!(matches!(
            failure.downcast_ref::<RunError>(),
            Some(RunError::NotImplemented(_))
        ));
    }

    fn runner_fixture() -> (ExtensionRegistry, FakeContextFactory, ExecutionSession) {
        let mut registry = ExtensionRegistry::new();
        registry
            .register("scripts.lab.ok", || {
                Box::new(ScriptedExtension::general(vec![Step::Warn(
                    "Low volume".to_string(),
                    Some("s1".to_string()),
                )]))
            })
            .register("scripts.lab.crash", || {
                Box::new(ScriptedExtension::general(vec![Step::Fail("boom".to_string())]))
            });
        (registry, FakeContextFactory::new(), ExecutionSession::new(&[], "off"))
    }

    #[test]
    fn run_writes_log_and_reports_warnings() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (registry, contexts, session) = runner_fixture();
        let runner = ExecutionRunner::new(&registry, &contexts, &session);
        let args = RunArguments {
            pid: "1001".to_string(),
            commit: false,
        };
        let run_dir = temp.path().join("run-test");

        let report = runner
            .run(&ExecRequest {
                module: "scripts.lab.ok",
                args: &args,
                mode: RunMode::Test {
                    validate_against_frozen: false,
                },
                run_dir: &run_dir,
                use_cache: true,
            })
            .expect("run");

        assert!(!report.has_errors());
        assert_eq!(report.notification.warning_count, 1);
        let log = fs::read_to_string(&report.log_path).expect("read log");
        assert!(log.contains("Start running script 'scripts.lab.ok'"));
        assert!(log.contains("Finished running script 'scripts.lab.ok'"));

        let ledger = contexts.ledger();
        let ledger = ledger.borrow();
        let request = &ledger.requests[0];
        assert!(request.disable_commits);
        assert!(request.test_mode);
        assert_eq!(
            request.network_cache.as_deref(),
            Some(report.run_dir.join(NETWORK_CACHE_FILE).as_path())
        );
    }

    #[test]
    fn unexpected_failure_is_returned_in_test_mode() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (registry, contexts, session) = runner_fixture();
        let runner = ExecutionRunner::new(&registry, &contexts, &session);
        let args = RunArguments {
            pid: "1001".to_string(),
            commit: false,
        };
        let err = runner
            .run(&ExecRequest {
                module: "scripts.lab.crash",
                args: &args,
                mode: RunMode::Test {
                    validate_against_frozen: false,
                },
                run_dir: &temp.path().join("run-test"),
                use_cache: false,
            })
            .expect_err("test mode re-raises");
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn unexpected_failure_is_contextual_outside_test_mode() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (registry, contexts, session) = runner_fixture();
        let runner = ExecutionRunner::new(&registry, &contexts, &session);
        let args = RunArguments {
            pid: "1001".to_string(),
            commit: true,
        };
        let report = runner
            .run(&ExecRequest {
                module: "scripts.lab.crash",
                args: &args,
                mode: RunMode::Exec,
                run_dir: temp.path(),
                use_cache: false,
            })
            .expect("handled");

        assert!(report.has_errors());
        let message = report.failure.expect("contextual message");
        assert!(message.starts_with(
            "There was an exception while running the extension 'scripts.lab.crash': 'boom'."
        ));
        assert!(message.contains("extensions.log"));
    }

    #[test]
    fn failing_step_log_commit_still_reports_the_usage_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut registry = ExtensionRegistry::new();
        registry.register("scripts.lab.strict", || {
            Box::new(ScriptedExtension::general(vec![Step::UsageError(
                "Volume missing".to_string(),
            )]))
        });
        let contexts = LocalContextFactory::new(
            "https://lims/api",
            Box::new(|| -> Box<dyn Transport> {
                Box::new(ScriptedTransport::new(vec![Response {
                    status: 503,
                    body: String::new(),
                }]))
            }),
        );
        let session = ExecutionSession::new(&[], "off");
        let runner = ExecutionRunner::new(&registry, &contexts, &session);
        let args = RunArguments {
            pid: "1".to_string(),
            commit: true,
        };

        let report = runner
            .run(&ExecRequest {
                module: "scripts.lab.strict",
                args: &args,
                mode: RunMode::Exec,
                run_dir: temp.path(),
                use_cache: false,
            })
            .expect("handled");

        assert!(report.has_errors());
        assert!(report.failure.is_none());
        assert_eq!(report.notification.errors, vec!["Volume missing".to_string()]);
    }

    #[test]
    fn run_log_is_detached_after_a_failed_run() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (registry, contexts, session) = runner_fixture();
        let runner = ExecutionRunner::new(&registry, &contexts, &session);
        let args = RunArguments {
            pid: "1001".to_string(),
            commit: true,
        };

        let report = runner
            .run(&ExecRequest {
                module: "scripts.lab.crash",
                args: &args,
                mode: RunMode::Exec,
                run_dir: temp.path(),
                use_cache: false,
            })
            .expect("handled");
        tracing::info!(target: "ext_runner::context", "logged after the run");

        assert!(report.failure.is_some());
        let log = fs::read_to_string(&report.log_path).expect("read log");
        assert!(log.contains("Start running script 'scripts.lab.crash'"));
        assert!(!log.contains("logged after the run"));
    }
}
