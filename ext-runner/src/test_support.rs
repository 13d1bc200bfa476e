//! Dependency-injected fakes for the collaborator seams.
//!
//! Compiled for unit tests and, through the `test-support` feature, for the
//! integration tests under `tests/`.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{Context as _, Result, anyhow, bail};

use crate::context::{Context, ContextFactory, ContextRequest, StepLog, Update, ValidationService};
use crate::core::types::{FilePrefix, IntegrationTest, ValidationIssue};
use crate::error::UsageError;
use crate::extension::{Content, Extension, ExtensionEnv, ExtensionKind, FileExtension, GeneralExtension};
use crate::io::network::{Request, Response, Transport};
use crate::io::upload::{FileUploader, upload_file_name, write_upload};

/// Everything fake contexts observed, shared across the contexts of a batch.
#[derive(Debug, Default)]
pub struct FakeLedger {
    pub requests: Vec<ContextRequest>,
    pub commits: usize,
    pub step_log_commits: usize,
    pub committed_updates: Vec<Update>,
    pub discarded_updates: Vec<Update>,
    pub step_log: Vec<String>,
    pub validation_issues: Vec<ValidationIssue>,
    pub uploads: Vec<PathBuf>,
}

pub type SharedLedger = Rc<RefCell<FakeLedger>>;

/// In-memory [`Context`] writing uploads under its run directory.
pub struct FakeContext {
    pid: String,
    test_mode: bool,
    run_dir: Option<PathBuf>,
    shared_files: BTreeMap<String, String>,
    local_files: BTreeMap<String, String>,
    step_log: StepLog,
    validation: ValidationService,
    updates: Vec<Update>,
    ledger: SharedLedger,
}

impl FakeContext {
    pub fn new(pid: &str, test_mode: bool) -> Self {
        Self {
            pid: pid.to_string(),
            test_mode,
            run_dir: None,
            shared_files: BTreeMap::new(),
            local_files: BTreeMap::new(),
            step_log: StepLog::default(),
            validation: ValidationService::default(),
            updates: Vec::new(),
            ledger: SharedLedger::default(),
        }
    }

    pub fn with_run_dir(mut self, run_dir: PathBuf) -> Self {
        self.run_dir = Some(run_dir);
        self
    }

    /// Declare a shared file and the artifact id uploads to it are keyed by.
    pub fn with_shared_file(mut self, name: &str, artifact_id: &str) -> Self {
        self.shared_files
            .insert(name.to_string(), artifact_id.to_string());
        self
    }

    /// Content served by [`Context::local_shared_file`] for `name`.
    pub fn with_local_file(mut self, name: &str, content: &str) -> Self {
        self.local_files
            .insert(name.to_string(), content.to_string());
        self
    }

    pub fn with_ledger(mut self, ledger: SharedLedger) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn ledger(&self) -> SharedLedger {
        Rc::clone(&self.ledger)
    }

    fn record_step_log(&self) {
        let mut ledger = self.ledger.borrow_mut();
        ledger.step_log.extend(self.step_log.lines().iter().cloned());
        ledger
            .validation_issues
            .extend(self.validation.issues().iter().cloned());
    }
}

impl Context for FakeContext {
    fn pid(&self) -> &str {
        &self.pid
    }

    fn test_mode(&self) -> bool {
        self.test_mode
    }

    fn logger(&mut self) -> &mut StepLog {
        &mut self.step_log
    }

    fn validation(&mut self) -> &mut ValidationService {
        &mut self.validation
    }

    fn queue_update(&mut self, update: Update) {
        self.updates.push(update);
    }

    fn files(&mut self) -> &mut dyn FileUploader {
        self
    }

    fn local_shared_file(&mut self, name: &str) -> Result<PathBuf> {
        let content = self
            .local_files
            .get(name)
            .ok_or_else(|| anyhow!("no shared file named '{name}'"))?;
        let dir = self
            .run_dir
            .clone()
            .ok_or_else(|| anyhow!("fake context has no run directory"))?;
        let path = dir.join(name.replace(' ', "_"));
        fs::write(&path, content).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }

    fn commit(&mut self) -> Result<()> {
        self.record_step_log();
        let mut ledger = self.ledger.borrow_mut();
        ledger.commits += 1;
        ledger.committed_updates.append(&mut self.updates);
        Ok(())
    }

    fn commit_step_log_only(&mut self) -> Result<()> {
        self.record_step_log();
        let mut ledger = self.ledger.borrow_mut();
        ledger.step_log_commits += 1;
        ledger.discarded_updates.append(&mut self.updates);
        Ok(())
    }
}

impl FileUploader for FakeContext {
    fn upload(
        &mut self,
        shared_file: &str,
        file_name: &str,
        content: &str,
        prefix: FilePrefix,
    ) -> Result<PathBuf> {
        let artifact_id = self
            .shared_files
            .get(shared_file)
            .ok_or_else(|| anyhow!("no shared file named '{shared_file}'"))?;
        let stored = upload_file_name(&self.pid, artifact_id, file_name, prefix);
        let dir = self
            .run_dir
            .clone()
            .ok_or_else(|| anyhow!("fake context has no run directory"))?;
        let path = write_upload(&dir, &stored, content)?;
        self.ledger.borrow_mut().uploads.push(path.clone());
        Ok(path)
    }
}

/// Creates [`FakeContext`]s sharing one ledger.
#[derive(Default)]
pub struct FakeContextFactory {
    ledger: SharedLedger,
    shared_files: BTreeMap<String, String>,
    local_files: BTreeMap<String, String>,
}

impl FakeContextFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shared_file(mut self, name: &str, artifact_id: &str) -> Self {
        self.shared_files
            .insert(name.to_string(), artifact_id.to_string());
        self
    }

    pub fn with_local_file(mut self, name: &str, content: &str) -> Self {
        self.local_files
            .insert(name.to_string(), content.to_string());
        self
    }

    pub fn ledger(&self) -> SharedLedger {
        Rc::clone(&self.ledger)
    }
}

impl ContextFactory for FakeContextFactory {
    fn create(&self, request: &ContextRequest) -> Result<Box<dyn Context>> {
        self.ledger.borrow_mut().requests.push(request.clone());
        let mut context = FakeContext::new(&request.pid, request.test_mode)
            .with_run_dir(request.run_dir.clone())
            .with_ledger(Rc::clone(&self.ledger));
        for (name, artifact_id) in &self.shared_files {
            context = context.with_shared_file(name, artifact_id);
        }
        for (name, content) in &self.local_files {
            context = context.with_local_file(name, content);
        }
        Ok(Box::new(context))
    }
}

/// One scripted action of a [`ScriptedExtension`].
#[derive(Debug, Clone)]
pub enum Step {
    Log(String),
    Warn(String, Option<String>),
    DeferError(String, Option<String>),
    Update(Update),
    Upload {
        shared_file: String,
        file_name: String,
        content: String,
    },
    RaiseDeferred,
    UsageError(String),
    Fail(String),
}

#[derive(Debug, Clone)]
enum Behaviour {
    General,
    FileProducing {
        shared_file: String,
        filename: String,
        lines: Vec<String>,
    },
    Unsupported(&'static str),
}

/// Extension whose behaviour is a list of [`Step`]s.
#[derive(Debug, Clone)]
pub struct ScriptedExtension {
    behaviour: Behaviour,
    steps: Vec<Step>,
    tests: Vec<IntegrationTest>,
}

impl ScriptedExtension {
    pub fn general(steps: Vec<Step>) -> Self {
        Self {
            behaviour: Behaviour::General,
            steps,
            tests: Vec::new(),
        }
    }

    /// File-producing extension: runs `steps`, then renders `lines`.
    pub fn file(shared_file: &str, filename: &str, lines: &[&str], steps: Vec<Step>) -> Self {
        Self {
            behaviour: Behaviour::FileProducing {
                shared_file: shared_file.to_string(),
                filename: filename.to_string(),
                lines: lines.iter().map(|l| l.to_string()).collect(),
            },
            steps,
            tests: Vec::new(),
        }
    }

    pub fn unsupported(name: &'static str) -> Self {
        Self {
            behaviour: Behaviour::Unsupported(name),
            steps: Vec::new(),
            tests: Vec::new(),
        }
    }

    pub fn with_tests(mut self, tests: Vec<IntegrationTest>) -> Self {
        self.tests = tests;
        self
    }

    fn run_steps(&self, env: &mut ExtensionEnv<'_>) -> Result<()> {
        for step in &self.steps {
            match step {
                Step::Log(message) => env.context().logger().log(message.clone()),
                Step::Warn(category, value) => env.usage_warning(category, value.as_deref()),
                Step::DeferError(category, value) => {
                    env.usage_error_defer(category, value.as_deref());
                }
                Step::Update(update) => env.context().queue_update(update.clone()),
                Step::Upload {
                    shared_file,
                    file_name,
                    content,
                } => {
                    env.context()
                        .files()
                        .upload(shared_file, file_name, content, FilePrefix::ProcessArtifact)?;
                }
                Step::RaiseDeferred => env.raise_deferred()?,
                Step::UsageError(message) => return Err(UsageError::new(message.clone()).into()),
                Step::Fail(message) => bail!("{message}"),
            }
        }
        Ok(())
    }
}

impl Extension for ScriptedExtension {
    fn kind(&mut self) -> ExtensionKind<'_> {
        match self.behaviour {
            Behaviour::General => ExtensionKind::General(self),
            Behaviour::FileProducing { .. } => ExtensionKind::FileProducing(self),
            Behaviour::Unsupported(name) => ExtensionKind::Unsupported(name),
        }
    }

    fn integration_tests(&self) -> Vec<IntegrationTest> {
        self.tests.clone()
    }
}

impl GeneralExtension for ScriptedExtension {
    fn execute(&mut self, env: &mut ExtensionEnv<'_>) -> Result<()> {
        self.run_steps(env)
    }
}

impl FileExtension for ScriptedExtension {
    fn shared_file(&self) -> String {
        match &self.behaviour {
            Behaviour::FileProducing { shared_file, .. } => shared_file.clone(),
            _ => String::new(),
        }
    }

    fn filename(&self) -> String {
        match &self.behaviour {
            Behaviour::FileProducing { filename, .. } => filename.clone(),
            _ => String::new(),
        }
    }

    fn content(&mut self, env: &mut ExtensionEnv<'_>) -> Result<Content> {
        self.run_steps(env)?;
        match &self.behaviour {
            Behaviour::FileProducing { lines, .. } => Ok(Content::Lines(lines.clone())),
            _ => Ok(Content::Lines(Vec::new())),
        }
    }
}

/// Transport answering with canned responses in order.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    responses: VecDeque<Response>,
    calls: Rc<Cell<usize>>,
    requests: Rc<RefCell<Vec<Request>>>,
}

impl ScriptedTransport {
    pub fn new(responses: Vec<Response>) -> Self {
        Self {
            responses: responses.into(),
            ..Self::default()
        }
    }

    /// Counter of calls that reached this transport.
    pub fn calls(&self) -> Rc<Cell<usize>> {
        Rc::clone(&self.calls)
    }

    /// Requests that reached this transport, in order.
    pub fn requests(&self) -> Rc<RefCell<Vec<Request>>> {
        Rc::clone(&self.requests)
    }
}

impl Transport for ScriptedTransport {
    fn send(&mut self, request: &Request) -> Result<Response> {
        self.calls.set(self.calls.get() + 1);
        self.requests.borrow_mut().push(request.clone());
        self.responses
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted response left for {} {}", request.method, request.url))
    }
}
