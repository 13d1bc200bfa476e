//! Context handed to extensions, and its local reference implementation.
//!
//! The harness only needs a narrow surface from the context: a step log, a
//! validation service, an update queue with commit / step-log-only commit, a
//! file uploader and shared-file downloads. [`LocalContext`] implements it
//! against the remote API through a [`Transport`], so a recorded network
//! cache is enough to replay a run offline.

use std::path::PathBuf;

use anyhow::{Context as _, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use crate::core::types::{FilePrefix, ValidationIssue, ValidationKind};
use crate::io::artifacts::ArtifactCache;
use crate::io::network::{CachingTransport, Request, Transport};
use crate::io::upload::{FileUploader, upload_file_name, write_upload};

/// User-visible log of one step, committed to the remote system.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepLog {
    lines: Vec<String>,
}

impl StepLog {
    pub fn log(&mut self, message: impl Into<String>) {
        let message = message.into();
        info!("{message}");
        self.lines.push(message);
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("{message}");
        self.lines.push(format!("WARNING: {message}"));
    }

    pub fn error(&mut self, message: impl Into<String>) {
        let message = message.into();
        error!("{message}");
        self.lines.push(format!("ERROR: {message}"));
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn text(&self) -> String {
        let mut text = self.lines.join("\n");
        if !text.is_empty() {
            text.push('\n');
        }
        text
    }
}

/// Collects validation issues and counts them by severity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationService {
    issues: Vec<ValidationIssue>,
    error_count: usize,
    warning_count: usize,
}

impl ValidationService {
    pub fn handle_single_validation(&mut self, issue: ValidationIssue) {
        match issue.kind {
            ValidationKind::Error => {
                self.error_count += 1;
                error!(message = %issue.message, "validation error");
            }
            ValidationKind::Warning => {
                self.warning_count += 1;
                warn!(message = %issue.message, "validation warning");
            }
        }
        self.issues.push(issue);
    }

    pub fn error_count(&self) -> usize {
        self.error_count
    }

    pub fn warning_count(&self) -> usize {
        self.warning_count
    }

    pub fn issues(&self) -> &[ValidationIssue] {
        &self.issues
    }
}

/// Opaque write queued for the remote system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Update {
    pub entity: String,
    pub field: String,
    pub value: Value,
}

impl Update {
    pub fn new(entity: impl Into<String>, field: impl Into<String>, value: Value) -> Self {
        Self {
            entity: entity.into(),
            field: field.into(),
            value,
        }
    }
}

/// Everything an extension may touch while it runs.
pub trait Context {
    fn pid(&self) -> &str;
    fn test_mode(&self) -> bool;
    fn logger(&mut self) -> &mut StepLog;
    fn validation(&mut self) -> &mut ValidationService;
    fn queue_update(&mut self, update: Update);
    fn files(&mut self) -> &mut dyn FileUploader;
    /// Download the shared file `name` into the run directory.
    fn local_shared_file(&mut self, name: &str) -> Result<PathBuf>;
    /// Send the update queue and the step log.
    fn commit(&mut self) -> Result<()>;
    /// Send only the step log; queued updates are discarded.
    fn commit_step_log_only(&mut self) -> Result<()>;
    /// Release per-run resources such as downloaded shared files.
    fn cleanup(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Parameters for creating the context of one execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextRequest {
    pub pid: String,
    /// Absolute run directory.
    pub run_dir: PathBuf,
    pub test_mode: bool,
    pub disable_commits: bool,
    /// Network cache file to record into and replay from, when enabled.
    pub network_cache: Option<PathBuf>,
    pub artifact_cache: bool,
}

/// Creates a fresh context per execution.
pub trait ContextFactory {
    fn create(&self, request: &ContextRequest) -> Result<Box<dyn Context>>;
}

/// Shared file attached to the step, as listed by the remote API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedFileRecord {
    pub name: String,
    pub artifact_id: String,
    #[serde(default)]
    pub file_id: Option<String>,
}

/// Context backed by the remote API.
pub struct LocalContext {
    pid: String,
    api_base_url: String,
    run_dir: PathBuf,
    test_mode: bool,
    disable_commits: bool,
    transport: Box<dyn Transport>,
    step_log: StepLog,
    validation: ValidationService,
    updates: Vec<Update>,
    shared_files: Option<Vec<SharedFileRecord>>,
    artifacts: ArtifactCache,
}

impl LocalContext {
    pub fn new(request: &ContextRequest, api_base_url: &str, transport: Box<dyn Transport>) -> Self {
        Self {
            pid: request.pid.clone(),
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            run_dir: request.run_dir.clone(),
            test_mode: request.test_mode,
            disable_commits: request.disable_commits,
            transport,
            step_log: StepLog::default(),
            validation: ValidationService::default(),
            updates: Vec::new(),
            shared_files: None,
            artifacts: ArtifactCache::new(&request.run_dir, request.artifact_cache),
        }
    }

    pub fn queued_updates(&self) -> &[Update] {
        &self.updates
    }

    fn shared_file(&mut self, name: &str) -> Result<SharedFileRecord> {
        let files = shared_files(
            self.transport.as_mut(),
            &self.api_base_url,
            &self.pid,
            &mut self.shared_files,
        )?;
        find_shared_file(files, name)
    }

    fn step_log_text(&self) -> String {
        let mut text = self.step_log.text();
        for issue in self.validation.issues() {
            let label = match issue.kind {
                ValidationKind::Error => "ERROR",
                ValidationKind::Warning => "WARNING",
            };
            text.push_str(&format!("{label}: {}\n", issue.message));
        }
        text
    }

    fn send(&mut self, request: Request) -> Result<()> {
        self.transport.send(&request)?.error_for_status(&request)?;
        Ok(())
    }

    fn send_step_log(&mut self) -> Result<()> {
        let url = format!("{}/steps/{}/step-log", self.api_base_url, self.pid);
        let body = self.step_log_text();
        self.send(Request::post(url, body))
    }
}

impl Context for LocalContext {
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
        let Self {
            transport,
            api_base_url,
            pid,
            shared_files: listed,
            artifacts,
            ..
        } = self;
        artifacts.fetch(name, || {
            let files = shared_files(transport.as_mut(), api_base_url, pid, listed)?;
            let record = find_shared_file(files, name)?;
            let file_id = record
                .file_id
                .ok_or_else(|| anyhow!("shared file '{name}' has no file attached"))?;
            let request = Request::get(format!("{api_base_url}/files/{file_id}/download"));
            let response = transport.send(&request)?.error_for_status(&request)?;
            Ok(response.body.into_bytes())
        })
    }

    fn commit(&mut self) -> Result<()> {
        if self.disable_commits {
            debug!(updates = self.updates.len(), "commits disabled, nothing sent");
            return Ok(());
        }
        let url = format!("{}/steps/{}/updates", self.api_base_url, self.pid);
        let body = serde_json::to_string(&self.updates).context("serialize update queue")?;
        self.send(Request::put(url, body))?;
        self.updates.clear();
        self.send_step_log()
    }

    fn commit_step_log_only(&mut self) -> Result<()> {
        self.updates.clear();
        if self.disable_commits {
            debug!("commits disabled, step log not sent");
            return Ok(());
        }
        self.send_step_log()
    }

    fn cleanup(&mut self) -> Result<()> {
        self.artifacts.cleanup()
    }
}

impl FileUploader for LocalContext {
    fn upload(
        &mut self,
        shared_file: &str,
        file_name: &str,
        content: &str,
        prefix: FilePrefix,
    ) -> Result<PathBuf> {
        let record = self.shared_file(shared_file)?;
        let stored = upload_file_name(&self.pid, &record.artifact_id, file_name, prefix);
        let path = write_upload(&self.run_dir, &stored, content)?;
        self.updates.push(Update::new(
            format!("artifact/{}", record.artifact_id),
            "file",
            json!({ "name": stored }),
        ));
        self.step_log
            .log(format!("Uploaded '{stored}' to shared file '{shared_file}'"));
        Ok(path)
    }
}

fn shared_files<'a>(
    transport: &mut dyn Transport,
    api_base_url: &str,
    pid: &str,
    listed: &'a mut Option<Vec<SharedFileRecord>>,
) -> Result<&'a [SharedFileRecord]> {
    if listed.is_none() {
        let request = Request::get(format!("{api_base_url}/steps/{pid}/shared-files"));
        let response = transport.send(&request)?.error_for_status(&request)?;
        let files: Vec<SharedFileRecord> =
            serde_json::from_str(&response.body).context("parse shared file listing")?;
        *listed = Some(files);
    }
    Ok(listed.as_deref().unwrap_or_default())
}

fn find_shared_file(files: &[SharedFileRecord], name: &str) -> Result<SharedFileRecord> {
    let matching: Vec<&SharedFileRecord> = files.iter().filter(|f| f.name == name).collect();
    match matching.as_slice() {
        [only] => Ok((*only).clone()),
        _ => {
            let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
            bail!(
                "Expected 1 shared file, got {}.\nFile: '{name}'\nFiles: {}",
                matching.len(),
                names.join(", ")
            )
        }
    }
}

/// Builds transports for [`LocalContext`].
pub type TransportFactory = Box<dyn Fn() -> Box<dyn Transport>>;

/// Creates [`LocalContext`]s, wrapping the transport in the network cache
/// when the request asks for it.
pub struct LocalContextFactory {
    api_base_url: String,
    transport_factory: TransportFactory,
}

impl LocalContextFactory {
    pub fn new(api_base_url: impl Into<String>, transport_factory: TransportFactory) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            transport_factory,
        }
    }
}

impl ContextFactory for LocalContextFactory {
    fn create(&self, request: &ContextRequest) -> Result<Box<dyn Context>> {
        let inner = (self.transport_factory)();
        let transport: Box<dyn Transport> = match &request.network_cache {
            Some(path) => Box::new(CachingTransport::open(inner, path)?),
            None => inner,
        };
        Ok(Box::new(LocalContext::new(
            request,
            &self.api_base_url,
            transport,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::network::Response;
    use crate::test_support::ScriptedTransport;

    const API: &str = "https://lims/api/v2";

    fn request(run_dir: &std::path::Path, disable_commits: bool) -> ContextRequest {
        ContextRequest {
            pid: "1001".to_string(),
            run_dir: run_dir.to_path_buf(),
            test_mode: true,
            disable_commits,
            network_cache: None,
            artifact_cache: false,
        }
    }

    fn listing() -> Response {
        Response::ok(
            r#"[{"name":"Robot file","artifact_id":"92","file_id":null},
                {"name":"Plate layout","artifact_id":"93","file_id":"40"}]"#,
        )
    }

    #[test]
    fn upload_writes_prefixed_file_and_queues_update() {
        let temp = tempfile::tempdir().expect("tempdir");
        let transport = ScriptedTransport::new(vec![listing()]);
        let mut context = LocalContext::new(&request(temp.path(), true), API, Box::new(transport));

        let path = context
            .files()
            .upload("Robot file", "robot.csv", "a,b\n", FilePrefix::ProcessArtifact)
            .expect("upload");

        assert_eq!(path, temp.path().join("uploaded/1001-92_robot.csv"));
        assert_eq!(context.queued_updates().len(), 1);
        assert_eq!(context.queued_updates()[0].entity, "artifact/92");
        assert_eq!(context.logger().lines().len(), 1);
    }

    #[test]
    fn unknown_shared_file_lists_candidates() {
        let temp = tempfile::tempdir().expect("tempdir");
        let transport = ScriptedTransport::new(vec![listing()]);
        let mut context = LocalContext::new(&request(temp.path(), true), API, Box::new(transport));

        let err = context
            .files()
            .upload("Missing", "x.csv", "", FilePrefix::None)
            .expect_err("missing shared file");
        let message = err.to_string();
        assert!(message.contains("Expected 1 shared file, got 0."));
        assert!(message.contains("Robot file, Plate layout"));
    }

    #[test]
    fn local_shared_file_downloads_by_file_id() {
        let temp = tempfile::tempdir().expect("tempdir");
        let transport = ScriptedTransport::new(vec![listing(), Response::ok("A1,B1\n")]);
        let seen = transport.requests();
        let mut context = LocalContext::new(&request(temp.path(), true), API, Box::new(transport));

        let path = context.local_shared_file("Plate layout").expect("download");
        assert_eq!(path, temp.path().join("Plate_layout"));
        assert_eq!(std::fs::read_to_string(&path).expect("read"), "A1,B1\n");
        assert_eq!(seen.borrow()[1].url, format!("{API}/files/40/download"));

        context.cleanup().expect("cleanup");
        assert!(!path.exists());
    }

    #[test]
    fn disabled_commits_send_nothing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let transport = ScriptedTransport::new(Vec::new());
        let calls = transport.calls();
        let mut context = LocalContext::new(&request(temp.path(), true), API, Box::new(transport));
        context.queue_update(Update::new("sample/1", "volume", json!(10)));
        context.commit().expect("commit");
        context.commit_step_log_only().expect("step log");
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn commit_sends_updates_then_step_log() {
        let temp = tempfile::tempdir().expect("tempdir");
        let transport = ScriptedTransport::new(vec![Response::ok(""), Response::ok("")]);
        let seen = transport.requests();
        let mut context =
            LocalContext::new(&request(temp.path(), false), API, Box::new(transport));
        context.queue_update(Update::new("sample/1", "volume", json!(10)));
        context.logger().log("volumes updated");
        context.commit().expect("commit");

        let seen = seen.borrow();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].method, "PUT");
        assert_eq!(seen[0].url, format!("{API}/steps/1001/updates"));
        assert!(seen[0].body.as_deref().is_some_and(|b| b.contains("volume")));
        assert_eq!(seen[1].method, "POST");
        assert_eq!(seen[1].body.as_deref(), Some("volumes updated\n"));
    }

    #[test]
    fn step_log_only_commit_discards_updates() {
        let temp = tempfile::tempdir().expect("tempdir");
        let transport = ScriptedTransport::new(vec![Response::ok("")]);
        let seen = transport.requests();
        let mut context =
            LocalContext::new(&request(temp.path(), false), API, Box::new(transport));
        context.queue_update(Update::new("sample/1", "volume", json!(10)));
        context
            .validation()
            .handle_single_validation(ValidationIssue::error("volume too low"));
        context.commit_step_log_only().expect("step log");

        assert!(context.queued_updates().is_empty());
        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].body.as_deref(), Some("ERROR: volume too low\n"));
    }

    #[test]
    fn validation_service_counts_by_kind() {
        let mut validation = ValidationService::default();
        validation.handle_single_validation(ValidationIssue::error("a"));
        validation.handle_single_validation(ValidationIssue::warning("b"));
        validation.handle_single_validation(ValidationIssue::warning("c"));
        assert_eq!(validation.error_count(), 1);
        assert_eq!(validation.warning_count(), 2);
    }
}
