//! Execution session: the process-wide working directory and run log.
//!
//! Both are process-wide state shared by every run in a batch. Entering a
//! session switches into the run directory and installs a `tracing`
//! dispatcher writing `extensions.log`; the returned guard undoes both on
//! drop, including on early returns. A global lock serializes sessions, so
//! sessions must not be nested on one thread.

use std::env;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use tracing::subscriber::DefaultGuard;
use tracing::{Level, debug, warn};
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{Layer, fmt};

use crate::logging::console_filter;

/// Run log written inside every run directory.
pub const LOG_FILE_NAME: &str = "extensions.log";

/// Targets always captured into the run log.
pub const DEFAULT_LOG_TARGET: &str = "ext_runner";

/// Orchestration targets kept out of the run log. They log absolute paths,
/// which would make logs of two run directories differ.
pub const EXCLUDED_LOG_TARGETS: &[&str] = &["ext_runner::exec", "ext_runner::mode", "ext_runner::io"];

static SESSION_LOCK: Mutex<()> = Mutex::new(());

/// How the run log is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogMode {
    Truncate,
    Append,
}

/// Owner of the working-directory switch and the scoped run log.
#[derive(Debug, Clone)]
pub struct ExecutionSession {
    include: Vec<String>,
    exclude: Vec<String>,
    file_level: Level,
    console_level: String,
}

impl ExecutionSession {
    /// `extra_targets` are captured into the run log in addition to
    /// [`DEFAULT_LOG_TARGET`]; `console_level` keeps stderr output flowing
    /// while the scoped dispatcher is installed.
    pub fn new(extra_targets: &[String], console_level: &str) -> Self {
        let mut include = vec![DEFAULT_LOG_TARGET.to_string()];
        include.extend(extra_targets.iter().cloned());
        Self {
            include,
            exclude: EXCLUDED_LOG_TARGETS.iter().map(|t| t.to_string()).collect(),
            file_level: Level::DEBUG,
            console_level: console_level.to_string(),
        }
    }

    /// Maximum level written to the run log.
    pub fn with_file_level(mut self, level: Level) -> Self {
        self.file_level = level;
        self
    }

    /// Switch into `run_dir` and start writing its run log.
    pub fn enter(&self, run_dir: &Path, mode: LogMode) -> Result<SessionGuard> {
        let lock = SESSION_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        fs::create_dir_all(run_dir).with_context(|| format!("create {}", run_dir.display()))?;
        let log_path = run_dir.join(LOG_FILE_NAME);
        let file = open_log(&log_path, mode)?;
        let previous_dir = env::current_dir().context("read current directory")?;

        let log = tracing::subscriber::set_default(self.subscriber(file));
        let guard = SessionGuard {
            log: Some(log),
            previous_dir,
            log_path,
            _lock: lock,
        };
        env::set_current_dir(run_dir)
            .with_context(|| format!("switch to {}", run_dir.display()))?;
        debug!(path = %run_dir.display(), "entered run directory");
        Ok(guard)
    }

    fn subscriber(&self, file: File) -> impl tracing::Subscriber + Send + Sync + 'static {
        let include = self.include.clone();
        let exclude = self.exclude.clone();
        let max_level = self.file_level;
        let file_layer = fmt::layer()
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .without_time()
            .with_filter(filter_fn(move |meta| {
                meta.level() <= &max_level
                    && include.iter().any(|t| target_matches(meta.target(), t))
                    && !exclude.iter().any(|t| target_matches(meta.target(), t))
            }));
        let console_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .compact()
            .with_filter(console_filter(&self.console_level));
        tracing_subscriber::registry()
            .with(file_layer)
            .with(console_layer)
    }
}

/// Restores the previous working directory and detaches the run log on drop.
pub struct SessionGuard {
    log: Option<DefaultGuard>,
    previous_dir: PathBuf,
    log_path: PathBuf,
    _lock: MutexGuard<'static, ()>,
}

impl SessionGuard {
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        // Uninstall the dispatcher first so the restore is logged to the console only.
        drop(self.log.take());
        if let Err(err) = env::set_current_dir(&self.previous_dir) {
            warn!(
                error = %err,
                path = %self.previous_dir.display(),
                "could not restore working directory"
            );
        }
    }
}

fn open_log(path: &Path, mode: LogMode) -> Result<File> {
    let mut options = OpenOptions::new();
    options.create(true);
    match mode {
        LogMode::Append => options.append(true),
        LogMode::Truncate => options.write(true).truncate(true),
    };
    options
        .open(path)
        .with_context(|| format!("open {}", path.display()))
}

fn target_matches(target: &str, prefix: &str) -> bool {
    target == prefix
        || target
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with("::"))
}
