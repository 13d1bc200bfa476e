//! Command-line surface shared by the shipped binary and downstream ones.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context as _, Result};
use clap::{ArgAction, Parser, Subcommand};
use regex::Regex;
use tracing::{debug, error};

use crate::context::ContextFactory;
use crate::core::args::parse_run_arguments;
use crate::core::types::{RunArguments, RunMode};
use crate::error::RunError;
use crate::exec::contextual_message;
use crate::exit_codes;
use crate::extension::ExtensionRegistry;
use crate::io::config::{HarnessConfig, find_config, load_config};
use crate::io::session::{ExecutionSession, LOG_FILE_NAME};
use crate::logging;
use crate::mode::{ModeRequest, RunModeController};

#[derive(Debug, Parser)]
#[command(
    name = "ext-runner",
    version,
    about = "Run extensions against a process instance, record and validate their output"
)]
pub struct Cli {
    /// Console log level, used when `RUST_LOG` is unset.
    #[arg(long, global = true, default_value = "warn")]
    pub level: String,

    /// Config file; searched for when omitted.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run one extension in exec, test, test-fresh or freeze mode.
    Extension {
        /// Dotted module name, e.g. `scripts.lab.sample_list`.
        module: String,
        /// One of exec, test, test-fresh, freeze.
        mode: String,
        /// Run arguments, e.g. "pid=24-1001 commit=true". Repeatable.
        #[arg(long = "args")]
        args: Vec<String>,
        /// Record and replay network calls in test mode (default: true).
        #[arg(long, action = ArgAction::Set)]
        cache: Option<bool>,
    },
    /// Test every matching module against its frozen data.
    ///
    /// Exits with the number of runs that differ.
    Validate {
        /// Regex over module names.
        #[arg(default_value = ".*")]
        pattern: String,
    },
    /// List registered extensions.
    List,
}

/// Parse the process arguments and run. Returns the exit code.
///
/// `contexts` builds the context factory once the config is known.
pub fn main_with<F>(registry: ExtensionRegistry, contexts: F) -> i32
where
    F: FnOnce(&HarnessConfig) -> Box<dyn ContextFactory>,
{
    run(Cli::parse(), registry, contexts)
}

/// Run an already parsed command line. Returns the exit code.
pub fn run<F>(cli: Cli, registry: ExtensionRegistry, contexts: F) -> i32
where
    F: FnOnce(&HarnessConfig) -> Box<dyn ContextFactory>,
{
    logging::init(&cli.level);
    let config = match resolve_config(cli.config.as_ref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err:#}");
            return exit_codes::HAS_ERRORS;
        }
    };
    let contexts = contexts(&config);
    let session = ExecutionSession::new(&config.log_targets, &cli.level);

    match cli.command {
        Command::Extension {
            module,
            mode,
            args,
            cache,
        } => cmd_extension(
            &config,
            &registry,
            contexts.as_ref(),
            &session,
            &module,
            &mode,
            &args,
            cache,
        ),
        Command::Validate { pattern } => {
            match cmd_validate(&config, &registry, contexts.as_ref(), &session, &pattern) {
                Ok(code) => code,
                Err(err) => {
                    eprintln!("{err:#}");
                    exit_codes::HAS_ERRORS
                }
            }
        }
        Command::List => {
            for module in registry.modules() {
                println!("{module}");
            }
            exit_codes::OK
        }
    }
}

fn resolve_config(path: Option<&PathBuf>) -> Result<HarnessConfig> {
    match path {
        Some(path) => load_config(path),
        None => find_config(),
    }
}

#[allow(clippy::too_many_arguments)]
fn cmd_extension(
    config: &HarnessConfig,
    registry: &ExtensionRegistry,
    contexts: &dyn ContextFactory,
    session: &ExecutionSession,
    module: &str,
    mode: &str,
    args: &[String],
    cache: Option<bool>,
) -> i32 {
    let parsed: Result<RunMode, RunError> = mode.parse();
    let run_mode = parsed.as_ref().ok().copied();
    let outcome = parsed.map_err(anyhow::Error::from).and_then(|mode| {
        let request = ModeRequest {
            module: module.to_string(),
            mode,
            args: parse_args(args, mode)?,
            use_cache: cache,
        };
        RunModeController::new(config, registry, contexts, session).run(&request)
    });

    match outcome {
        Ok(report) => {
            for difference in report.differences() {
                println!("Results differ from frozen data: {difference}");
            }
            for failure in report.failures() {
                eprintln!("{failure}");
            }
            if report.has_errors {
                exit_codes::HAS_ERRORS
            } else {
                exit_codes::OK
            }
        }
        Err(err) => {
            match run_mode {
                Some(mode) if mode.is_test() => eprintln!("{err:?}"),
                Some(RunMode::Exec) => {
                    error!(error = %format!("{err:#}"), "exception while running extension");
                    let log_path = config.exec_root_path.join(LOG_FILE_NAME);
                    eprintln!("{}", contextual_message(module, &err, Some(&log_path)));
                }
                _ => eprintln!("{}", contextual_message(module, &err, None)),
            }
            exit_codes::HAS_ERRORS
        }
    }
}

fn parse_args(raw: &[String], mode: RunMode) -> Result<Option<Vec<RunArguments>>> {
    if raw.is_empty() {
        return Ok(None);
    }
    let commit_by_default = matches!(mode, RunMode::Exec);
    raw.iter()
        .map(|args| {
            parse_run_arguments(args, commit_by_default)
                .with_context(|| format!("parse run arguments '{args}'"))
        })
        .collect::<Result<Vec<_>>>()
        .map(Some)
}

fn cmd_validate(
    config: &HarnessConfig,
    registry: &ExtensionRegistry,
    contexts: &dyn ContextFactory,
    session: &ExecutionSession,
    pattern: &str,
) -> Result<i32> {
    let started = Instant::now();
    let pattern = Regex::new(pattern).with_context(|| format!("parse module pattern '{pattern}'"))?;
    let mut controller = RunModeController::new(config, registry, contexts, session);
    let mut failed: usize = 0;

    for module in registry.matching(&pattern) {
        let request = ModeRequest {
            module: module.to_string(),
            mode: RunMode::Test {
                validate_against_frozen: true,
            },
            args: None,
            use_cache: Some(true),
        };
        match controller.run(&request) {
            Ok(report) => {
                for difference in report.differences() {
                    println!("Results differ from frozen data: {difference}");
                    failed += 1;
                }
                if report.has_errors {
                    failed += 1;
                }
            }
            Err(err)
                if matches!(
                    err.downcast_ref::<RunError>(),
                    Some(RunError::NoTestsFound { .. })
                ) =>
            {
                debug!(module, "no integration tests, skipping");
            }
            Err(err) => {
                eprintln!("{module}: {err:#}");
                failed += 1;
            }
        }
    }

    if failed == 0 {
        println!(
            "\nAll integration tests ran successfully ({:.3}s)",
            started.elapsed().as_secs_f64()
        );
    }
    Ok(exit_codes::failed_runs(failed))
}
