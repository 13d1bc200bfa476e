//! Harness configuration stored in `ext-runner.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::path::RunRoots;

pub const CONFIG_FILE_NAME: &str = "ext-runner.toml";

/// Harness configuration (TOML).
///
/// Missing fields default to values suitable for running from a scripts
/// checkout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HarnessConfig {
    /// Root of `run-test` directories.
    pub test_root_path: PathBuf,

    /// Root of `run-freeze` baselines.
    pub frozen_root_path: PathBuf,

    /// Working directory for production runs.
    pub exec_root_path: PathBuf,

    /// Base URL of the remote API used by the local context.
    pub api_base_url: String,

    /// Extra tracing target prefixes captured into `extensions.log`.
    pub log_targets: Vec<String>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            test_root_path: PathBuf::from("./int_tests"),
            frozen_root_path: PathBuf::from("./int_tests"),
            exec_root_path: PathBuf::from("."),
            api_base_url: "https://lims-server/api/v2".to_string(),
            log_targets: Vec::new(),
        }
    }
}

impl HarnessConfig {
    pub fn validate(&self) -> Result<()> {
        for (key, path) in [
            ("test_root_path", &self.test_root_path),
            ("frozen_root_path", &self.frozen_root_path),
            ("exec_root_path", &self.exec_root_path),
        ] {
            if path.as_os_str().is_empty() {
                return Err(anyhow!("{key} must not be empty"));
            }
        }
        if self.api_base_url.trim().is_empty() {
            return Err(anyhow!("api_base_url must not be empty"));
        }
        Ok(())
    }

    pub fn roots(&self) -> RunRoots<'_> {
        RunRoots {
            test: &self.test_root_path,
            frozen: &self.frozen_root_path,
            exec: &self.exec_root_path,
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `HarnessConfig::default()`.
pub fn load_config(path: &Path) -> Result<HarnessConfig> {
    if !path.exists() {
        let cfg = HarnessConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: HarnessConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Candidate config locations, most specific first.
pub fn config_search_path() -> Vec<PathBuf> {
    let mut candidates = vec![PathBuf::from(".").join(CONFIG_FILE_NAME)];
    if let Some(home) = std::env::var_os("HOME") {
        candidates.push(
            PathBuf::from(home)
                .join(".config")
                .join("ext-runner")
                .join(CONFIG_FILE_NAME),
        );
    }
    candidates.push(PathBuf::from("/etc/ext-runner").join(CONFIG_FILE_NAME));
    candidates
}

/// Load the first config found on the search path, or the defaults.
pub fn find_config() -> Result<HarnessConfig> {
    for candidate in config_search_path() {
        if candidate.is_file() {
            debug!(path = %candidate.display(), "using config");
            return load_config(&candidate);
        }
    }
    debug!("no config file found, using defaults");
    let cfg = HarnessConfig::default();
    cfg.validate()?;
    Ok(cfg)
}
