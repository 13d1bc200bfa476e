//! Cache policy for run directories.
//!
//! Two caches live in every run directory: the network cache file and the
//! artifact cache directory. A frozen-validation test keeps them and replays
//! the frozen baseline's copies; a fresh test wipes everything; freezing
//! replaces the baseline wholesale.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{Level, debug, enabled, info};

use crate::io::dirs::{clean_directory, copy_tree, dir_tree};

/// Network cache file name inside a run directory.
pub const NETWORK_CACHE_FILE: &str = ".http_cache.json";
/// Artifact cache directory name inside a run directory.
pub const ARTIFACT_CACHE_DIR: &str = ".cache";

/// Selects and applies the cache policy for each run directory.
#[derive(Debug, Default)]
pub struct CacheManager {
    network_cache_enabled: bool,
}

impl CacheManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Turn on record/replay for every context created afterwards.
    ///
    /// Idempotent; never undone for the lifetime of the manager.
    pub fn enable_network_cache(&mut self) {
        if !self.network_cache_enabled {
            info!(cache = NETWORK_CACHE_FILE, "using network cache");
        }
        self.network_cache_enabled = true;
    }

    pub fn network_cache_enabled(&self) -> bool {
        self.network_cache_enabled
    }

    /// Prepare a test run that replays the frozen baseline's caches.
    ///
    /// Everything but the cache entries is removed from `run_dir`; the frozen
    /// network cache file overwrites the local one and the frozen artifact
    /// cache replaces the local one.
    pub fn prepare_frozen_test(&self, run_dir: &Path, frozen_dir: &Path) -> Result<()> {
        info!(frozen = %frozen_dir.display(), "preparing frozen test");
        if run_dir.exists() {
            info!(path = %run_dir.display(), "cleaning run directory of everything but the caches");
            clean_directory(run_dir, &[NETWORK_CACHE_FILE, ARTIFACT_CACHE_DIR])?;
        } else {
            create_run_dir(run_dir)?;
        }

        let frozen_network_cache = frozen_dir.join(NETWORK_CACHE_FILE);
        if frozen_network_cache.is_file() {
            info!("frozen network cache exists and will be copied to the run directory");
            let target = run_dir.join(NETWORK_CACHE_FILE);
            fs::copy(&frozen_network_cache, &target).with_context(|| {
                format!(
                    "copy {} to {}",
                    frozen_network_cache.display(),
                    target.display()
                )
            })?;
        }

        let frozen_artifacts = frozen_dir.join(ARTIFACT_CACHE_DIR);
        if frozen_artifacts.is_dir() {
            let target = run_dir.join(ARTIFACT_CACHE_DIR);
            if target.exists() {
                fs::remove_dir_all(&target)
                    .with_context(|| format!("remove {}", target.display()))?;
            }
            info!("frozen artifact cache exists and will be used");
            copy_tree(&frozen_artifacts, &target)?;
        }

        debug_listing(run_dir, frozen_dir);
        Ok(())
    }

    /// Prepare a test run that ignores the frozen baseline entirely.
    pub fn prepare_fresh_test(&self, run_dir: &Path) -> Result<()> {
        if run_dir.exists() {
            info!(path = %run_dir.display(), "cleaning run directory");
            clean_directory(run_dir, &[])
        } else {
            create_run_dir(run_dir)
        }
    }

    /// Replace `frozen_dir` with a full copy of `test_dir`.
    pub fn freeze(&self, test_dir: &Path, frozen_dir: &Path) -> Result<()> {
        if frozen_dir.exists() {
            info!(path = %frozen_dir.display(), "removing old frozen directory");
            fs::remove_dir_all(frozen_dir)
                .with_context(|| format!("remove {}", frozen_dir.display()))?;
        }
        copy_tree(test_dir, frozen_dir)?;
        debug_listing(test_dir, frozen_dir);
        Ok(())
    }
}

fn create_run_dir(run_dir: &Path) -> Result<()> {
    info!(path = %run_dir.display(), "creating an empty run directory");
    fs::create_dir_all(run_dir).with_context(|| format!("create {}", run_dir.display()))
}

fn debug_listing(a: &Path, b: &Path) {
    if !enabled!(Level::DEBUG) {
        return;
    }
    for dir in [a, b] {
        match dir_tree(dir) {
            Ok(listing) => debug!("{listing}"),
            Err(err) => debug!(error = %err, "could not list {}", dir.display()),
        }
    }
}
