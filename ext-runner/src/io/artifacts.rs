//! Download cache for shared files (`.cache/`).

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result, bail};
use regex::Regex;
use tracing::info;

use crate::io::cache::ARTIFACT_CACHE_DIR;

static SHARED_FILE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\w ]+$").expect("valid shared file regex"));

/// Local file name for a shared file: spaces become underscores.
///
/// Only names made of word characters and spaces are accepted so a name can
/// never escape the work directory.
pub fn local_file_name(name: &str) -> Result<String> {
    if !SHARED_FILE_NAME.is_match(name) {
        bail!(
            "file name '{name}' can only contain alphanumeric characters, underscores and spaces"
        );
    }
    Ok(name.replace(' ', "_"))
}

/// Read-through cache of downloaded shared files, keyed by file name.
#[derive(Debug)]
pub struct ArtifactCache {
    work_dir: PathBuf,
    enabled: bool,
    fetched: Vec<PathBuf>,
}

impl ArtifactCache {
    pub fn new(work_dir: &Path, enabled: bool) -> Self {
        Self {
            work_dir: work_dir.to_path_buf(),
            enabled,
            fetched: Vec::new(),
        }
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.work_dir.join(ARTIFACT_CACHE_DIR)
    }

    /// Make the shared file `name` available in the work directory.
    ///
    /// A cached copy wins; otherwise an existing local copy is reused;
    /// otherwise `download` is called once and the result is cached.
    pub fn fetch<F>(&mut self, name: &str, download: F) -> Result<PathBuf>
    where
        F: FnOnce() -> Result<Vec<u8>>,
    {
        let file_name = local_file_name(name)?;
        let local_path = self.work_dir.join(&file_name);
        let cache_path = self.cache_dir().join(&file_name);

        if self.enabled && cache_path.is_file() {
            info!(path = %cache_path.display(), "fetching cached artifact");
            fs::copy(&cache_path, &local_path).with_context(|| {
                format!("copy {} to {}", cache_path.display(), local_path.display())
            })?;
        } else if !local_path.exists() {
            let bytes = download().with_context(|| format!("download shared file '{name}'"))?;
            fs::write(&local_path, bytes)
                .with_context(|| format!("write {}", local_path.display()))?;
            info!(path = %local_path.display(), "download completed");
            if self.enabled {
                let cache_dir = self.cache_dir();
                fs::create_dir_all(&cache_dir)
                    .with_context(|| format!("create {}", cache_dir.display()))?;
                fs::copy(&local_path, &cache_path).with_context(|| {
                    format!("copy {} to {}", local_path.display(), cache_path.display())
                })?;
            }
        }

        if !self.fetched.contains(&local_path) {
            self.fetched.push(local_path.clone());
        }
        Ok(local_path)
    }

    /// Remove the local copies handed out by [`ArtifactCache::fetch`].
    ///
    /// The cache directory itself is kept.
    pub fn cleanup(&mut self) -> Result<()> {
        for path in self.fetched.drain(..) {
            if path.exists() {
                info!(path = %path.display(), "removing local shared file");
                fs::remove_file(&path).with_context(|| format!("remove {}", path.display()))?;
            }
        }
        Ok(())
    }
}
