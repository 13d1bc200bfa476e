//! Directory helpers for run and frozen directories.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tracing::debug;
use walkdir::WalkDir;

/// Remove everything in `dir` except the top-level names listed in `keep`.
pub fn clean_directory(dir: &Path, keep: &[&str]) -> Result<()> {
    for entry in fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))? {
        let entry = entry.context("read entry")?;
        let name = entry.file_name();
        if keep.iter().any(|kept| name == *kept) {
            continue;
        }
        let path = entry.path();
        if entry.file_type().context("read file type")?.is_dir() {
            fs::remove_dir_all(&path).with_context(|| format!("remove {}", path.display()))?;
        } else {
            fs::remove_file(&path).with_context(|| format!("remove {}", path.display()))?;
        }
    }
    Ok(())
}

/// Recursively copy `src` into `dst`, creating `dst` and overwriting files.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    debug!(src = %src.display(), dst = %dst.display(), "copying tree");
    for entry in WalkDir::new(src).sort_by_file_name() {
        let entry = entry.with_context(|| format!("walk {}", src.display()))?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .with_context(|| format!("relativize {}", entry.path().display()))?;
        let target = dst.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("create {}", target.display()))?;
        } else {
            fs::copy(entry.path(), &target).with_context(|| {
                format!("copy {} to {}", entry.path().display(), target.display())
            })?;
        }
    }
    Ok(())
}

/// Write `contents` to `path` via a temp file and rename.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp_name = path
        .file_name()
        .with_context(|| format!("path missing file name {}", path.display()))?
        .to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = parent.join(tmp_name);
    fs::write(&tmp_path, contents).with_context(|| format!("write {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

/// List every file under `dir` with the first 7 hex chars of its SHA-256.
pub fn dir_tree(dir: &Path) -> Result<String> {
    let mut lines = vec![format!("Contents of '{}':", dir.display())];
    if !dir.exists() {
        return Ok(lines.join("\n"));
    }
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.with_context(|| format!("walk {}", dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let bytes =
            fs::read(entry.path()).with_context(|| format!("read {}", entry.path().display()))?;
        let digest = hex::encode(Sha256::digest(&bytes));
        lines.push(format!("\t{}: {}", &digest[..7], entry.path().display()));
    }
    Ok(lines.join("\n"))
}
