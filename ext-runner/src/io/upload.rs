//! File-upload seam and the on-disk naming of uploaded files.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::core::types::FilePrefix;

/// Directory inside a run directory holding uploaded files.
pub const UPLOADED_DIR: &str = "uploaded";

/// Accepts rendered content destined for a shared file.
pub trait FileUploader {
    /// Store `content` for `shared_file` and return the written path.
    fn upload(
        &mut self,
        shared_file: &str,
        file_name: &str,
        content: &str,
        prefix: FilePrefix,
    ) -> Result<PathBuf>;
}

/// Stored name of an uploaded file.
///
/// With [`FilePrefix::ProcessArtifact`] the name starts with
/// `<pid>-<artifact id>`, the key snapshots are compared by.
pub fn upload_file_name(pid: &str, artifact_id: &str, file_name: &str, prefix: FilePrefix) -> String {
    match prefix {
        FilePrefix::ProcessArtifact => format!("{pid}-{artifact_id}_{file_name}"),
        FilePrefix::None => file_name.to_string(),
    }
}

/// Write `content` to `<run_dir>/uploaded/<stored_name>`.
pub fn write_upload(run_dir: &Path, stored_name: &str, content: &str) -> Result<PathBuf> {
    let dir = run_dir.join(UPLOADED_DIR);
    fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
    let path = dir.join(stored_name);
    fs::write(&path, content).with_context(|| format!("write {}", path.display()))?;
    Ok(path)
}
