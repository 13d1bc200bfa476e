//! Indexing and comparison of run directories.
//!
//! Uploaded file names carry non-stable suffixes, so files are paired by
//! their `<pid>-<artifact id>` key. Structural problems (malformed names,
//! duplicate keys, differing key sets, a log present on one side only) fail
//! the whole comparison; only content differences are reported as entries.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::core::diff::{file_key, truncated_bytes_diff};
use crate::error::SnapshotError;
use crate::io::session::LOG_FILE_NAME;
use crate::io::upload::UPLOADED_DIR;

/// What a report entry compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffKind {
    Uploaded,
    Logs,
}

impl fmt::Display for DiffKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DiffKind::Uploaded => "uploaded",
            DiffKind::Logs => "logs",
        })
    }
}

/// One content difference between two run directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffEntry {
    pub kind: DiffKind,
    pub key: String,
    /// Unified diff, at most `DIFF_LINE_LIMIT` lines.
    pub diff: String,
}

/// Indexed view of one run directory.
#[derive(Debug, Clone)]
pub struct RunDirectoryInfo {
    path: PathBuf,
    uploaded: BTreeMap<String, PathBuf>,
}

impl RunDirectoryInfo {
    /// Index the top level of `<path>/uploaded`.
    ///
    /// A missing `uploaded/` directory indexes as empty.
    pub fn index(path: &Path) -> Result<Self, SnapshotError> {
        let dir = path.join(UPLOADED_DIR);
        let mut uploaded = BTreeMap::new();
        if dir.exists() {
            let entries = fs::read_dir(&dir).map_err(|source| SnapshotError::Io {
                path: dir.clone(),
                source,
            })?;
            for entry in entries {
                let entry = entry.map_err(|source| SnapshotError::Io {
                    path: dir.clone(),
                    source,
                })?;
                let file_path = entry.path();
                if !file_path.is_file() {
                    return Err(SnapshotError::NotAFile { path: file_path });
                }
                let name = entry.file_name().to_string_lossy().into_owned();
                let key = file_key(&name)
                    .ok_or_else(|| SnapshotError::MalformedFileName {
                        dir: dir.clone(),
                        name: name.clone(),
                    })?
                    .to_string();
                if uploaded.contains_key(&key) {
                    return Err(SnapshotError::DuplicateKey {
                        dir: dir.clone(),
                        key,
                    });
                }
                uploaded.insert(key, file_path);
            }
        }
        debug!(path = %path.display(), files = uploaded.len(), "indexed run directory");
        Ok(Self {
            path: path.to_path_buf(),
            uploaded,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn keys(&self) -> BTreeSet<String> {
        self.uploaded.keys().cloned().collect()
    }

    pub fn uploaded_file(&self, key: &str) -> Option<&Path> {
        self.uploaded.get(key).map(PathBuf::as_path)
    }

    fn log_path(&self) -> PathBuf {
        self.path.join(LOG_FILE_NAME)
    }

    /// Compare against `other`. An empty result means no regression.
    pub fn compare(&self, other: &RunDirectoryInfo) -> Result<Vec<DiffEntry>, SnapshotError> {
        let left = self.keys();
        let right = other.keys();
        if left != right {
            return Err(SnapshotError::KeyMismatch { left, right });
        }

        let mut report = Vec::new();
        for (key, path) in &self.uploaded {
            let Some(other_path) = other.uploaded.get(key) else {
                continue;
            };
            let ours = read_bytes(path)?;
            let theirs = read_bytes(other_path)?;
            if let Some(diff) = truncated_bytes_diff(
                &ours,
                &theirs,
                &path.display().to_string(),
                &other_path.display().to_string(),
            ) {
                report.push(DiffEntry {
                    kind: DiffKind::Uploaded,
                    key: key.clone(),
                    diff,
                });
            }
        }

        let ours = self.log_path();
        let theirs = other.log_path();
        match (ours.is_file(), theirs.is_file()) {
            (true, true) => {
                if let Some(diff) = truncated_bytes_diff(
                    &read_bytes(&ours)?,
                    &read_bytes(&theirs)?,
                    &ours.display().to_string(),
                    &theirs.display().to_string(),
                ) {
                    report.push(DiffEntry {
                        kind: DiffKind::Logs,
                        key: LOG_FILE_NAME.to_string(),
                        diff,
                    });
                }
            }
            (true, false) => {
                return Err(SnapshotError::InconsistentLogs {
                    present: ours,
                    missing: theirs,
                });
            }
            (false, true) => {
                return Err(SnapshotError::InconsistentLogs {
                    present: theirs,
                    missing: ours,
                });
            }
            (false, false) => {}
        }
        Ok(report)
    }
}

fn read_bytes(path: &Path) -> Result<Vec<u8>, SnapshotError> {
    fs::read(path).map_err(|source| SnapshotError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::diff::DIFF_LINE_LIMIT;

    fn write(path: &Path, contents: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(path, contents).expect("write");
    }

    fn run_dir(root: &Path, name: &str, files: &[(&str, &str)], log: Option<&str>) -> PathBuf {
        let dir = root.join(name);
        fs::create_dir_all(&dir).expect("create run dir");
        for (file, contents) in files {
            write(&dir.join(UPLOADED_DIR).join(file), contents);
        }
        if let Some(log) = log {
            write(&dir.join(LOG_FILE_NAME), log);
        }
        dir
    }

    #[test]
    fn identical_runs_have_empty_report() {
        let temp = tempfile::tempdir().expect("tempdir");
        let a = run_dir(
            temp.path(),
            "a",
            &[("1001-7_robot_a1b2.csv", "x\ny\n")],
            Some("INFO ran\n"),
        );
        let b = run_dir(
            temp.path(),
            "b",
            &[("1001-7_robot_c3d4.csv", "x\ny\n")],
            Some("INFO ran\n"),
        );

        let left = RunDirectoryInfo::index(&a).expect("index a");
        let right = RunDirectoryInfo::index(&b).expect("index b");
        assert!(left.compare(&right).expect("compare").is_empty());
    }

    #[test]
    fn one_changed_line_yields_one_bounded_entry() {
        let temp = tempfile::tempdir().expect("tempdir");
        let before: String = (0..40).map(|i| format!("row {i}\n")).collect();
        let after = before.replace("row 20\n", "row twenty\n");
        let a = run_dir(temp.path(), "a", &[("1001-7_out.csv", &before)], None);
        let b = run_dir(temp.path(), "b", &[("1001-7_out.csv", &after)], None);

        let report = RunDirectoryInfo::index(&a)
            .expect("index a")
            .compare(&RunDirectoryInfo::index(&b).expect("index b"))
            .expect("compare");

        assert_eq!(report.len(), 1);
        assert_eq!(report[0].kind, DiffKind::Uploaded);
        assert_eq!(report[0].key, "1001-7");
        assert!(report[0].diff.lines().count() <= DIFF_LINE_LIMIT);
        assert!(report[0].diff.contains("-row 20"));
    }

    #[test]
    fn non_utf8_byte_changes_are_reported() {
        let temp = tempfile::tempdir().expect("tempdir");
        let a = run_dir(temp.path(), "a", &[], None);
        let b = run_dir(temp.path(), "b", &[], None);
        fs::create_dir_all(a.join(UPLOADED_DIR)).expect("mkdir");
        fs::create_dir_all(b.join(UPLOADED_DIR)).expect("mkdir");
        fs::write(a.join(UPLOADED_DIR).join("1001-7_plate.bin"), [0x41, 0xFF, 0x0A]).expect("write");
        fs::write(b.join(UPLOADED_DIR).join("1001-7_plate.bin"), [0x41, 0xFE, 0x0A]).expect("write");

        let report = RunDirectoryInfo::index(&a)
            .expect("index a")
            .compare(&RunDirectoryInfo::index(&b).expect("index b"))
            .expect("compare");

        assert_eq!(report.len(), 1);
        assert_eq!(report[0].key, "1001-7");
        assert!(report[0].diff.starts_with("Binary files "));
    }

    #[test]
    fn malformed_name_fails_indexing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = run_dir(
            temp.path(),
            "a",
            &[("1001-7_ok.csv", "x"), ("report.csv", "y")],
            None,
        );
        let err = RunDirectoryInfo::index(&dir).expect_err("malformed");
        assert!(matches!(err, SnapshotError::MalformedFileName { ref name, .. } if name == "report.csv"));
    }

    #[test]
    fn duplicate_keys_fail_indexing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = run_dir(
            temp.path(),
            "a",
            &[("1001-7_a.csv", "x"), ("1001-7_b.csv", "y")],
            None,
        );
        let err = RunDirectoryInfo::index(&dir).expect_err("duplicate");
        assert!(matches!(err, SnapshotError::DuplicateKey { ref key, .. } if key == "1001-7"));
    }

    #[test]
    fn nested_directories_are_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = run_dir(temp.path(), "a", &[], None);
        fs::create_dir_all(dir.join(UPLOADED_DIR).join("1001-7_dir")).expect("mkdir");
        let err = RunDirectoryInfo::index(&dir).expect_err("directory entry");
        assert!(matches!(err, SnapshotError::NotAFile { .. }));
    }

    #[test]
    fn key_mismatch_is_symmetric() {
        let temp = tempfile::tempdir().expect("tempdir");
        let a = RunDirectoryInfo::index(&run_dir(
            temp.path(),
            "a",
            &[("1001-7_x.csv", "x"), ("1001-8_y.csv", "y")],
            None,
        ))
        .expect("index a");
        let b = RunDirectoryInfo::index(&run_dir(
            temp.path(),
            "b",
            &[("1001-7_x.csv", "x")],
            None,
        ))
        .expect("index b");

        let forward = a.compare(&b).expect_err("a vs b");
        let backward = b.compare(&a).expect_err("b vs a");
        match (forward, backward) {
            (
                SnapshotError::KeyMismatch { left, right },
                SnapshotError::KeyMismatch {
                    left: back_left,
                    right: back_right,
                },
            ) => {
                assert_eq!(left, back_right);
                assert_eq!(right, back_left);
            }
            other => panic!("expected key mismatches, got {other:?}"),
        }
    }

    #[test]
    fn log_on_one_side_only_is_fatal() {
        let temp = tempfile::tempdir().expect("tempdir");
        let a = RunDirectoryInfo::index(&run_dir(temp.path(), "a", &[], Some("log\n")))
            .expect("index a");
        let b = RunDirectoryInfo::index(&run_dir(temp.path(), "b", &[], None)).expect("index b");
        assert!(matches!(
            a.compare(&b),
            Err(SnapshotError::InconsistentLogs { .. })
        ));
        assert!(matches!(
            b.compare(&a),
            Err(SnapshotError::InconsistentLogs { .. })
        ));
    }

    #[test]
    fn differing_logs_are_reported() {
        let temp = tempfile::tempdir().expect("tempdir");
        let a = RunDirectoryInfo::index(&run_dir(temp.path(), "a", &[], Some("INFO one\n")))
            .expect("index a");
        let b = RunDirectoryInfo::index(&run_dir(temp.path(), "b", &[], Some("INFO two\n")))
            .expect("index b");
        let report = a.compare(&b).expect("compare");
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].kind, DiffKind::Logs);
        assert_eq!(report[0].key, LOG_FILE_NAME);
    }

    #[test]
    fn missing_uploaded_dir_indexes_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let info = RunDirectoryInfo::index(temp.path()).expect("index");
        assert!(info.keys().is_empty());
    }
}
