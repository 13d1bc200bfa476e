//! Comparison keys and bounded line diffs for snapshot comparison.

use std::sync::LazyLock;

use similar::{DiffTag, TextDiff};

/// Maximum number of unified-diff lines kept in a report entry.
pub const DIFF_LINE_LIMIT: usize = 10;

/// Stable comparison key of an uploaded file name: its leading
/// `<digits>-<digits>` prefix.
///
/// `"123-456-report.csv"` yields `Some("123-456")`; names without the prefix
/// yield `None`.
pub fn file_key(file_name: &str) -> Option<&str> {
    static KEY_RE: LazyLock<regex::Regex> =
        LazyLock::new(|| regex::Regex::new(r"^(\d+-\d+)").expect("valid file key regex"));
    KEY_RE
        .captures(file_name)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Line-based unified diff of `old` against `new`, truncated to
/// [`DIFF_LINE_LIMIT`] lines.
///
/// Returns `None` when the texts have identical lines.
pub fn truncated_unified_diff(
    old: &str,
    new: &str,
    old_label: &str,
    new_label: &str,
) -> Option<String> {
    let diff = TextDiff::from_lines(old, new);
    if diff.ops().iter().all(|op| op.tag() == DiffTag::Equal) {
        return None;
    }
    let rendered = diff
        .unified_diff()
        .context_radius(3)
        .header(old_label, new_label)
        .to_string();
    Some(
        rendered
            .split_inclusive('\n')
            .take(DIFF_LINE_LIMIT)
            .collect(),
    )
}

/// [`truncated_unified_diff`] over raw file contents.
///
/// Contents are equal only when their bytes are. Differences invisible to a
/// lossy text diff, such as distinct invalid UTF-8 bytes, are reported as a
/// single "binary files differ" line.
pub fn truncated_bytes_diff(
    old: &[u8],
    new: &[u8],
    old_label: &str,
    new_label: &str,
) -> Option<String> {
    if old == new {
        return None;
    }
    truncated_unified_diff(
        &String::from_utf8_lossy(old),
        &String::from_utf8_lossy(new),
        old_label,
        new_label,
    )
    .or_else(|| Some(format!("Binary files {old_label} and {new_label} differ\n")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_numeric_prefix() {
        assert_eq!(file_key("123-456-report.csv"), Some("123-456"));
        assert_eq!(file_key("24-1001_sample_list.csv"), Some("24-1001"));
        assert_eq!(file_key("123-456"), Some("123-456"));
    }

    #[test]
    fn rejects_names_without_prefix() {
        assert_eq!(file_key("report.csv"), None);
        assert_eq!(file_key("a123-456.csv"), None);
        assert_eq!(file_key("123_456.csv"), None);
    }

    #[test]
    fn identical_texts_have_no_diff() {
        assert_eq!(truncated_unified_diff("a\nb\n", "a\nb\n", "x", "y"), None);
    }

    #[test]
    fn single_line_change_is_reported_with_headers() {
        let diff = truncated_unified_diff("a\nb\nc\n", "a\nB\nc\n", "old", "new")
            .expect("diff expected");
        assert!(diff.starts_with("--- old\n+++ new\n"));
        assert!(diff.contains("-b\n"));
        assert!(diff.contains("+B\n"));
    }

    #[test]
    fn long_diffs_are_truncated() {
        let old: String = (0..50).map(|i| format!("line {i}\n")).collect();
        let new: String = (0..50).map(|i| format!("LINE {i}\n")).collect();
        let diff = truncated_unified_diff(&old, &new, "old", "new").expect("diff expected");
        assert_eq!(diff.lines().count(), DIFF_LINE_LIMIT);
    }

    #[test]
    fn byte_differences_hidden_from_text_are_reported() {
        let diff = truncated_bytes_diff(&[0x41, 0xFF, 0x0A], &[0x41, 0xFE, 0x0A], "a", "b")
            .expect("bytes differ");
        assert_eq!(diff, "Binary files a and b differ\n");
        assert!(truncated_bytes_diff(b"same\n", b"same\n", "a", "b").is_none());
        let text = truncated_bytes_diff(b"A1,10\n", b"A1,11\n", "a", "b").expect("text differs");
        assert!(text.contains("-A1,10"));
    }
}
