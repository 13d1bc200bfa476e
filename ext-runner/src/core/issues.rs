//! Deferred error/warning bags and the end-of-run summary.
//!
//! Extensions record issues by category while they run; the summary is built
//! once at the end of an execution. Counts are per distinct category, not per
//! occurrence.

use std::collections::BTreeMap;

/// Category -> recorded occurrence values.
pub type IssueBag = BTreeMap<String, Vec<String>>;

/// Issues deferred during one execution. Never merged across executions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeferredIssues {
    pub errors: IssueBag,
    pub warnings: IssueBag,
}

impl DeferredIssues {
    pub fn defer_error(&mut self, category: &str, value: Option<&str>) {
        defer(&mut self.errors, category, value);
    }

    pub fn defer_warning(&mut self, category: &str, value: Option<&str>) {
        defer(&mut self.warnings, category, value);
    }

    /// Record `category` as an error unless some error is already recorded.
    ///
    /// Returns true when the bag was empty and the category was added.
    pub fn ensure_error(&mut self, category: &str) -> bool {
        if !self.errors.is_empty() {
            return false;
        }
        self.errors.insert(category.to_string(), Vec::new());
        true
    }
}

fn defer(bag: &mut IssueBag, category: &str, value: Option<&str>) {
    let values = bag.entry(category.to_string()).or_default();
    if let Some(value) = value.filter(|v| !v.is_empty()) {
        values.push(value.to_string());
    }
}

/// End-of-run summary for one execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub module: String,
    pub error_count: usize,
    pub warning_count: usize,
    /// One line per error category.
    pub errors: Vec<String>,
    /// One line per warning category.
    pub warnings: Vec<String>,
    /// Consolidated line shown to the user.
    pub status_line: String,
}

impl Notification {
    pub fn has_errors(&self) -> bool {
        self.error_count > 0
    }
}

/// Combine the extension's bags with the validation service's counters.
pub fn summarize(
    module: &str,
    issues: &DeferredIssues,
    validation_errors: usize,
    validation_warnings: usize,
) -> Notification {
    let error_count = issues.errors.len() + validation_errors;
    let warning_count = issues.warnings.len() + validation_warnings;
    let errors = category_lines(&issues.errors);
    let warnings = category_lines(&issues.warnings);

    let status_line = if error_count > 0 || warning_count > 0 {
        let mut parts = vec![format!(
            "WARNING: {module} ran with {error_count} error(s), {warning_count} warning(s)"
        )];
        if !errors.is_empty() {
            parts.push(format!("Errors: {}", errors.join("; ")));
        }
        if !warnings.is_empty() {
            parts.push(format!("Warnings: {}", warnings.join("; ")));
        }
        parts.join("; ")
    } else {
        format!("{module} ran successfully")
    };

    Notification {
        module: module.to_string(),
        error_count,
        warning_count,
        errors,
        warnings,
        status_line,
    }
}

fn category_lines(bag: &IssueBag) -> Vec<String> {
    bag.iter()
        .map(|(category, values)| {
            if values.is_empty() {
                category.clone()
            } else {
                format!("{category}: [{}]", values.join(", "))
            }
        })
        .collect()
}
