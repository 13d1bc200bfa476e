//! End-of-run notification.

use crate::context::Context;
use crate::core::issues::{DeferredIssues, Notification, summarize};

/// Summarize one execution, log each category through the context logger
/// and print the status line.
pub fn notify(module: &str, issues: &DeferredIssues, context: &mut dyn Context) -> Notification {
    let validation = context.validation();
    let (errors, warnings) = (validation.error_count(), validation.warning_count());
    let notification = summarize(module, issues, errors, warnings);

    for line in &notification.errors {
        context.logger().error(line.clone());
    }
    for line in &notification.warnings {
        context.logger().warning(line.clone());
    }
    println!("{}", notification.status_line);
    notification
}
