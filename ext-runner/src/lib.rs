//! Harness for developing and regression-testing lab automation extensions.
//!
//! An extension is a user-authored script run against one process instance.
//! The harness runs it in one of four modes: `exec` for production, `test`
//! and `test-fresh` for development against recorded network traffic, and
//! `freeze` to promote a test run to the reference that later runs are
//! validated against.
//!
//! - **[`core`]**: Pure logic (argument parsing, path derivation, issue
//!   bookkeeping, diff truncation). No I/O.
//! - **[`io`]**: Side effects (config, directories, caches, logging
//!   sessions, network recording, run-directory snapshots).
//!
//! Orchestration modules ([`exec`], [`mode`], [`cli`]) tie the two together
//! behind the [`context::Context`] and [`extension::Extension`] seams.

pub mod builtin;
pub mod cli;
pub mod context;
pub mod core;
pub mod error;
pub mod exec;
pub mod exit_codes;
pub mod extension;
pub mod io;
pub mod logging;
pub mod mode;
pub mod notify;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
