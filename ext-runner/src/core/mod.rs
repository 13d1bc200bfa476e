//! Deterministic, pure logic shared by the run-mode controller.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod args;
pub mod diff;
pub mod issues;
pub mod path;
pub mod types;
