//! Side-effecting operations: filesystem layout, caches, network and the
//! execution session.
//!
//! Kept apart from [`crate::core`] so orchestration can be tested with
//! temp directories and scripted collaborators.

pub mod artifacts;
pub mod cache;
pub mod config;
pub mod dirs;
pub mod network;
pub mod session;
pub mod snapshot;
pub mod upload;
