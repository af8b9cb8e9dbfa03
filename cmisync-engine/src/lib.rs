//! Synchronization engine
//!
//! This crate provides the core reconciliation logic that keeps a local
//! directory tree and a remote repository subtree convergent:
//! - Crawl-and-compare reconciler over remote tree, local tree, and shadow DB
//! - Conflict handling (park the local copy, take the remote, tell the user)
//! - Single-flight background sync worker with connect retry
//! - Event callbacks for UI integration

pub mod conflict;
pub mod errors;
pub mod events;
pub mod reconciler;
pub mod worker;

pub use conflict::{conflict_path, suffix_if_present};
pub use errors::{Result, SyncError};
pub use events::{NullEvents, SyncEvents};
pub use reconciler::{Reconciler, SyncSummary};
pub use worker::{SyncFolderConfig, SyncWorker, WorkerConfig};
