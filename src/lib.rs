//! cmisync workspace root
//!
//! This crate serves as the root of the cmisync workspace and re-exports the
//! member crates for embedders and integration testing.

pub use cmisync_db as db;
pub use cmisync_engine as engine;
pub use cmisync_remote as remote;
