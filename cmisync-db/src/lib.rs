//! Shadow database for the sync engine
//!
//! This crate owns the engine's local memory of what has been synchronized:
//! a per-folder SQLite file mapping normalized paths to the last-known server
//! modification timestamp and local content checksum. That record is what
//! lets the reconciler tell "new on one side" apart from "deleted on the
//! other side".

pub mod checksum;
pub mod database;
pub mod errors;
pub mod normalize;

pub use checksum::checksum_file;
pub use database::ShadowDatabase;
pub use errors::{Result, ShadowDbError};
pub use normalize::normalize;
