//! Event callbacks for UI integration
//!
//! The engine never owns a dialog; anything user-visible goes through this
//! trait. The default implementations do nothing, so embedders implement
//! only what they surface.

use std::path::Path;

/// Callbacks fired by the sync engine.
pub trait SyncEvents: Send + Sync {
    /// A conflict was detected: the locally modified copy was parked at
    /// `saved_as` and `local_path` now holds the remote version. The user
    /// should merge by hand.
    fn on_conflict(&self, _local_path: &Path, _saved_as: &Path) {}

    /// A sync pass started.
    fn started(&self) {}

    /// A sync pass finished, successfully or not.
    fn stopped(&self) {}
}

/// No-op event handler.
pub struct NullEvents;

impl SyncEvents for NullEvents {}
