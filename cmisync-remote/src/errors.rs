//! Error kinds for remote repository operations
//!
//! The split matters to the engine: `Runtime` failures during session
//! creation are retried with back-off, any other remote failure aborts the
//! current pass (and succeeds on a later one), and `LocalContent` marks a
//! failure to read the *local* side of an upload so the engine can revert a
//! partially created remote document.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RemoteError {
    /// Session or connection failure. Policy: retry with back-off.
    #[error("Remote runtime error: {0}")]
    Runtime(String),

    /// Any other remote call failure mid-pass. Policy: log, abort pass.
    #[error("Remote error: {0}")]
    Base(String),

    /// The client failed reading a local content stream mid-transfer.
    #[error("Local content stream error: {0}")]
    LocalContent(#[source] std::io::Error),
}

impl RemoteError {
    pub fn is_runtime(&self) -> bool {
        matches!(self, RemoteError::Runtime(_))
    }

    /// Whether the failure was the local file vanishing under the upload.
    pub fn is_local_vanished(&self) -> bool {
        matches!(self, RemoteError::LocalContent(e) if e.kind() == std::io::ErrorKind::NotFound)
    }
}

pub type Result<T> = std::result::Result<T, RemoteError>;
