//! Error types for sync passes

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Remote error: {0}")]
    Remote(#[from] cmisync_remote::RemoteError),

    #[error("Shadow database error: {0}")]
    Database(#[from] cmisync_db::ShadowDbError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SyncError>;
