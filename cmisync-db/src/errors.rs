use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShadowDbError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Path {path} is not under the sync root {root}")]
    OutsideRoot { path: PathBuf, root: PathBuf },

    #[error("Invalid stored timestamp: {0}")]
    InvalidTimestamp(String),
}

pub type Result<T> = std::result::Result<T, ShadowDbError>;
