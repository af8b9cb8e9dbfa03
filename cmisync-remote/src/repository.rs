//! Object-safe traits over the remote folder/document tree

use std::fmt;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::AsyncRead;

use crate::errors::Result;
use crate::mime::mime_type_for;
use crate::session::SessionParams;

pub type BoxAsyncRead = Box<dyn AsyncRead + Send + Unpin + 'static>;

/// A named byte stream plus the metadata the protocol attaches to it.
///
/// The caller owns the reader and drives it to completion (or drops it).
pub struct ContentStream {
    pub file_name: String,
    pub mime_type: String,
    pub length: Option<u64>,
    pub reader: BoxAsyncRead,
}

impl ContentStream {
    pub fn new(
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
        length: Option<u64>,
        reader: BoxAsyncRead,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            length,
            reader,
        }
    }

    /// Wrap an in-memory buffer.
    pub fn from_bytes(
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        let length = Some(bytes.len() as u64);
        Self::new(file_name, mime_type, length, Box::new(Cursor::new(bytes)))
    }

    /// Open a local file as a content stream, guessing the MIME type from
    /// its extension and naming the stream after its basename.
    pub async fn from_file(path: &Path) -> std::io::Result<Self> {
        let file = tokio::fs::File::open(path).await?;
        let length = file.metadata().await.ok().map(|m| m.len());
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self::new(
            file_name,
            mime_type_for(path),
            length,
            Box::new(file),
        ))
    }
}

impl fmt::Debug for ContentStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentStream")
            .field("file_name", &self.file_name)
            .field("mime_type", &self.mime_type)
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}

/// One child of a remote folder.
pub enum RemoteEntry {
    Folder(Box<dyn RemoteFolder>),
    Document(Box<dyn RemoteDocument>),
}

/// What the repository's change log can deliver, probed from repository info.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeCapability {
    None,
    ObjectIdsOnly,
    All,
}

impl ChangeCapability {
    pub fn supports_feed(self) -> bool {
        !matches!(self, ChangeCapability::None)
    }
}

/// An open repository session.
#[async_trait]
pub trait RemoteRepository: Send + Sync {
    /// Resolve a folder by its repository path (e.g. `/Sites/team/docs`).
    async fn folder_by_path(&self, path: &str) -> Result<Box<dyn RemoteFolder>>;

    /// Probe the repository's change-log capability.
    async fn change_capability(&self) -> Result<ChangeCapability>;
}

/// A folder handle, valid for the duration of one traversal.
#[async_trait]
pub trait RemoteFolder: Send + Sync {
    fn name(&self) -> &str;

    fn last_mod_time(&self) -> Option<DateTime<Utc>>;

    /// One-shot, finite listing of the folder's children.
    async fn children(&self) -> Result<Vec<RemoteEntry>>;

    async fn create_folder(&self, name: &str) -> Result<Box<dyn RemoteFolder>>;

    /// Create a document from a content stream. The document name and the
    /// content-stream filename are both taken from `content.file_name`.
    async fn create_document(&self, content: ContentStream) -> Result<Box<dyn RemoteDocument>>;

    /// Delete this folder and everything below it.
    async fn delete_tree(&self, continue_on_failure: bool) -> Result<()>;
}

/// A document handle. Metadata accessors reflect the state at fetch time.
#[async_trait]
pub trait RemoteDocument: Send + Sync {
    fn name(&self) -> &str;

    /// The filename attached to the content stream. Used as the local
    /// filename because some servers diverge from the display name; `None`
    /// means the document is skipped.
    fn content_stream_file_name(&self) -> Option<&str>;

    fn last_mod_time(&self) -> Option<DateTime<Utc>>;

    fn last_modified_by(&self) -> Option<&str>;

    /// Fetch the content stream, `None` when the document has no content.
    async fn content(&self) -> Result<Option<ContentStream>>;

    /// Replace the content stream, returning the refreshed server
    /// modification timestamp.
    async fn set_content(
        &self,
        content: ContentStream,
        overwrite: bool,
    ) -> Result<Option<DateTime<Utc>>>;

    /// Delete the document including all its versions.
    async fn delete_all_versions(&self) -> Result<()>;
}

/// Session factory. The sync worker retries `open_session` with back-off on
/// runtime errors and caches the session it gets.
#[async_trait]
pub trait RemoteConnector: Send + Sync {
    async fn open_session(&self, params: &SessionParams) -> Result<Arc<dyn RemoteRepository>>;
}
